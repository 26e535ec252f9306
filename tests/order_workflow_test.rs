mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use common::{checkout_request, customer, FailingDelayedQueue, Harness};
use food_order_api::{
    auth::Principal,
    cache::CartCache,
    errors::ServiceError,
    events::Event,
    models::{CartEntry, OrderStatus, UserRole},
    repositories::{CartRepository, OrderRepository},
    services::order_history::parse_history,
};
use uuid::Uuid;

#[tokio::test]
async fn checkout_snapshots_items_at_verified_total() {
    let mut harness = Harness::new();
    let fixture = harness.seed_store("Noodle Bar", &[5_000]).await;
    let buyer = customer();
    let menu = fixture.menu(0).clone();

    harness
        .fill_cart(&buyer, vec![CartEntry::new(menu.id, fixture.store_id, 2)])
        .await;

    let order_id = harness
        .services
        .orders
        .create_order(&buyer, checkout_request(10_000))
        .await
        .unwrap();

    let order = harness.orders.find_by_id(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.is_refundable);
    assert_eq!(order.total_price, 10_000);
    assert_eq!(order.customer_id, buyer.user_id);
    assert_eq!(order.store_id, fixture.store_id);
    assert_eq!(order.version, 1);

    let items = harness.orders.find_items(order_id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].menu_name, menu.name);
    assert_eq!(items[0].price, 5_000);
    assert_eq!(items[0].quantity, 2);

    let history = parse_history(&order.order_history).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "PENDING");

    let events = harness.drain_events();
    assert_matches!(
        events.as_slice(),
        [Event::OrderCreated { order_id: id, total_price: 10_000, .. }] if *id == order_id
    );
}

#[tokio::test]
async fn stale_total_is_rejected_without_writing() {
    let harness = Harness::new();
    let fixture = harness.seed_store("Noodle Bar", &[5_000]).await;
    let buyer = customer();

    harness
        .fill_cart(
            &buyer,
            vec![CartEntry::new(fixture.menu(0).id, fixture.store_id, 2)],
        )
        .await;

    let err = harness
        .services
        .orders
        .create_order(&buyer, checkout_request(9_000))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ServiceError::PriceMismatch {
            expected: 10_000,
            submitted: 9_000
        }
    );
    assert_eq!(harness.orders.order_count().await, 0);
    assert_eq!(harness.queue.pending().await, 0);
    // The cart survives a failed checkout.
    assert_eq!(
        harness.cart_rows.load_entries(buyer.user_id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn cart_spanning_two_stores_is_rejected_before_lookups() {
    let harness = Harness::new();
    let buyer = customer();

    // Neither store nor menu exists; the multi-store check must fire first.
    harness
        .fill_cart(
            &buyer,
            vec![
                CartEntry::new(Uuid::new_v4(), Uuid::new_v4(), 1),
                CartEntry::new(Uuid::new_v4(), Uuid::new_v4(), 1),
            ],
        )
        .await;

    let err = harness
        .services
        .orders
        .create_order(&buyer, checkout_request(1_000))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::MultiStoreCart);
    assert_eq!(harness.orders.order_count().await, 0);
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let harness = Harness::new();
    let err = harness
        .services
        .orders
        .create_order(&customer(), checkout_request(1_000))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::CartEmpty);
}

#[tokio::test]
async fn unknown_store_is_reported() {
    let harness = Harness::new();
    let buyer = customer();
    let store_id = Uuid::new_v4();
    harness
        .fill_cart(&buyer, vec![CartEntry::new(Uuid::new_v4(), store_id, 1)])
        .await;

    let err = harness
        .services
        .orders
        .create_order(&buyer, checkout_request(1_000))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::StoreNotFound(id) if id == store_id);
}

#[tokio::test]
async fn deleted_menu_is_reported() {
    let harness = Harness::new();
    let fixture = harness.seed_store("Taco Stand", &[1_200, 800]).await;
    let buyer = customer();
    let gone = fixture.menu(1).id;

    harness
        .fill_cart(
            &buyer,
            vec![
                CartEntry::new(fixture.menu(0).id, fixture.store_id, 1),
                CartEntry::new(gone, fixture.store_id, 1),
            ],
        )
        .await;
    harness.catalog.remove_menu(gone).await;

    let err = harness
        .services
        .orders
        .create_order(&buyer, checkout_request(2_000))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::MenuNotFound(id) if id == gone);
    assert_eq!(harness.orders.order_count().await, 0);
}

#[tokio::test]
async fn price_change_after_carting_is_caught() {
    let harness = Harness::new();
    let fixture = harness.seed_store("Taco Stand", &[1_200]).await;
    let buyer = customer();
    harness
        .fill_cart(
            &buyer,
            vec![CartEntry::new(fixture.menu(0).id, fixture.store_id, 3)],
        )
        .await;
    harness.catalog.set_menu_price(fixture.menu(0).id, 1_500).await;

    let err = harness
        .services
        .orders
        .create_order(&buyer, checkout_request(3_600))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::PriceMismatch {
            expected: 4_500,
            submitted: 3_600
        }
    );
}

#[tokio::test]
async fn invalid_request_fields_fail_before_cart_is_read() {
    let harness = Harness::new();
    let buyer = customer();

    let mut request = checkout_request(1_000);
    request.delivery_address = "  ".to_string();

    // An empty cart would be CartEmpty; validation must win.
    let err = harness
        .services
        .orders
        .create_order(&buyer, request)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = harness
        .services
        .orders
        .create_order(&buyer, checkout_request(0))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn store_staff_cannot_check_out() {
    let harness = Harness::new();
    let staff = Principal::new(Uuid::new_v4(), UserRole::Manager);
    let err = harness
        .services
        .orders
        .create_order(&staff, checkout_request(1_000))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::AccessDenied(_));
}

#[tokio::test]
async fn successful_checkout_schedules_refund_window_and_clears_cart() {
    let harness = Harness::new();
    let fixture = harness.seed_store("Curry House", &[7_000, 3_000]).await;
    let buyer = customer();

    harness.place_order(&buyer, &fixture, &[1, 2]).await;

    assert_eq!(harness.queue.pending().await, 1);
    assert!(harness
        .cart_rows
        .load_entries(buyer.user_id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(harness.cart_cache.load(buyer.user_id).await.unwrap(), None);
}

#[tokio::test]
async fn scheduling_failure_does_not_fail_checkout() {
    let harness = Harness::with_queue(Arc::new(FailingDelayedQueue));
    let fixture = harness.seed_store("Curry House", &[7_000]).await;
    let buyer = customer();

    let order_id = harness.place_order(&buyer, &fixture, &[1]).await;

    let order = harness.orders.find_by_id(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    // Without a scheduled task the order simply stays refundable.
    assert!(order.is_refundable);
    assert!(harness
        .cart_rows
        .load_entries(buyer.user_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn cart_clear_failure_does_not_fail_checkout() {
    let harness = Harness::with_unclearable_cart();
    let fixture = harness.seed_store("Taco Stand", &[2_500]).await;
    let buyer = customer();

    let order_id = harness.place_order(&buyer, &fixture, &[2]).await;

    let order = harness.orders.find_by_id(order_id).await.unwrap().unwrap();
    assert_eq!(order.total_price, 5_000);
    assert_eq!(harness.queue.pending().await, 1);
    // The rows survive; the next checkout would see the same cart.
    assert_eq!(
        harness.cart_rows.load_entries(buyer.user_id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn event_publish_failure_does_not_fail_checkout() {
    let mut harness = Harness::new();
    harness.close_events();
    let fixture = harness.seed_store("Noodle Bar", &[4_000]).await;
    let buyer = customer();

    let order_id = harness.place_order(&buyer, &fixture, &[1]).await;

    let order = harness.orders.find_by_id(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(harness
        .cart_rows
        .load_entries(buyer.user_id)
        .await
        .unwrap()
        .is_empty());
    assert!(harness.drain_events().is_empty());
}

#[tokio::test]
async fn order_total_matches_item_snapshot() {
    let harness = Harness::new();
    let fixture = harness.seed_store("Deli", &[450, 1_250, 999]).await;
    let buyer = customer();

    let order_id = harness.place_order(&buyer, &fixture, &[3, 1, 4]).await;

    // Later menu edits must not leak into the stored order.
    harness.catalog.set_menu_price(fixture.menu(0).id, 10).await;

    let order = harness.orders.find_by_id(order_id).await.unwrap().unwrap();
    let items = harness.orders.find_items(order_id).await.unwrap();
    let item_total: i64 = items
        .iter()
        .map(|item| item.price * i64::from(item.quantity))
        .sum();
    assert_eq!(order.total_price, 450 * 3 + 1_250 + 999 * 4);
    assert_eq!(order.total_price, item_total);
}

#[tokio::test]
async fn order_detail_is_visible_to_customer_and_owner_only() {
    let harness = Harness::new();
    let fixture = harness.seed_store("Pho Corner", &[9_000]).await;
    let buyer = customer();
    let order_id = harness.place_order(&buyer, &fixture, &[1]).await;

    let detail = harness
        .services
        .orders
        .get_order_detail(&buyer, order_id)
        .await
        .unwrap();
    assert_eq!(detail.store_name.as_deref(), Some("Pho Corner"));
    assert_eq!(detail.items.len(), 1);
    assert_eq!(detail.history.len(), 1);
    assert_eq!(detail.total_price, 9_000);

    let owner_view = harness
        .services
        .orders
        .get_order_detail(&fixture.owner, order_id)
        .await
        .unwrap();
    assert_eq!(owner_view.order_id, order_id);

    let stranger = customer();
    let err = harness
        .services
        .orders
        .get_order_detail(&stranger, order_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::AccessDenied(_));

    let other_owner = Principal::new(Uuid::new_v4(), UserRole::Owner);
    let err = harness
        .services
        .orders
        .get_order_detail(&other_owner, order_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::AccessDenied(_));

    let err = harness
        .services
        .orders
        .get_order_detail(&buyer, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::OrderNotFound(_));
}

#[tokio::test]
async fn customer_still_sees_order_after_store_is_removed() {
    let harness = Harness::new();
    let fixture = harness.seed_store("Closed Diner", &[3_000]).await;
    let buyer = customer();
    let order_id = harness.place_order(&buyer, &fixture, &[1]).await;

    harness.catalog.remove_store(fixture.store_id).await;

    let detail = harness
        .services
        .orders
        .get_order_detail(&buyer, order_id)
        .await
        .unwrap();
    assert_eq!(detail.store_name, None);
    assert_eq!(detail.total_price, 3_000);

    let err = harness
        .services
        .orders
        .get_order_detail(&customer(), order_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::AccessDenied(_));

    let err = harness
        .services
        .orders
        .get_order_detail(&fixture.owner, order_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::StoreNotFound(id) if id == fixture.store_id);
}

#[tokio::test]
async fn store_listing_is_for_the_owner_only() {
    let harness = Harness::new();
    let fixture = harness.seed_store("Ramen Ya", &[1_200]).await;
    let elsewhere = harness.seed_store("Sushi Go", &[800]).await;

    let mut placed = Vec::new();
    for _ in 0..3 {
        placed.push(harness.place_order(&customer(), &fixture, &[1]).await);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    harness.place_order(&customer(), &elsewhere, &[1]).await;

    let listing = harness
        .services
        .orders
        .list_store_orders(&fixture.owner, fixture.store_id, 1, 20)
        .await
        .unwrap();
    assert_eq!(listing.total, 3);
    assert_eq!(
        listing.items.iter().map(|o| o.order_id).collect::<Vec<_>>(),
        placed.iter().rev().copied().collect::<Vec<_>>()
    );
    assert!(listing
        .items
        .iter()
        .all(|o| o.status == OrderStatus::Pending && o.store_id == fixture.store_id));

    let err = harness
        .services
        .orders
        .list_store_orders(&elsewhere.owner, fixture.store_id, 1, 20)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::AccessDenied(_));

    let buyer = customer();
    let err = harness
        .services
        .orders
        .list_store_orders(&buyer, fixture.store_id, 1, 20)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::AccessDenied(_));

    let missing = Uuid::new_v4();
    let err = harness
        .services
        .orders
        .list_store_orders(&fixture.owner, missing, 1, 20)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::StoreNotFound(id) if id == missing);
}

#[tokio::test]
async fn customer_listing_is_paged_and_scoped() {
    let harness = Harness::new();
    let fixture = harness.seed_store("Bakery", &[300]).await;
    let buyer = customer();

    let mut placed = Vec::new();
    for _ in 0..3 {
        placed.push(harness.place_order(&buyer, &fixture, &[1]).await);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    // Someone else's order never shows up.
    harness.place_order(&customer(), &fixture, &[2]).await;

    let first = harness
        .services
        .orders
        .list_customer_orders(&buyer, 1, 2)
        .await
        .unwrap();
    assert_eq!(first.total, 3);
    assert_eq!(first.total_pages, 2);
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.items[0].order_id, placed[2]);

    let second = harness
        .services
        .orders
        .list_customer_orders(&buyer, 2, 2)
        .await
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].order_id, placed[0]);

    // Out-of-range paging arguments are clamped.
    let clamped = harness
        .services
        .orders
        .list_customer_orders(&buyer, 0, 0)
        .await
        .unwrap();
    assert_eq!(clamped.page, 1);
    assert_eq!(clamped.limit, 1);
}
