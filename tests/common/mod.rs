#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use food_order_api::{
    auth::Principal,
    cache::InMemoryCartCache,
    config::AppConfig,
    entities::{menu, store},
    errors::ServiceError,
    events::{Event, EventSender},
    handlers::AppServices,
    message_queue::{DelayedQueue, InMemoryDelayedQueue, Message, MessageQueueError},
    models::{CartEntry, OrderChannel, PaymentMethod, ReceiptMethod, UserRole},
    repositories::{
        CartRepository, InMemoryCartRepository, InMemoryCatalogRepository, InMemoryOrderRepository,
    },
    services::{cart::CartStore, orders::CreateOrderRequest},
};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "food_order_integration_test_secret_0123456789";

pub fn test_config() -> AppConfig {
    AppConfig::new(
        "sqlite::memory:".to_string(),
        "redis://127.0.0.1:6379".to_string(),
        TEST_JWT_SECRET.to_string(),
    )
}

/// Delayed queue whose backend is always unreachable.
#[derive(Debug, Default)]
pub struct FailingDelayedQueue;

#[async_trait]
impl DelayedQueue for FailingDelayedQueue {
    async fn enqueue(&self, _message: Message, _delay: Duration) -> Result<(), MessageQueueError> {
        Err(MessageQueueError::ConnectionError("queue unreachable".into()))
    }

    async fn poll_due(&self, _limit: usize) -> Result<Vec<Message>, MessageQueueError> {
        Err(MessageQueueError::ConnectionError("queue unreachable".into()))
    }
}

/// Durable cart rows that can be read but never cleared.
#[derive(Debug, Clone)]
pub struct UnclearableCartRows {
    inner: Arc<InMemoryCartRepository>,
}

#[async_trait]
impl CartRepository for UnclearableCartRows {
    async fn load_entries(&self, customer_id: Uuid) -> Result<Vec<CartEntry>, ServiceError> {
        self.inner.load_entries(customer_id).await
    }

    async fn clear(&self, _customer_id: Uuid) -> Result<(), ServiceError> {
        Err(ServiceError::InternalError("cart table is read-only".into()))
    }
}

/// A store with its owner and a few menus.
#[derive(Debug, Clone)]
pub struct StoreFixture {
    pub store_id: Uuid,
    pub owner: Principal,
    pub menus: Vec<menu::Model>,
}

impl StoreFixture {
    pub fn menu(&self, index: usize) -> &menu::Model {
        &self.menus[index]
    }
}

/// Services wired over in-memory collaborators, with handles to each of them.
pub struct Harness {
    pub orders: Arc<InMemoryOrderRepository>,
    pub catalog: Arc<InMemoryCatalogRepository>,
    pub cart_rows: Arc<InMemoryCartRepository>,
    pub cart_cache: Arc<InMemoryCartCache>,
    pub queue: Arc<InMemoryDelayedQueue>,
    pub services: AppServices,
    pub config: AppConfig,
    pub events: mpsc::Receiver<Event>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(None, false)
    }

    /// Uses `queue` for refund scheduling instead of the in-memory one.
    pub fn with_queue(queue: Arc<dyn DelayedQueue>) -> Self {
        Self::build(Some(queue), false)
    }

    /// Clearing the durable cart always fails.
    pub fn with_unclearable_cart() -> Self {
        Self::build(None, true)
    }

    fn build(queue_override: Option<Arc<dyn DelayedQueue>>, unclearable_cart: bool) -> Self {
        let config = test_config();
        let orders = Arc::new(InMemoryOrderRepository::new());
        let catalog = Arc::new(InMemoryCatalogRepository::new());
        let cart_rows = Arc::new(InMemoryCartRepository::new());
        let cart_cache = Arc::new(InMemoryCartCache::new(config.cart.ttl()));
        let queue = Arc::new(InMemoryDelayedQueue::new());
        let (event_sender, events) = EventSender::channel(1024);

        let durable: Arc<dyn CartRepository> = if unclearable_cart {
            Arc::new(UnclearableCartRows {
                inner: cart_rows.clone(),
            })
        } else {
            cart_rows.clone()
        };
        let carts = Arc::new(CartStore::new(cart_cache.clone(), durable));
        let refund_queue: Arc<dyn DelayedQueue> = match queue_override {
            Some(queue) => queue,
            None => queue.clone(),
        };

        let services = AppServices::new(
            orders.clone(),
            catalog.clone(),
            carts,
            refund_queue,
            Some(Arc::new(event_sender)),
            &config.refund_window,
        );

        Self {
            orders,
            catalog,
            cart_rows,
            cart_cache,
            queue,
            services,
            config,
            events,
        }
    }

    /// Adds a store owned by a fresh OWNER principal, with one menu per price.
    pub async fn seed_store(&self, name: &str, prices: &[i64]) -> StoreFixture {
        let owner = Principal::new(Uuid::new_v4(), UserRole::Owner);
        let store_id = Uuid::new_v4();
        self.catalog
            .insert_store(store::Model {
                id: store_id,
                owner_id: owner.user_id,
                name: name.to_string(),
            })
            .await;

        let mut menus = Vec::new();
        for (i, price) in prices.iter().enumerate() {
            let menu = menu::Model {
                id: Uuid::new_v4(),
                store_id,
                name: format!("{name} dish {}", i + 1),
                price: *price,
            };
            self.catalog.insert_menu(menu.clone()).await;
            menus.push(menu);
        }

        StoreFixture {
            store_id,
            owner,
            menus,
        }
    }

    /// Writes the durable cart rows; the cache stays cold.
    pub async fn fill_cart(&self, customer: &Principal, entries: Vec<CartEntry>) {
        self.cart_rows.replace(customer.user_id, entries).await;
    }

    /// Seeds a cart from `fixture` and checks it out at the correct total.
    pub async fn place_order(
        &self,
        customer: &Principal,
        fixture: &StoreFixture,
        quantities: &[i32],
    ) -> Uuid {
        let mut total = 0;
        let mut entries = Vec::new();
        for (menu, quantity) in fixture.menus.iter().zip(quantities) {
            total += menu.price * i64::from(*quantity);
            entries.push(CartEntry::new(menu.id, fixture.store_id, *quantity));
        }
        self.fill_cart(customer, entries).await;

        self.services
            .orders
            .create_order(customer, checkout_request(total))
            .await
            .expect("checkout succeeds")
    }

    /// Closes the event channel so every later publish fails.
    pub fn close_events(&mut self) {
        self.events.close();
    }

    /// Drains every event published so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn customer() -> Principal {
    Principal::new(Uuid::new_v4(), UserRole::Customer)
}

pub fn checkout_request(total_price: i64) -> CreateOrderRequest {
    CreateOrderRequest {
        payment_method: PaymentMethod::CreditCard,
        order_channel: OrderChannel::Online,
        receipt_method: ReceiptMethod::Delivery,
        request_message: Some("Ring the bell".to_string()),
        total_price,
        delivery_address: "221B Baker Street".to_string(),
    }
}

/// Moves an order's creation time into the past.
pub async fn age_order(orders: &InMemoryOrderRepository, order_id: Uuid, by: chrono::Duration) {
    use food_order_api::repositories::OrderRepository;

    let mut order = orders
        .find_by_id(order_id)
        .await
        .unwrap()
        .expect("order exists");
    order.created_at = Utc::now() - by;
    orders.put_order(order).await;
}
