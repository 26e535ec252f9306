use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    auth::Principal,
    entities::order::Model as OrderModel,
    entities::order_item::Model as OrderItemModel,
    errors::ServiceError,
    events::{Event, EventSender},
    metrics::{ORDERS_CREATED, ORDER_CREATION_FAILURES, REFUND_SCHEDULE_FAILURES},
    models::{cart::single_store, OrderChannel, OrderStatus, PaymentMethod, ReceiptMethod},
    repositories::{CatalogRepository, OrderRepository},
    services::{
        cart::CartStore,
        order_history::{parse_history, seed_history, HistoryEntry},
        order_status::require_store_owner,
        pricing::PriceVerifier,
        refund_window::RefundWindowScheduler,
    },
    PaginatedResponse,
};

pub const MAX_PAGE_SIZE: u64 = 100;

/// Checkout request. The total is what the client believes the cart costs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub payment_method: PaymentMethod,
    pub order_channel: OrderChannel,
    pub receipt_method: ReceiptMethod,
    #[validate(length(max = 500, message = "Request message cannot exceed 500 characters"))]
    pub request_message: Option<String>,
    #[validate(range(min = 1, message = "Total price must be positive"))]
    pub total_price: i64,
    #[validate(custom = "validate_not_blank")]
    pub delivery_address: String,
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Delivery address is required".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderItemView {
    pub menu_name: String,
    pub price: i64,
    pub quantity: i32,
}

impl From<OrderItemModel> for OrderItemView {
    fn from(item: OrderItemModel) -> Self {
        Self {
            menu_name: item.menu_name,
            price: item.price,
            quantity: item.quantity,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub store_id: Uuid,
    /// Absent when the store has since been removed.
    pub store_name: Option<String>,
    pub status: OrderStatus,
    pub is_refundable: bool,
    pub payment_method: PaymentMethod,
    pub order_channel: OrderChannel,
    pub receipt_method: ReceiptMethod,
    pub request_message: Option<String>,
    pub delivery_address: String,
    pub total_price: i64,
    pub items: Vec<OrderItemView>,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub order_id: Uuid,
    pub store_id: Uuid,
    pub status: OrderStatus,
    pub total_price: i64,
    pub is_refundable: bool,
    pub created_at: DateTime<Utc>,
}

impl From<OrderModel> for OrderSummary {
    fn from(order: OrderModel) -> Self {
        Self {
            order_id: order.id,
            store_id: order.store_id,
            status: order.status,
            total_price: order.total_price,
            is_refundable: order.is_refundable,
            created_at: order.created_at,
        }
    }
}

/// Checkout and order queries.
#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    catalog: Arc<dyn CatalogRepository>,
    carts: Arc<CartStore>,
    pricing: PriceVerifier,
    refund_window: Arc<RefundWindowScheduler>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn CatalogRepository>,
        carts: Arc<CartStore>,
        refund_window: Arc<RefundWindowScheduler>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            orders,
            pricing: PriceVerifier::new(catalog.clone()),
            catalog,
            carts,
            refund_window,
            event_sender,
        }
    }

    /// Turns the customer's cart into a PENDING order and returns its id.
    ///
    /// Nothing is written unless every check passes; the order and its items
    /// are stored atomically. Scheduling the refund window and clearing the
    /// cart happen afterwards and only log on failure.
    #[instrument(skip(self, principal, request), fields(customer_id = %principal.user_id, total_price = request.total_price))]
    pub async fn create_order(
        &self,
        principal: &Principal,
        request: CreateOrderRequest,
    ) -> Result<Uuid, ServiceError> {
        let result = self.place_order(principal, request).await;
        if let Err(e) = &result {
            ORDER_CREATION_FAILURES.inc();
            if e.is_internal() {
                error!(error = %e, "Order creation failed");
            } else {
                warn!(error = %e, "Order creation rejected");
            }
        }
        result
    }

    async fn place_order(
        &self,
        principal: &Principal,
        request: CreateOrderRequest,
    ) -> Result<Uuid, ServiceError> {
        if !principal.is_customer() {
            return Err(ServiceError::AccessDenied(
                "only customers can place orders".to_string(),
            ));
        }
        request.validate()?;

        let customer_id = principal.user_id;
        let entries = self.carts.get_cart(customer_id).await?;
        if entries.is_empty() {
            return Err(ServiceError::CartEmpty);
        }

        let store_id = single_store(&entries).ok_or(ServiceError::MultiStoreCart)?;
        self.catalog
            .find_store(store_id)
            .await?
            .ok_or(ServiceError::StoreNotFound(store_id))?;

        let verified = self.pricing.verify(&entries, request.total_price).await?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order = OrderModel {
            id: order_id,
            customer_id,
            store_id,
            payment_method: request.payment_method,
            order_channel: request.order_channel,
            receipt_method: request.receipt_method,
            request_message: request.request_message,
            total_price: verified.total,
            delivery_address: request.delivery_address,
            status: OrderStatus::Pending,
            is_refundable: true,
            order_history: seed_history(now)?,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        let items = verified
            .lines
            .into_iter()
            .zip(0..)
            .map(|(line, line_no)| OrderItemModel {
                id: Uuid::new_v4(),
                order_id,
                menu_id: line.menu_id,
                line_no,
                menu_name: line.menu_name,
                price: line.unit_price,
                quantity: line.quantity,
                created_at: now,
            })
            .collect();

        self.orders.create_with_items(order, items).await?;
        ORDERS_CREATED.inc();
        info!(%order_id, %store_id, total_price = verified.total, "Order created");

        if let Err(e) = self.refund_window.schedule_refund_disable(order_id).await {
            REFUND_SCHEDULE_FAILURES.inc();
            error!(error = %e, %order_id, "Failed to schedule refund window; order stays refundable");
        }

        if let Err(e) = self.carts.clear(customer_id).await {
            warn!(error = %e, %order_id, "Failed to clear cart after checkout");
        }

        if let Some(event_sender) = &self.event_sender {
            let event = Event::OrderCreated {
                order_id,
                customer_id,
                store_id,
                total_price: verified.total,
            };
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, %order_id, "Failed to send order created event");
            }
        }

        Ok(order_id)
    }

    /// Full view of one order for its customer or the owning store's staff.
    #[instrument(skip(self, principal), fields(order_id = %order_id, user_id = %principal.user_id))]
    pub async fn get_order_detail(
        &self,
        principal: &Principal,
        order_id: Uuid,
    ) -> Result<OrderDetail, ServiceError> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        let store_name = if principal.role.is_store_staff() {
            let store =
                require_store_owner(self.catalog.as_ref(), principal, order.store_id).await?;
            Some(store.name)
        } else {
            if order.customer_id != principal.user_id {
                return Err(ServiceError::AccessDenied(format!(
                    "user {} cannot view order {}",
                    principal.user_id, order_id
                )));
            }
            self.catalog
                .find_store(order.store_id)
                .await?
                .map(|store| store.name)
        };

        let items = self.orders.find_items(order_id).await?;
        let history = parse_history(&order.order_history)?;

        Ok(OrderDetail {
            order_id: order.id,
            customer_id: order.customer_id,
            store_id: order.store_id,
            store_name,
            status: order.status,
            is_refundable: order.is_refundable,
            payment_method: order.payment_method,
            order_channel: order.order_channel,
            receipt_method: order.receipt_method,
            request_message: order.request_message,
            delivery_address: order.delivery_address,
            total_price: order.total_price,
            items: items.into_iter().map(OrderItemView::from).collect(),
            history,
            created_at: order.created_at,
        })
    }

    /// The caller's own orders, newest first.
    #[instrument(skip(self, principal), fields(customer_id = %principal.user_id))]
    pub async fn list_customer_orders(
        &self,
        principal: &Principal,
        page: u64,
        limit: u64,
    ) -> Result<PaginatedResponse<OrderSummary>, ServiceError> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        let (orders, total) = self
            .orders
            .find_by_customer(principal.user_id, page, limit)
            .await?;

        Ok(PaginatedResponse {
            items: orders.into_iter().map(OrderSummary::from).collect(),
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        })
    }

    /// Every order placed at `store_id`, newest first. Only the store's owner may list them.
    #[instrument(skip(self, principal), fields(store_id = %store_id, user_id = %principal.user_id))]
    pub async fn list_store_orders(
        &self,
        principal: &Principal,
        store_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<PaginatedResponse<OrderSummary>, ServiceError> {
        require_store_owner(self.catalog.as_ref(), principal, store_id).await?;

        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let (orders, total) = self.orders.find_by_store(store_id, page, limit).await?;

        Ok(PaginatedResponse {
            items: orders.into_iter().map(OrderSummary::from).collect(),
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(total_price: i64) -> CreateOrderRequest {
        CreateOrderRequest {
            payment_method: PaymentMethod::CreditCard,
            order_channel: OrderChannel::Online,
            receipt_method: ReceiptMethod::Delivery,
            request_message: Some("no onions".into()),
            total_price,
            delivery_address: "12 Harbor Rd".into(),
        }
    }

    #[test]
    fn request_validation() {
        assert!(request(10_000).validate().is_ok());
        assert!(request(0).validate().is_err());

        let mut blank = request(100);
        blank.delivery_address = "   ".into();
        assert!(blank.validate().is_err());

        let mut chatty = request(100);
        chatty.request_message = Some("x".repeat(501));
        assert!(chatty.validate().is_err());
    }

    #[test]
    fn request_accepts_wire_names() {
        let body = r#"{
            "payment_method": "SIMPLE_PAY",
            "order_channel": "ONLINE",
            "receipt_method": "PICKUP",
            "request_message": null,
            "total_price": 10000,
            "delivery_address": "12 Harbor Rd"
        }"#;
        let parsed: CreateOrderRequest = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.payment_method, PaymentMethod::SimplePay);
        assert_eq!(parsed.receipt_method, ReceiptMethod::TakeOut);
    }
}
