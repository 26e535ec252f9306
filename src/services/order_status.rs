use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lazy_static::lazy_static;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::Principal,
    entities::order::Model as OrderModel,
    entities::store::Model as StoreModel,
    errors::ServiceError,
    events::{Event, EventSender},
    metrics::{ORDER_STATUS_UPDATES, ORDER_STATUS_UPDATE_FAILURES},
    models::OrderStatus,
    repositories::{CatalogRepository, OrderRepository, StatusUpdate},
    services::order_history::append_to_history,
};

lazy_static! {
    /// Legal successors of every status. Terminal statuses have none.
    static ref TRANSITIONS: HashMap<OrderStatus, HashSet<OrderStatus>> = {
        use OrderStatus::*;
        let mut table = HashMap::new();
        table.insert(Pending, HashSet::from([Accepted, Rejected, Refunded]));
        table.insert(Accepted, HashSet::from([Cooking]));
        table.insert(Cooking, HashSet::from([InDelivery]));
        table.insert(InDelivery, HashSet::from([Completed]));
        table.insert(Completed, HashSet::new());
        table.insert(Rejected, HashSet::new());
        table.insert(Refunded, HashSet::new());
        table
    };
}

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    TRANSITIONS
        .get(&from)
        .is_some_and(|successors| successors.contains(&to))
}

pub fn validate_transition(from: OrderStatus, to: OrderStatus) -> Result<(), ServiceError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(ServiceError::InvalidTransition { from, to })
    }
}

/// True when `path` starts at PENDING and every step is a legal transition.
pub fn is_reachable_path(path: &[OrderStatus]) -> bool {
    path.first() == Some(&OrderStatus::Pending)
        && path.windows(2).all(|step| can_transition(step[0], step[1]))
}

/// Loads `store_id` and checks that `principal` is staff who owns it.
pub async fn require_store_owner(
    catalog: &dyn CatalogRepository,
    principal: &Principal,
    store_id: Uuid,
) -> Result<StoreModel, ServiceError> {
    let store = catalog
        .find_store(store_id)
        .await?
        .ok_or(ServiceError::StoreNotFound(store_id))?;

    if !principal.role.is_store_staff() || store.owner_id != principal.user_id {
        return Err(ServiceError::AccessDenied(format!(
            "user {} does not own store {}",
            principal.user_id, store_id
        )));
    }
    Ok(store)
}

/// Who is acting on the order, once authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Actor {
    StoreStaff,
    OrderCustomer,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub order_id: Uuid,
    pub status: OrderStatus,
}

/// Order status state machine with per-role authorization.
#[derive(Clone)]
pub struct OrderStatusService {
    orders: Arc<dyn OrderRepository>,
    catalog: Arc<dyn CatalogRepository>,
    refund_window: Duration,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderStatusService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn CatalogRepository>,
        refund_window: Duration,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            orders,
            catalog,
            refund_window,
            event_sender,
        }
    }

    /// Moves an order to `new_status` on behalf of `principal`.
    ///
    /// Store staff who own the order's store may take any legal transition.
    /// The order's own customer may only cancel (`PENDING -> REFUNDED`) while
    /// the order is still refundable and inside the refund window.
    #[instrument(skip(self, principal), fields(order_id = %order_id, new_status = %new_status, user_id = %principal.user_id))]
    pub async fn transition(
        &self,
        principal: &Principal,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<StatusChange, ServiceError> {
        let result = self.apply_transition(principal, order_id, new_status).await;

        match &result {
            Ok(_) => ORDER_STATUS_UPDATES.inc(),
            Err(e) => {
                ORDER_STATUS_UPDATE_FAILURES.inc();
                if e.is_internal() {
                    error!(error = %e, "Order status update failed");
                } else {
                    warn!(error = %e, "Order status update rejected");
                }
            }
        }

        result
    }

    async fn apply_transition(
        &self,
        principal: &Principal,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<StatusChange, ServiceError> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        let actor = self.authorize(principal, &order).await?;
        let old_status = order.status;

        match actor {
            Actor::StoreStaff => validate_transition(old_status, new_status)?,
            Actor::OrderCustomer => self.check_self_cancel(&order, new_status)?,
        }

        let now = Utc::now();
        let order_history = append_to_history(&order.order_history, new_status, now)?;

        let updated = self
            .orders
            .update_status(StatusUpdate {
                order_id,
                expected_version: order.version,
                new_status,
                order_history,
                require_refundable: actor == Actor::OrderCustomer,
            })
            .await?;

        info!(%order_id, %old_status, %new_status, version = updated.version, "Order status updated");

        if let Some(event_sender) = &self.event_sender {
            let event = Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            };
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, %order_id, "Failed to send order status changed event");
            }
        }

        Ok(StatusChange {
            order_id,
            status: updated.status,
        })
    }

    async fn authorize(
        &self,
        principal: &Principal,
        order: &OrderModel,
    ) -> Result<Actor, ServiceError> {
        if principal.role.is_store_staff() {
            require_store_owner(self.catalog.as_ref(), principal, order.store_id).await?;
            return Ok(Actor::StoreStaff);
        }

        if order.customer_id == principal.user_id {
            Ok(Actor::OrderCustomer)
        } else {
            Err(ServiceError::AccessDenied(format!(
                "order {} belongs to another customer",
                order.id
            )))
        }
    }

    fn check_self_cancel(
        &self,
        order: &OrderModel,
        new_status: OrderStatus,
    ) -> Result<(), ServiceError> {
        if new_status != OrderStatus::Refunded {
            return Err(ServiceError::InvalidTransition {
                from: order.status,
                to: new_status,
            });
        }
        validate_transition(order.status, new_status)?;

        let age = Utc::now().signed_duration_since(order.created_at);
        let window = chrono::Duration::from_std(self.refund_window)
            .map_err(|e| ServiceError::InternalError(format!("invalid refund window: {}", e)))?;

        if !order.is_refundable || age >= window {
            return Err(ServiceError::RefundWindowClosed(order.id));
        }
        Ok(())
    }
}
