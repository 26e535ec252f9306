pub mod orders;

use std::sync::Arc;

use crate::{
    config::RefundWindowConfig,
    events::EventSender,
    message_queue::DelayedQueue,
    repositories::{CatalogRepository, OrderRepository},
    services::{
        cart::CartStore, order_status::OrderStatusService, orders::OrderService,
        refund_window::RefundWindowScheduler,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
    pub refund_window: Arc<RefundWindowScheduler>,
}

impl AppServices {
    /// Wires the services over whichever storage, cache and queue backends
    /// the caller picked.
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn CatalogRepository>,
        carts: Arc<CartStore>,
        queue: Arc<dyn DelayedQueue>,
        event_sender: Option<Arc<EventSender>>,
        refund_config: &RefundWindowConfig,
    ) -> Self {
        let refund_window = Arc::new(RefundWindowScheduler::new(
            queue,
            orders.clone(),
            event_sender.clone(),
            refund_config,
        ));

        let order_status = Arc::new(OrderStatusService::new(
            orders.clone(),
            catalog.clone(),
            refund_config.window(),
            event_sender.clone(),
        ));

        let order_service = Arc::new(OrderService::new(
            orders,
            catalog,
            carts,
            refund_window.clone(),
            event_sender,
        ));

        Self {
            orders: order_service,
            order_status,
            refund_window,
        }
    }
}
