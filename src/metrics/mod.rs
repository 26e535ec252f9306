/*!
 * # Metrics
 *
 * Prometheus counters for the order lifecycle, exposed in text format at `/metrics`.
 */

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use tracing::warn;

use crate::errors::ServiceError;

lazy_static! {
    pub static ref ORDERS_CREATED: IntCounter =
        IntCounter::new("orders_created_total", "Total number of orders created")
            .expect("metric can be created");
    pub static ref ORDER_CREATION_FAILURES: IntCounter = IntCounter::new(
        "order_creation_failures_total",
        "Total number of failed order creations"
    )
    .expect("metric can be created");
    pub static ref ORDER_STATUS_UPDATES: IntCounter = IntCounter::new(
        "order_status_updates_total",
        "Total number of applied order status transitions"
    )
    .expect("metric can be created");
    pub static ref ORDER_STATUS_UPDATE_FAILURES: IntCounter = IntCounter::new(
        "order_status_update_failures_total",
        "Total number of rejected or failed order status transitions"
    )
    .expect("metric can be created");
    pub static ref REFUND_WINDOWS_CLOSED: IntCounter = IntCounter::new(
        "refund_windows_closed_total",
        "Total number of orders whose refund window was closed"
    )
    .expect("metric can be created");
    pub static ref REFUND_SCHEDULE_FAILURES: IntCounter = IntCounter::new(
        "refund_schedule_failures_total",
        "Total number of refund window tasks that could not be enqueued"
    )
    .expect("metric can be created");
    static ref REGISTRY: Registry = {
        let registry = Registry::new();
        let counters = [
            &*ORDERS_CREATED,
            &*ORDER_CREATION_FAILURES,
            &*ORDER_STATUS_UPDATES,
            &*ORDER_STATUS_UPDATE_FAILURES,
            &*REFUND_WINDOWS_CLOSED,
            &*REFUND_SCHEDULE_FAILURES,
        ];
        for counter in counters {
            if let Err(e) = registry.register(Box::new(counter.clone())) {
                warn!(error = %e, "Failed to register metric");
            }
        }
        registry
    };
}

/// Renders every registered metric in the prometheus text exposition format.
pub fn encode_text() -> Result<String, ServiceError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| ServiceError::InternalError(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ServiceError::InternalError(format!("Metrics are not valid UTF-8: {}", e)))
}
