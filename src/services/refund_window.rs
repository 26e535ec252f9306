use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::RefundWindowConfig,
    errors::ServiceError,
    events::{Event, EventSender},
    message_queue::{DelayedQueue, Message},
    metrics::REFUND_WINDOWS_CLOSED,
    repositories::OrderRepository,
};

pub const REFUND_DISABLE_TOPIC: &str = "order.refund.disable";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RefundDisablePayload {
    order_id: Uuid,
}

/// Closes each order's self-service cancellation window a fixed delay
/// after checkout.
#[derive(Clone)]
pub struct RefundWindowScheduler {
    queue: Arc<dyn DelayedQueue>,
    orders: Arc<dyn OrderRepository>,
    event_sender: Option<Arc<EventSender>>,
    window: Duration,
    poll_interval: Duration,
    batch_size: usize,
}

impl RefundWindowScheduler {
    pub fn new(
        queue: Arc<dyn DelayedQueue>,
        orders: Arc<dyn OrderRepository>,
        event_sender: Option<Arc<EventSender>>,
        config: &RefundWindowConfig,
    ) -> Self {
        Self {
            queue,
            orders,
            event_sender,
            window: config.window(),
            poll_interval: config.poll_interval(),
            batch_size: config.batch_size,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Enqueues the delayed disable-refund task for `order_id`.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn schedule_refund_disable(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let payload = serde_json::to_value(RefundDisablePayload { order_id })
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;

        self.queue
            .enqueue(Message::new(REFUND_DISABLE_TOPIC, payload), self.window)
            .await?;

        debug!(window_secs = self.window.as_secs(), "Refund window scheduled");
        Ok(())
    }

    /// Clears the refundable flag. Safe to repeat and safe on orders that
    /// already left PENDING.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn disable_refund(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        if !order.is_refundable {
            debug!("Refund already disabled");
            return Ok(());
        }

        self.orders.disable_refund(order_id).await?;
        REFUND_WINDOWS_CLOSED.inc();
        info!(status = %order.status, "Refund window closed");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::RefundWindowClosed(order_id)).await {
                warn!(error = %e, "Failed to send refund window closed event");
            }
        }
        Ok(())
    }

    /// Handles every task that is due right now. Returns how many orders
    /// were processed without error.
    pub async fn process_due(&self) -> Result<usize, ServiceError> {
        let messages = self.queue.poll_due(self.batch_size).await?;
        let mut processed = 0;

        for message in messages {
            if message.topic != REFUND_DISABLE_TOPIC {
                warn!(topic = %message.topic, message_id = %message.id, "Ignoring message for unknown topic");
                continue;
            }

            let payload: RefundDisablePayload = match serde_json::from_value(message.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(error = %e, message_id = %message.id, "Malformed refund window message");
                    continue;
                }
            };

            match self.disable_refund(payload.order_id).await {
                Ok(()) => processed += 1,
                Err(ServiceError::OrderNotFound(order_id)) => {
                    warn!(%order_id, "Refund window fired for unknown order");
                }
                Err(e) => {
                    error!(error = %e, order_id = %payload.order_id, "Failed to close refund window");
                }
            }
        }

        Ok(processed)
    }

    /// Polls the queue until `shutdown` flips to true.
    pub async fn run_worker(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Refund window worker started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.process_due().await {
                        error!(error = %e, "Refund window poll failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Refund window worker stopped");
    }
}
