pub mod cart;
pub mod order_history;
pub mod order_status;
pub mod orders;
pub mod pricing;
pub mod refund_window;
