pub mod cart;
pub mod order;

pub use cart::CartEntry;
pub use order::{OrderChannel, OrderStatus, PaymentMethod, ReceiptMethod, UserRole};
