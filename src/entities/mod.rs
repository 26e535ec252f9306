pub mod cart_item;
pub mod menu;
pub mod order;
pub mod order_item;
pub mod store;
