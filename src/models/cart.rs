use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A pending selection in a customer's cart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartEntry {
    pub menu_id: Uuid,
    pub store_id: Uuid,
    pub quantity: i32,
}

impl CartEntry {
    pub fn new(menu_id: Uuid, store_id: Uuid, quantity: i32) -> Self {
        Self {
            menu_id,
            store_id,
            quantity,
        }
    }
}

/// Returns the single store every entry belongs to, or `None` when the cart
/// is empty or spans several stores.
pub fn single_store(entries: &[CartEntry]) -> Option<Uuid> {
    let first = entries.first()?.store_id;
    entries
        .iter()
        .all(|entry| entry.store_id == first)
        .then_some(first)
}
