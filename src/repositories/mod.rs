use sea_orm::DatabaseConnection;
use std::sync::Arc;

pub mod cart_repository;
pub mod catalog_repository;
pub mod order_repository;

pub use cart_repository::{CartRepository, InMemoryCartRepository, SqlCartRepository};
pub use catalog_repository::{CatalogRepository, InMemoryCatalogRepository, SqlCatalogRepository};
pub use order_repository::{
    InMemoryOrderRepository, OrderRepository, SqlOrderRepository, StatusUpdate,
};

/// Repository trait for common database operations
pub trait Repository {
    fn get_db(&self) -> &DatabaseConnection;
}

#[derive(Debug, Clone)]
pub struct BaseRepository {
    db: Arc<DatabaseConnection>,
}

impl BaseRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl Repository for BaseRepository {
    fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }
}
