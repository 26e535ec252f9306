use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::entities::cart_item::{self, Entity as CartItemEntity};
use crate::errors::ServiceError;
use crate::models::CartEntry;
use crate::repositories::Repository;

use super::BaseRepository;

/// Durable cart rows, the source of truth when the cache has nothing.
#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn load_entries(&self, customer_id: Uuid) -> Result<Vec<CartEntry>, ServiceError>;

    async fn clear(&self, customer_id: Uuid) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone)]
pub struct SqlCartRepository {
    base: BaseRepository,
}

impl SqlCartRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

impl Repository for SqlCartRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}

#[async_trait]
impl CartRepository for SqlCartRepository {
    async fn load_entries(&self, customer_id: Uuid) -> Result<Vec<CartEntry>, ServiceError> {
        let rows = CartItemEntity::find()
            .filter(cart_item::Column::CustomerId.eq(customer_id))
            .order_by_asc(cart_item::Column::UpdatedAt)
            .all(self.get_db())
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| CartEntry::new(row.menu_id, row.store_id, row.quantity))
            .collect())
    }

    async fn clear(&self, customer_id: Uuid) -> Result<(), ServiceError> {
        CartItemEntity::delete_many()
            .filter(cart_item::Column::CustomerId.eq(customer_id))
            .exec(self.get_db())
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCartRepository {
    carts: Arc<RwLock<HashMap<Uuid, Vec<CartEntry>>>>,
}

impl InMemoryCartRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&self, customer_id: Uuid, entries: Vec<CartEntry>) {
        self.carts.write().await.insert(customer_id, entries);
    }
}

#[async_trait]
impl CartRepository for InMemoryCartRepository {
    async fn load_entries(&self, customer_id: Uuid) -> Result<Vec<CartEntry>, ServiceError> {
        Ok(self
            .carts
            .read()
            .await
            .get(&customer_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear(&self, customer_id: Uuid) -> Result<(), ServiceError> {
        self.carts.write().await.remove(&customer_id);
        Ok(())
    }
}
