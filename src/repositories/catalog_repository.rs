use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::entities::menu::{self, Entity as MenuEntity, Model as MenuModel};
use crate::entities::store::{Entity as StoreEntity, Model as StoreModel};
use crate::errors::ServiceError;
use crate::repositories::Repository;

use super::BaseRepository;

/// Read access to stores and their menus.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn find_store(&self, store_id: Uuid) -> Result<Option<StoreModel>, ServiceError>;

    /// Returns the menus that exist among `menu_ids`; missing ids are simply absent.
    async fn find_menus(&self, menu_ids: &[Uuid]) -> Result<Vec<MenuModel>, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct SqlCatalogRepository {
    base: BaseRepository,
}

impl SqlCatalogRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

impl Repository for SqlCatalogRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}

#[async_trait]
impl CatalogRepository for SqlCatalogRepository {
    async fn find_store(&self, store_id: Uuid) -> Result<Option<StoreModel>, ServiceError> {
        Ok(StoreEntity::find_by_id(store_id).one(self.get_db()).await?)
    }

    async fn find_menus(&self, menu_ids: &[Uuid]) -> Result<Vec<MenuModel>, ServiceError> {
        if menu_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(MenuEntity::find()
            .filter(menu::Column::Id.is_in(menu_ids.iter().copied()))
            .all(self.get_db())
            .await?)
    }
}

#[derive(Debug, Default)]
struct CatalogTables {
    stores: HashMap<Uuid, StoreModel>,
    menus: HashMap<Uuid, MenuModel>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalogRepository {
    tables: Arc<RwLock<CatalogTables>>,
}

impl InMemoryCatalogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_store(&self, store: StoreModel) {
        self.tables.write().await.stores.insert(store.id, store);
    }

    pub async fn insert_menu(&self, menu: MenuModel) {
        self.tables.write().await.menus.insert(menu.id, menu);
    }

    pub async fn remove_store(&self, store_id: Uuid) {
        self.tables.write().await.stores.remove(&store_id);
    }

    pub async fn remove_menu(&self, menu_id: Uuid) {
        self.tables.write().await.menus.remove(&menu_id);
    }

    pub async fn set_menu_price(&self, menu_id: Uuid, price: i64) {
        if let Some(menu) = self.tables.write().await.menus.get_mut(&menu_id) {
            menu.price = price;
        }
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalogRepository {
    async fn find_store(&self, store_id: Uuid) -> Result<Option<StoreModel>, ServiceError> {
        Ok(self.tables.read().await.stores.get(&store_id).cloned())
    }

    async fn find_menus(&self, menu_ids: &[Uuid]) -> Result<Vec<MenuModel>, ServiceError> {
        let tables = self.tables.read().await;
        Ok(menu_ids
            .iter()
            .filter_map(|id| tables.menus.get(id).cloned())
            .collect())
    }
}
