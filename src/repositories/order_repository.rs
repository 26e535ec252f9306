use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};
use uuid::Uuid;

use crate::entities::order::{
    ActiveModel as OrderActiveModel, Column, Entity as OrderEntity, Model as OrderModel,
};
use crate::entities::order_item::{
    self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity, Model as OrderItemModel,
};
use crate::errors::ServiceError;
use crate::models::OrderStatus;
use crate::repositories::Repository;

use super::BaseRepository;

/// A version-guarded status write.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub order_id: Uuid,
    /// The version the caller read; the write only lands if it is still current.
    pub expected_version: i32,
    pub new_status: OrderStatus,
    pub order_history: String,
    /// Also require `is_refundable = true` at write time (customer self-cancel).
    pub require_refundable: bool,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, ServiceError>;

    async fn find_items(&self, order_id: Uuid) -> Result<Vec<OrderItemModel>, ServiceError>;

    /// Newest first. `page` is 1-based; returns the page and the total count.
    async fn find_by_customer(
        &self,
        customer_id: Uuid,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError>;

    /// Orders placed at one store, newest first. Same paging as `find_by_customer`.
    async fn find_by_store(
        &self,
        store_id: Uuid,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError>;

    /// Writes the order and all of its items, or nothing.
    async fn create_with_items(
        &self,
        order: OrderModel,
        items: Vec<OrderItemModel>,
    ) -> Result<OrderModel, ServiceError>;

    /// Compare-and-set on `version`. Bumps the version on success.
    async fn update_status(&self, update: StatusUpdate) -> Result<OrderModel, ServiceError>;

    /// Clears the refundable flag. Leaves status, history and version alone.
    async fn disable_refund(&self, order_id: Uuid) -> Result<(), ServiceError>;
}

/// Explains why a guarded write matched no row.
fn classify_lost_update(current: Option<&OrderModel>, update: &StatusUpdate) -> ServiceError {
    match current {
        None => ServiceError::OrderNotFound(update.order_id),
        Some(order) if order.version != update.expected_version => {
            ServiceError::ConcurrentModification(update.order_id)
        }
        Some(order) if update.require_refundable && !order.is_refundable => {
            ServiceError::RefundWindowClosed(update.order_id)
        }
        Some(_) => ServiceError::ConcurrentModification(update.order_id),
    }
}

/// sea-orm backed order repository
#[derive(Debug, Clone)]
pub struct SqlOrderRepository {
    base: BaseRepository,
}

impl SqlOrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

impl Repository for SqlOrderRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}

impl SqlOrderRepository {
    async fn fetch_page(
        &self,
        condition: SimpleExpr,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = OrderEntity::find()
            .filter(condition)
            .order_by_desc(Column::CreatedAt)
            .paginate(self.get_db(), page_size);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((orders, total))
    }
}

fn order_active_model(order: OrderModel) -> OrderActiveModel {
    OrderActiveModel {
        id: Set(order.id),
        customer_id: Set(order.customer_id),
        store_id: Set(order.store_id),
        payment_method: Set(order.payment_method),
        order_channel: Set(order.order_channel),
        receipt_method: Set(order.receipt_method),
        request_message: Set(order.request_message),
        total_price: Set(order.total_price),
        delivery_address: Set(order.delivery_address),
        status: Set(order.status),
        is_refundable: Set(order.is_refundable),
        order_history: Set(order.order_history),
        version: Set(order.version),
        created_at: Set(order.created_at),
        updated_at: Set(order.updated_at),
    }
}

fn item_active_model(item: OrderItemModel) -> OrderItemActiveModel {
    OrderItemActiveModel {
        id: Set(item.id),
        order_id: Set(item.order_id),
        menu_id: Set(item.menu_id),
        line_no: Set(item.line_no),
        menu_name: Set(item.menu_name),
        price: Set(item.price),
        quantity: Set(item.quantity),
        created_at: Set(item.created_at),
    }
}

#[async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        OrderEntity::find_by_id(id)
            .one(self.get_db())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    async fn find_items(&self, order_id: Uuid) -> Result<Vec<OrderItemModel>, ServiceError> {
        OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::LineNo)
            .all(self.get_db())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    async fn find_by_customer(
        &self,
        customer_id: Uuid,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        self.fetch_page(Column::CustomerId.eq(customer_id), page, page_size)
            .await
    }

    async fn find_by_store(
        &self,
        store_id: Uuid,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        self.fetch_page(Column::StoreId.eq(store_id), page, page_size)
            .await
    }

    async fn create_with_items(
        &self,
        order: OrderModel,
        items: Vec<OrderItemModel>,
    ) -> Result<OrderModel, ServiceError> {
        let order_id = order.id;
        let txn = self.get_db().begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        // Dropping `txn` on an early return rolls everything back.
        let created = order_active_model(order).insert(&txn).await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to insert order row");
            ServiceError::DatabaseError(e)
        })?;

        for item in items {
            item_active_model(item).insert(&txn).await.map_err(|e| {
                error!(error = %e, %order_id, "Failed to insert order item, rolling back");
                ServiceError::DatabaseError(e)
            })?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        Ok(created)
    }

    async fn update_status(&self, update: StatusUpdate) -> Result<OrderModel, ServiceError> {
        let db = self.get_db();

        let mut query = OrderEntity::update_many()
            .col_expr(Column::Status, Expr::value(update.new_status.to_value()))
            .col_expr(Column::OrderHistory, Expr::value(update.order_history.clone()))
            .col_expr(Column::Version, Expr::value(update.expected_version + 1))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(update.order_id))
            .filter(Column::Version.eq(update.expected_version));
        if update.require_refundable {
            query = query.filter(Column::IsRefundable.eq(true));
        }

        let result = query.exec(db).await?;
        let current = OrderEntity::find_by_id(update.order_id).one(db).await?;

        if result.rows_affected == 0 {
            debug!(order_id = %update.order_id, "Guarded status update matched no row");
            return Err(classify_lost_update(current.as_ref(), &update));
        }

        current.ok_or(ServiceError::OrderNotFound(update.order_id))
    }

    async fn disable_refund(&self, order_id: Uuid) -> Result<(), ServiceError> {
        OrderEntity::update_many()
            .col_expr(Column::IsRefundable, Expr::value(false))
            .filter(Column::Id.eq(order_id))
            .exec(self.get_db())
            .await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct OrderTables {
    orders: HashMap<Uuid, OrderModel>,
    items: HashMap<Uuid, Vec<OrderItemModel>>,
}

/// Order repository kept in process memory, used by tests and local runs
/// without a database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    tables: Arc<RwLock<OrderTables>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    /// Overwrites an order row as-is. Lets tests age an order or corrupt its history.
    pub async fn put_order(&self, order: OrderModel) {
        self.tables.write().await.orders.insert(order.id, order);
    }

    async fn page_where(
        &self,
        keep: impl Fn(&OrderModel) -> bool,
        page: u64,
        page_size: u64,
    ) -> (Vec<OrderModel>, u64) {
        let tables = self.tables.read().await;
        let mut orders: Vec<OrderModel> = tables
            .orders
            .values()
            .filter(|order| keep(order))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = orders.len() as u64;
        let skip = page.saturating_sub(1).saturating_mul(page_size) as usize;
        let page = orders
            .into_iter()
            .skip(skip)
            .take(page_size as usize)
            .collect();
        (page, total)
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn find_items(&self, order_id: Uuid) -> Result<Vec<OrderItemModel>, ServiceError> {
        Ok(self
            .tables
            .read()
            .await
            .items
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_by_customer(
        &self,
        customer_id: Uuid,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        Ok(self
            .page_where(|order| order.customer_id == customer_id, page, page_size)
            .await)
    }

    async fn find_by_store(
        &self,
        store_id: Uuid,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        Ok(self
            .page_where(|order| order.store_id == store_id, page, page_size)
            .await)
    }

    async fn create_with_items(
        &self,
        order: OrderModel,
        items: Vec<OrderItemModel>,
    ) -> Result<OrderModel, ServiceError> {
        let mut tables = self.tables.write().await;
        if tables.orders.contains_key(&order.id) {
            return Err(ServiceError::DatabaseError(sea_orm::DbErr::Custom(format!(
                "duplicate order id {}",
                order.id
            ))));
        }
        if items.iter().any(|item| item.order_id != order.id) {
            return Err(ServiceError::DatabaseError(sea_orm::DbErr::Custom(
                "order item references a different order".to_string(),
            )));
        }

        let mut items = items;
        items.sort_by_key(|item| item.line_no);
        tables.items.insert(order.id, items);
        tables.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn update_status(&self, update: StatusUpdate) -> Result<OrderModel, ServiceError> {
        let mut tables = self.tables.write().await;
        let current = tables.orders.get(&update.order_id).cloned();

        let matches = current.as_ref().is_some_and(|order| {
            order.version == update.expected_version
                && (!update.require_refundable || order.is_refundable)
        });
        if !matches {
            return Err(classify_lost_update(current.as_ref(), &update));
        }

        let order = tables
            .orders
            .get_mut(&update.order_id)
            .ok_or(ServiceError::OrderNotFound(update.order_id))?;
        order.status = update.new_status;
        order.order_history = update.order_history;
        order.version = update.expected_version + 1;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn disable_refund(&self, order_id: Uuid) -> Result<(), ServiceError> {
        if let Some(order) = self.tables.write().await.orders.get_mut(&order_id) {
            order.is_refundable = false;
        }
        Ok(())
    }
}
