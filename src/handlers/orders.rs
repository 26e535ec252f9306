use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::Principal,
    errors::ServiceError,
    models::OrderStatus,
    services::{
        order_status::StatusChange,
        orders::{CreateOrderRequest, CreateOrderResponse, OrderDetail, OrderSummary},
    },
    ApiResponse, AppState, ListQuery, PaginatedResponse,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub new_status: OrderStatus,
}

/// Create an order from the caller's cart
pub async fn create_order(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreateOrderResponse>>), ServiceError> {
    let order_id = state
        .services
        .orders
        .create_order(&principal, request)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(CreateOrderResponse { order_id })),
    ))
}

/// Get a single order with its items and history
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    principal: Principal,
) -> Result<Json<ApiResponse<OrderDetail>>, ServiceError> {
    let detail = state
        .services
        .orders
        .get_order_detail(&principal, id)
        .await?;
    Ok(Json(ApiResponse::success(detail)))
}

/// Move an order to a new status
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    principal: Principal,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<StatusChange>>, ServiceError> {
    let change = state
        .services
        .order_status
        .transition(&principal, id, request.new_status)
        .await?;
    Ok(Json(ApiResponse::success(change)))
}

/// List the caller's own orders, newest first
pub async fn list_my_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    principal: Principal,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderSummary>>>, ServiceError> {
    let page = state
        .services
        .orders
        .list_customer_orders(&principal, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

/// List every order placed at a store the caller owns
pub async fn list_store_orders(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
    principal: Principal,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderSummary>>>, ServiceError> {
    let page = state
        .services
        .orders
        .list_store_orders(&principal, store_id, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(page)))
}
