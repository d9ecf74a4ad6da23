//! Transaction (order) handlers.

use std::str::FromStr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use mercato_core::checkout::{CheckoutRequest, DEFAULT_PAYMENT_METHOD};
use mercato_core::models::commerce::{OrderFilter, OrderStatus, PageRequest};
use rust_decimal::Decimal;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{
    CreateTransactionRequest, CreateTransactionResponse, Pagination, TransactionDetailResponse,
    TransactionListResponse, TransactionQuery,
};

fn parse_amount(field: &str, raw: Option<&str>) -> AppResult<Option<Decimal>> {
    raw.filter(|v| !v.trim().is_empty())
        .map(|v| {
            Decimal::from_str(v.trim())
                .map_err(|_| AppError::Validation(format!("{field} must be a number")))
        })
        .transpose()
}

impl TransactionQuery {
    /// Split the query string into listing filters and a page request.
    pub fn into_parts(self) -> AppResult<(OrderFilter, PageRequest)> {
        let status = self
            .status
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(OrderStatus::from_str)
            .transpose()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        let filter = OrderFilter {
            user_id: None,
            status,
            store_id: self.store_id,
            min_total: parse_amount("min_total", self.min_total.as_deref())?,
            max_total: parse_amount("max_total", self.max_total.as_deref())?,
        };
        let page = PageRequest::new(self.page, self.limit);
        if page.checked_offset().is_none() {
            return Err(AppError::Validation("page is out of range".into()));
        }
        Ok((filter, page))
    }
}

/// `POST /transactions`: check out a cart for the caller.
pub async fn create_transaction_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    AppJson(body): AppJson<CreateTransactionRequest>,
) -> AppResult<(StatusCode, Json<CreateTransactionResponse>)> {
    if body.address_id <= 0 {
        return Err(AppError::Validation("address_id is required".into()));
    }
    let payment_method = body
        .payment_method
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_string());

    let receipt = state
        .checkout
        .checkout(CheckoutRequest {
            user_id: caller.user_id,
            address_id: body.address_id,
            items: body.items,
            payment_method,
            payment_token: body.payment_token,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTransactionResponse {
            id: receipt.order_id,
            status: receipt.status,
            total: receipt.total,
            provider_txn_id: receipt.provider_txn_id,
        }),
    ))
}

/// `GET /transactions`: admins see every order, users only their own.
pub async fn list_transactions_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    AppQuery(query): AppQuery<TransactionQuery>,
) -> AppResult<Json<TransactionListResponse>> {
    let (filter, page) = query.into_parts()?;
    let result = state
        .checkout
        .list_orders(caller.user_id, caller.role, filter, page)
        .await?;
    Ok(Json(TransactionListResponse {
        data: result.items,
        pagination: Pagination {
            page: page.page,
            limit: page.limit,
            total: result.total,
        },
    }))
}

/// `GET /transactions/{id}`: header plus line snapshots.
pub async fn get_transaction_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    AppPath(id): AppPath<i64>,
) -> AppResult<Json<TransactionDetailResponse>> {
    let (transaction, logs) = state
        .checkout
        .get_order(caller.user_id, caller.role, id)
        .await?;
    Ok(Json(TransactionDetailResponse { transaction, logs }))
}
