use crate::dtos::matches::{total_pages, CandidatesParams, ListParams};
use crate::dtos::{
    CandidateListResponse, CandidateResponse, ReceiptListResponse, ReceiptResponse,
    TransactionListResponse, TransactionResponse, VendorAliasListResponse, VendorAliasResponse,
};
use crate::middleware::user_id::UserId;
use crate::services::matching;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

/// GET /receipts/unmatched
pub async fn list_unmatched_receipts(
    State(state): State<AppState>,
    user_id: UserId,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = params.page();
    let page_size = params.page_size();
    let (receipts, total) = state
        .db
        .list_unmatched_receipts(user_id.0, page, page_size)
        .await?;

    Ok(Json(ReceiptListResponse {
        receipts: receipts.into_iter().map(ReceiptResponse::from).collect(),
        total,
        page,
        page_size,
        total_pages: total_pages(total, page_size),
    }))
}

/// GET /transactions/unmatched
pub async fn list_unmatched_transactions(
    State(state): State<AppState>,
    user_id: UserId,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = params.page();
    let page_size = params.page_size();
    let (transactions, total) = state
        .db
        .list_unmatched_transactions(user_id.0, page, page_size)
        .await?;

    Ok(Json(TransactionListResponse {
        transactions: transactions
            .into_iter()
            .map(TransactionResponse::from)
            .collect(),
        total,
        page,
        page_size,
        total_pages: total_pages(total, page_size),
    }))
}

/// GET /receipts/:id/candidates
pub async fn list_candidates(
    State(state): State<AppState>,
    user_id: UserId,
    Path(receipt_id): Path<Uuid>,
    Query(params): Query<CandidatesParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(10).clamp(1, 50);
    let (receipt, candidates) = matching::ranked_candidates(
        &state.db,
        &state.config.scoring,
        user_id.0,
        receipt_id,
        limit,
    )
    .await?;

    Ok(Json(CandidateListResponse {
        receipt: ReceiptResponse::from(receipt),
        candidates: candidates
            .into_iter()
            .map(CandidateResponse::from)
            .collect(),
    }))
}

/// DELETE /receipts/:id
pub async fn delete_receipt(
    State(state): State<AppState>,
    user_id: UserId,
    Path(receipt_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.db.delete_receipt(user_id.0, receipt_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /aliases
pub async fn list_vendor_aliases(
    State(state): State<AppState>,
    user_id: UserId,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = params.page();
    let page_size = params.page_size();
    let (aliases, total) = state
        .db
        .list_vendor_aliases(user_id.0, page, page_size)
        .await?;

    Ok(Json(VendorAliasListResponse {
        aliases: aliases.into_iter().map(VendorAliasResponse::from).collect(),
        total,
        page,
        page_size,
        total_pages: total_pages(total, page_size),
    }))
}
