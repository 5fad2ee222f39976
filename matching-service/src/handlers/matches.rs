use crate::dtos::matches::{total_pages, ListParams};
use crate::dtos::{
    AutoMatchRequest, AutoMatchResponse, BatchApproveRequest, BatchApproveResponse, ConfirmRequest,
    ManualMatchRequest, MatchListResponse, MatchResponse, StatsResponse,
};
use crate::middleware::user_id::UserId;
use crate::models::MatchTarget;
use crate::services::database::VendorHints;
use crate::services::matching;
use crate::services::metrics::record_match_operation;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

fn hints_from_confirm(body: Option<ConfirmRequest>) -> VendorHints {
    let body = body.unwrap_or_default();
    VendorHints {
        display_name: body.vendor_display_name,
        gl_code: body.default_gl_code,
        department: body.default_department,
    }
}

/// GET /matches/proposals
pub async fn list_proposals(
    State(state): State<AppState>,
    user_id: UserId,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = params.page();
    let page_size = params.page_size();
    let (proposals, total) = state.db.list_proposals(user_id.0, page, page_size).await?;

    Ok(Json(MatchListResponse {
        matches: proposals.into_iter().map(MatchResponse::from).collect(),
        total,
        page,
        page_size,
        total_pages: total_pages(total, page_size),
    }))
}

/// GET /matches/:id
pub async fn get_match(
    State(state): State<AppState>,
    user_id: UserId,
    Path(match_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let m = state
        .db
        .get_match(user_id.0, match_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Match not found")))?;
    Ok(Json(MatchResponse::from(m)))
}

/// POST /matches/auto-run
pub async fn run_auto_match(
    State(state): State<AppState>,
    user_id: UserId,
    body: Option<Json<AutoMatchRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let cancel = state.shutdown.child_token();

    let report = matching::run_auto_match(
        &state.db,
        &state.config.scoring,
        user_id.0,
        request.receipt_ids.as_deref(),
        &cancel,
    )
    .await?;

    Ok(Json(AutoMatchResponse::from(report)))
}

/// POST /matches/manual
pub async fn manual_match(
    State(state): State<AppState>,
    user_id: UserId,
    Json(request): Json<ManualMatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    let target = MatchTarget::from_columns(request.transaction_id, request.group_id)?;

    let hints = VendorHints {
        display_name: request.vendor_display_name.clone(),
        gl_code: request.default_gl_code.clone(),
        department: request.default_department.clone(),
    };

    let m = matching::manual_match(
        &state.db,
        &state.config.scoring,
        user_id.0,
        request.receipt_id,
        target,
        request.confirm.unwrap_or(true),
        &hints,
    )
    .await?;

    Ok(Json(MatchResponse::from(m)))
}

/// POST /matches/:id/confirm
pub async fn confirm_match(
    State(state): State<AppState>,
    user_id: UserId,
    Path(match_id): Path<Uuid>,
    body: Option<Json<ConfirmRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let hints = hints_from_confirm(body.map(|Json(b)| b));
    let m = state.db.confirm_match(user_id.0, match_id, &hints).await?;
    record_match_operation("confirm", &m.status);
    Ok(Json(MatchResponse::from(m)))
}

/// POST /matches/:id/reject
pub async fn reject_match(
    State(state): State<AppState>,
    user_id: UserId,
    Path(match_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let m = state.db.reject_match(user_id.0, match_id).await?;
    record_match_operation("reject", &m.status);
    Ok(Json(MatchResponse::from(m)))
}

/// POST /matches/:id/unmatch
pub async fn unmatch_match(
    State(state): State<AppState>,
    user_id: UserId,
    Path(match_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let m = state.db.unmatch_match(user_id.0, match_id).await?;
    record_match_operation("unmatch", &m.status);
    Ok(Json(MatchResponse::from(m)))
}

/// POST /matches/batch-approve
pub async fn batch_approve(
    State(state): State<AppState>,
    user_id: UserId,
    Json(request): Json<BatchApproveRequest>,
) -> Result<impl IntoResponse, AppError> {
    // Exactly one selector: a confidence floor or an explicit id list.
    match (&request.min_confidence, &request.match_ids) {
        (Some(_), Some(_)) => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Provide either min_confidence or match_ids, not both"
            )));
        }
        (None, None) => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Provide min_confidence or match_ids"
            )));
        }
        _ => {}
    }
    if let Some(c) = request.min_confidence {
        if !(0.0..=1.0).contains(&c) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "min_confidence must be within [0, 1]"
            )));
        }
    }

    let report = matching::batch_approve(
        &state.db,
        user_id.0,
        request.min_confidence,
        request.match_ids.as_deref(),
    )
    .await?;

    Ok(Json(BatchApproveResponse::from(report)))
}

/// GET /matches/stats
pub async fn matching_stats(
    State(state): State<AppState>,
    user_id: UserId,
) -> Result<impl IntoResponse, AppError> {
    let stats = state.db.matching_stats(user_id.0).await?;
    Ok(Json(StatsResponse::from(stats)))
}
