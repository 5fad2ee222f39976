use crate::dtos::{CreateGroupRequest, GroupResponse};
use crate::middleware::user_id::UserId;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

/// POST /groups
pub async fn create_group(
    State(state): State<AppState>,
    user_id: UserId,
    Json(request): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let group = state
        .db
        .create_group(user_id.0, &request.name, &request.transaction_ids)
        .await?;

    Ok((StatusCode::CREATED, Json(GroupResponse::from(group))))
}

/// DELETE /groups/:id
pub async fn dissolve_group(
    State(state): State<AppState>,
    user_id: UserId,
    Path(group_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.db.dissolve_group(user_id.0, group_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
