//! Backup endpoints

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use mnemograph_core::BackupFile;

use crate::error::ApiResult;
use crate::extract::UserId;
use crate::state::AppState;

/// POST /backup/export - the body is the backup file itself
pub async fn export(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> ApiResult<Response> {
    let file = state.engine.backups.export(&user_id).await?;
    let filename = format!("mnemograph-backup-{user_id}.json");
    Ok((
        [(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )],
        Json(file),
    )
        .into_response())
}

/// POST /backup/import
pub async fn import(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(file): Json<BackupFile>,
) -> ApiResult<Json<Value>> {
    let report = state.engine.backups.import(&user_id, file).await?;
    Ok(Json(json!({
        "imported": report.imported,
        "failed": report.failed,
        "total": report.total,
    })))
}
