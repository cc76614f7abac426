use axum::{extract::State, Json};
use serde_json::json;
use tokio::task::spawn_blocking;

use crate::{
    error::{validation::require_field, AppResult},
    events::{kinds, BroadcastMessage},
    library::mutate::Removed,
    middleware::{ip::ClientIp, validation::sanitize_for_logging},
    state::AppState,
    types::{DeleteRequest, DeleteResponse, RenameRequest, RenameResponse},
};

/// Brings the database in line with entries that were removed from disk.
async fn forget_removed(state: &AppState, removed: &[Removed]) {
    let mut processed_rows = 0u64;
    for item in removed {
        let abs = item.abs_path.to_string_lossy();
        match state.store.delete_processed(&[&*abs, item.input.as_str()]).await {
            Ok(n) => processed_rows += n,
            Err(e) => tracing::warn!("Failed to remove processed rows for {}: {}", sanitize_for_logging(&abs), e),
        }
        if let Err(e) = state.store.remove_recent_media_under(&abs).await {
            tracing::warn!("Failed to remove recent media for {}: {}", sanitize_for_logging(&abs), e);
        }
        if let Err(e) = state.store.remove_folders_under(&item.api_path).await {
            tracing::warn!("Failed to remove folder cache for {}: {}", sanitize_for_logging(&item.api_path), e);
        }
    }
    if removed.is_empty() {
        return;
    }
    state.categories.invalidate().await;
    state.metrics.add_deleted(removed.len() as u64);

    if processed_rows > 0 {
        state.stats.invalidate();
        let paths: Vec<&str> = removed.iter().map(|r| r.api_path.as_str()).collect();
        state.hub.broadcast(&BroadcastMessage::new(kinds::DASHBOARD_STATS_CHANGED, json!({})));
        state.hub.broadcast(&BroadcastMessage::new(
            kinds::FILE_OPERATION_CHANGED,
            json!({ "operation": "delete", "paths": paths }),
        ));
    }
}

/// `POST|DELETE /api/delete` with either `{"path": ..}` or `{"paths": [..]}`.
pub async fn delete(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<DeleteRequest>,
) -> AppResult<Json<DeleteResponse>> {
    state.rate_limiter.check_endpoint_limit("/api/delete", ip).await?;

    if !req.paths.is_empty() {
        let mutator = state.mutator.clone();
        let paths = req.paths.clone();
        let outcome = spawn_blocking(move || mutator.delete_many(&paths)).await?;
        forget_removed(&state, &outcome.removed).await;

        let deleted = outcome.removed.len();
        let failed = outcome.errors.len();
        tracing::info!("Bulk delete from {}: {} removed, {} failed", ip, deleted, failed);
        let error = match (deleted, failed) {
            (_, 0) => None,
            (0, n) => Some(format!("Failed to delete any files. {} errors occurred.", n)),
            (d, n) => Some(format!("Deleted {} files with {} errors.", d, n)),
        };
        return Ok(Json(DeleteResponse {
            success: deleted > 0,
            error,
            deleted_count: Some(deleted),
            errors: (failed > 0).then_some(outcome.errors),
        }));
    }

    let path = req.path.unwrap_or_default();
    require_field(&path, "path")?;
    let mutator = state.mutator.clone();
    let removed = spawn_blocking(move || mutator.delete(&path)).await??;
    tracing::info!("Deleted {} (requested by {})", sanitize_for_logging(&removed.api_path), ip);
    forget_removed(&state, std::slice::from_ref(&removed)).await;

    Ok(Json(DeleteResponse { success: true, error: None, deleted_count: None, errors: None }))
}

pub async fn rename(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<RenameRequest>,
) -> AppResult<Json<RenameResponse>> {
    state.rate_limiter.check_endpoint_limit("/api/rename", ip).await?;
    require_field(&req.old_path, "oldPath")?;
    require_field(&req.new_name, "newName")?;

    let mutator = state.mutator.clone();
    let (old_path, new_name) = (req.old_path.clone(), req.new_name.trim().to_string());
    let renamed = spawn_blocking(move || mutator.rename(&old_path, &new_name)).await??;

    if let Err(e) = state.store.rename_folder_prefix(&renamed.old_api, &renamed.new_api, &renamed.new_name).await {
        tracing::warn!("Failed to rewrite folder cache after rename: {}", e);
    }
    let (old_abs, new_abs) = (renamed.old_abs.to_string_lossy(), renamed.new_abs.to_string_lossy());
    if let Err(e) = state.store.rename_destination_prefix(&old_abs, &new_abs).await {
        tracing::warn!("Failed to rewrite processed files after rename: {}", e);
    }
    state.categories.invalidate().await;
    state.metrics.inc_renames();
    state.hub.broadcast(&BroadcastMessage::new(
        kinds::FILE_OPERATION_CHANGED,
        json!({ "operation": "rename", "oldPath": renamed.old_api, "newPath": renamed.new_api }),
    ));
    tracing::info!(
        "Renamed {} -> {} (requested by {})",
        sanitize_for_logging(&renamed.old_api),
        sanitize_for_logging(&renamed.new_api),
        ip
    );

    Ok(Json(RenameResponse { success: true, new_path: renamed.new_api }))
}
