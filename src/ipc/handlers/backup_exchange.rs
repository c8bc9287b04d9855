use crate::backup;
use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

/// Explicit `workspacePath` wins over the selected workspace.
fn target_workspace(state: &AppState, params: &serde_json::Value) -> Result<PathBuf, HandlerErr> {
    get_optional_str(params, "workspacePath")?
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn io_failed(path: &str, e: anyhow::Error) -> HandlerErr {
    HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": path }))
}

fn reopen_selected(state: &mut AppState) {
    let Some(workspace) = state.workspace.clone() else {
        return;
    };
    match db::open_db(&workspace) {
        Ok(conn) => state.db = Some(conn),
        Err(e) => {
            tracing::error!(workspace = %workspace.display(), "could not reopen workspace after failed import: {e:#}")
        }
    }
}

fn export_bundle(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let out_path = get_required_str(params, "outPath")?;
    let workspace = target_workspace(state, params)?;

    // Fold the WAL into the main file so the copy is complete.
    if let Some(conn) = state.db.as_ref() {
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(FULL)") {
            tracing::debug!("wal checkpoint before export failed: {e}");
        }
    }

    let summary = backup::export_workspace_bundle(&workspace, &PathBuf::from(&out_path)).map_err(|e| {
        tracing::warn!(path = %out_path, "workspace export failed: {e:#}");
        io_failed(&out_path, e)
    })?;
    tracing::info!(path = %out_path, sha256 = %summary.db_sha256, "workspace bundle exported");

    Ok(json!({
        "ok": true,
        "path": out_path,
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "dbSha256": summary.db_sha256,
    }))
}

fn import_bundle(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let in_path = get_required_str(params, "inPath")?;
    let workspace = target_workspace(state, params)?;
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::not_found("bundle file not found").with_details(json!({ "path": in_path })));
    }

    // The connection holds the file open; release it before the swap and put
    // it back if anything goes wrong.
    let replacing_selected = state.workspace.as_deref() == Some(workspace.as_path());
    if replacing_selected {
        state.db = None;
    }

    let imported = backup::import_workspace_bundle(&src, &workspace)
        .map_err(|e| {
            tracing::warn!(path = %in_path, "workspace import failed: {e:#}");
            io_failed(&in_path, e)
        })
        .and_then(|summary| {
            db::open_db(&workspace)
                .map(|conn| (summary, conn))
                .map_err(|e| HandlerErr::new("db_open_failed", e.to_string()))
        });
    let (summary, conn) = match imported {
        Ok(v) => v,
        Err(e) => {
            if replacing_selected {
                reopen_selected(state);
            }
            return Err(e);
        }
    };
    tracing::info!(
        workspace = %workspace.display(),
        format = %summary.bundle_format_detected,
        "workspace bundle imported"
    );
    state.workspace = Some(workspace.clone());
    state.db = Some(conn);

    Ok(json!({
        "ok": true,
        "workspacePath": workspace.to_string_lossy(),
        "bundleFormatDetected": summary.bundle_format_detected,
    }))
}

fn respond(
    state: &mut AppState,
    req: &Request,
    f: fn(&mut AppState, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    match f(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(respond(state, req, export_bundle)),
        "backup.importWorkspaceBundle" => Some(respond(state, req, import_bundle)),
        _ => None,
    }
}
