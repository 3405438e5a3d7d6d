use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => return err(&req.id, "bad_params", "missing outPath", None),
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "dbSha256": summary.db_sha256,
                "outPath": out_path.to_string_lossy()
            }),
        ),
        Err(e) => err(&req.id, "backup_export_failed", format!("{e:#}"), None),
    }
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => return err(&req.id, "bad_params", "missing inPath", None),
    };

    // The open connection holds the database file; release it before the
    // bundle replaces it.
    state.db = None;

    let import = backup::import_workspace_bundle(&in_path, &workspace);
    let reopen = db::open_db(&workspace);

    match (import, reopen) {
        (Ok(summary), Ok(conn)) => {
            state.db = Some(conn);
            ok(
                &req.id,
                json!({ "bundleFormatDetected": summary.bundle_format_detected }),
            )
        }
        (Err(e), Ok(conn)) => {
            state.db = Some(conn);
            err(&req.id, "backup_import_failed", format!("{e:#}"), None)
        }
        (_, Err(e)) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}
