use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_periods_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn
        .prepare("SELECT id, name, start_date, end_date, active FROM periods ORDER BY name")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let start_date: Option<String> = row.get(2)?;
            let end_date: Option<String> = row.get(3)?;
            let active: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "startDate": start_date,
                "endDate": end_date,
                "active": active != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(periods) => ok(&req.id, json!({ "periods": periods })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_periods_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let start_date = req
        .params
        .get("startDate")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let end_date = req
        .params
        .get("endDate")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let period_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO periods(id, name, start_date, end_date, active) VALUES(?, ?, ?, ?, ?)",
        (&period_id, &name, start_date, end_date, active as i64),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "periods" })),
        );
    }

    ok(&req.id, json!({ "periodId": period_id }))
}

fn handle_periods_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let period_id = match req.params.get("periodId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing periodId", None),
    };

    let in_use: Result<Option<i64>, _> = conn
        .query_row(
            "SELECT 1 FROM groups WHERE period_id = ? LIMIT 1",
            [&period_id],
            |r| r.get(0),
        )
        .optional();
    match in_use {
        Ok(Some(_)) => {
            return err(
                &req.id,
                "in_use",
                "period is referenced by one or more groups",
                None,
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    match conn.execute("DELETE FROM periods WHERE id = ?", [&period_id]) {
        Ok(0) => err(&req.id, "not_found", "period not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn
        .prepare("SELECT id, name, code, semester, description FROM subjects ORDER BY name")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let code: Option<String> = row.get(2)?;
            let semester: Option<i64> = row.get(3)?;
            let description: Option<String> = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "code": code,
                "semester": semester,
                "description": description
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let code = req
        .params
        .get("code")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    let semester = req.params.get("semester").and_then(|v| v.as_i64());
    let description = req
        .params
        .get("description")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, name, code, semester, description) VALUES(?, ?, ?, ?, ?)",
        (&subject_id, &name, code, semester, description),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    ok(&req.id, json!({ "subjectId": subject_id }))
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };

    let in_use: Result<Option<i64>, _> = conn
        .query_row(
            "SELECT 1 FROM groups WHERE subject_id = ? LIMIT 1",
            [&subject_id],
            |r| r.get(0),
        )
        .optional();
    match in_use {
        Ok(Some(_)) => {
            return err(
                &req.id,
                "in_use",
                "subject is referenced by one or more groups",
                None,
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    match conn.execute("DELETE FROM subjects WHERE id = ?", [&subject_id]) {
        Ok(0) => err(&req.id, "not_found", "subject not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "periods.list" => Some(handle_periods_list(state, req)),
        "periods.create" => Some(handle_periods_create(state, req)),
        "periods.delete" => Some(handle_periods_delete(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        _ => None,
    }
}
