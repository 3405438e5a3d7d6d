use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

pub fn group_json(group: &store::Group) -> serde_json::Value {
    json!({
        "id": group.id,
        "periodId": group.period_id,
        "groupNumber": group.group_number,
        "subjectId": group.subject_id,
        "teacherName": group.teacher_name,
        "rosterId": group.roster_id,
        "promedioGeneral": group.general_average,
        "alumnosAprobados": group.passed_count,
        "alumnosReprobados": group.failed_count,
        "alumnosDesertados": group.dropout_count,
        "porcentajeAprobados": group.passed_percent,
        "porcentajeReprobados": group.failed_percent,
        "porcentajeDesertados": group.dropout_percent,
        "unidades": group.units.iter().map(|unit| json!({
            "unidad": unit.number,
            "actividades": unit.activities.iter().map(|a| json!({
                "nombre": a.name,
                "porcentaje": a.weight
            })).collect::<Vec<_>>(),
            "alumnosAprobados": unit.passed_count,
            "alumnosReprobados": unit.failed_count,
            "alumnosDesertados": unit.dropout_count
        })).collect::<Vec<_>>()
    })
}

fn row_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
}

fn handle_groups_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let period_id = match req.params.get("periodId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing periodId", None),
    };
    let group_number = match req.params.get("groupNumber").and_then(|v| v.as_i64()) {
        Some(v) if v > 0 => v,
        _ => return err(&req.id, "bad_params", "missing/invalid groupNumber", None),
    };
    let subject_id = req
        .params
        .get("subjectId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let teacher_name = req
        .params
        .get("teacherName")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());

    match row_exists(conn, "SELECT 1 FROM periods WHERE id = ?", &period_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "period not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    if let Some(sid) = subject_id.as_deref() {
        match row_exists(conn, "SELECT 1 FROM subjects WHERE id = ?", sid) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "subject not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let group_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO groups(id, period_id, group_number, subject_id, teacher_name)
         VALUES(?, ?, ?, ?, ?)",
        (&group_id, &period_id, group_number, subject_id, teacher_name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "groups" })),
        );
    }

    ok(&req.id, json!({ "groupId": group_id }))
}

fn handle_groups_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let period_filter = req
        .params
        .get("periodId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let (sql, bind): (&str, Vec<String>) = match &period_filter {
        Some(pid) => (
            "SELECT id, period_id, group_number, subject_id, teacher_name, general_average
             FROM groups WHERE period_id = ? ORDER BY group_number",
            vec![pid.clone()],
        ),
        None => (
            "SELECT id, period_id, group_number, subject_id, teacher_name, general_average
             FROM groups ORDER BY period_id, group_number",
            Vec::new(),
        ),
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(bind.iter()), |row| {
            let id: String = row.get(0)?;
            let period_id: String = row.get(1)?;
            let group_number: i64 = row.get(2)?;
            let subject_id: Option<String> = row.get(3)?;
            let teacher_name: Option<String> = row.get(4)?;
            let general_average: f64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "periodId": period_id,
                "groupNumber": group_number,
                "subjectId": subject_id,
                "teacherName": teacher_name,
                "promedioGeneral": general_average
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(groups) => ok(&req.id, json!({ "groups": groups })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_groups_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let group_id = match req.params.get("groupId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing groupId", None),
    };

    match store::load_group(conn, &group_id) {
        Ok(group) => ok(&req.id, json!({ "group": group_json(&group) })),
        Err(e) => err(&req.id, e.code, e.message, None),
    }
}

/// Replaces the group's unit/activity structure. Existing grade records are
/// left alone; the caller follows a structural change with roster.initialize,
/// which rebuilds and zeroes them.
fn handle_groups_set_units(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let group_id = match req.params.get("groupId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing groupId", None),
    };
    let Some(units_arr) = req.params.get("units").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing units[]", None);
    };

    match row_exists(conn, "SELECT 1 FROM groups WHERE id = ?", &group_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "group not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // Validate the whole payload before touching the stored structure.
    let mut parsed: Vec<(i64, Vec<(String, f64)>)> = Vec::new();
    let mut seen_units: HashSet<i64> = HashSet::new();
    for (i, unit) in units_arr.iter().enumerate() {
        let Some(obj) = unit.as_object() else {
            return err(
                &req.id,
                "bad_params",
                format!("units[{}] must be an object", i),
                None,
            );
        };
        let number = match obj.get("unidad").and_then(|v| v.as_i64()) {
            Some(v) if v >= 1 => v,
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("units[{}].unidad must be an integer >= 1", i),
                    None,
                )
            }
        };
        if !seen_units.insert(number) {
            return err(
                &req.id,
                "bad_params",
                format!("duplicate unit number {}", number),
                None,
            );
        }
        let Some(acts) = obj.get("actividades").and_then(|v| v.as_array()) else {
            return err(
                &req.id,
                "bad_params",
                format!("units[{}].actividades must be an array", i),
                None,
            );
        };
        let mut activities: Vec<(String, f64)> = Vec::new();
        let mut seen_names: HashSet<String> = HashSet::new();
        for (j, act) in acts.iter().enumerate() {
            let name = match act.get("nombre").and_then(|v| v.as_str()) {
                Some(s) if !s.trim().is_empty() => s.trim().to_string(),
                _ => {
                    return err(
                        &req.id,
                        "bad_params",
                        format!("units[{}].actividades[{}].nombre must be a non-empty string", i, j),
                        None,
                    )
                }
            };
            let weight = match act.get("porcentaje").and_then(|v| v.as_f64()) {
                Some(w) if w >= 0.0 => w,
                _ => {
                    return err(
                        &req.id,
                        "bad_params",
                        format!("units[{}].actividades[{}].porcentaje must be a number >= 0", i, j),
                        None,
                    )
                }
            };
            if !seen_names.insert(name.clone()) {
                return err(
                    &req.id,
                    "bad_params",
                    format!("duplicate activity name '{}' in unit {}", name, number),
                    None,
                );
            }
            activities.push((name, weight));
        }
        parsed.push((number, activities));
    }

    if let Err(e) = conn.execute(
        "DELETE FROM activities WHERE unit_id IN (SELECT id FROM units WHERE group_id = ?)",
        [&group_id],
    ) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = conn.execute("DELETE FROM units WHERE group_id = ?", [&group_id]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    for (number, activities) in &parsed {
        let unit_id = Uuid::new_v4().to_string();
        if let Err(e) = conn.execute(
            "INSERT INTO units(id, group_id, unit_number) VALUES(?, ?, ?)",
            (&unit_id, &group_id, number),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "units" })),
            );
        }
        for (j, (name, weight)) in activities.iter().enumerate() {
            if let Err(e) = conn.execute(
                "INSERT INTO activities(id, unit_id, name, weight, sort_order)
                 VALUES(?, ?, ?, ?, ?)",
                (Uuid::new_v4().to_string(), &unit_id, name, weight, j as i64),
            ) {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "activities" })),
                );
            }
        }
    }

    ok(&req.id, json!({ "units": parsed.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "groups.create" => Some(handle_groups_create(state, req)),
        "groups.list" => Some(handle_groups_list(state, req)),
        "groups.get" => Some(handle_groups_get(state, req)),
        "groups.setUnits" => Some(handle_groups_set_units(state, req)),
        _ => None,
    }
}
