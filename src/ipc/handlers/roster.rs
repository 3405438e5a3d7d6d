use crate::ipc::error::{err, ok};
use crate::ipc::handlers::groups::group_json;
use crate::ipc::types::{AppState, Request};
use crate::store;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

pub fn roster_json(roster: &store::Roster) -> serde_json::Value {
    json!({
        "id": roster.id,
        "groupId": roster.group_id,
        "promedioFinal": roster.final_average,
        "alumnos": roster.students.iter().map(|student| json!({
            "id": student.id,
            "nombre": student.name,
            "numeroControl": student.control_number,
            "promedioFinal": student.final_average,
            "calificaciones": student.grades.iter().map(|grade| json!({
                "unidad": grade.unit_number,
                "promedioUnidad": grade.unit_average,
                "actividades": grade.scores.iter().map(|s| json!({
                    "nombreActividad": s.activity_name,
                    "calificacionActividad": s.score
                })).collect::<Vec<_>>()
            })).collect::<Vec<_>>()
        })).collect::<Vec<_>>()
    })
}

/// Replaces the group's student list. The grade skeleton is not built here;
/// callers follow up with roster.initialize, matching the import-then-reset
/// flow.
fn handle_roster_set_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let group_id = match req.params.get("groupId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing groupId", None),
    };
    let Some(students_arr) = req.params.get("alumnos").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing alumnos[]", None);
    };

    let mut parsed: Vec<(String, String)> = Vec::new();
    for (i, entry) in students_arr.iter().enumerate() {
        let name = match entry.get("nombre").and_then(|v| v.as_str()) {
            Some(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("alumnos[{}].nombre must be a non-empty string", i),
                    None,
                )
            }
        };
        let control = match entry.get("numeroControl").and_then(|v| v.as_str()) {
            Some(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("alumnos[{}].numeroControl must be a non-empty string", i),
                    None,
                )
            }
        };
        parsed.push((name, control));
    }

    let group = match store::load_group(conn, &group_id) {
        Ok(g) => g,
        Err(e) => return err(&req.id, e.code, e.message, None),
    };

    let roster_id = match &group.roster_id {
        Some(id) => id.clone(),
        None => {
            let roster_id = Uuid::new_v4().to_string();
            if let Err(e) = conn.execute(
                "INSERT INTO rosters(id, group_id, updated_at) VALUES(?, ?, ?)",
                (&roster_id, &group_id, Utc::now().to_rfc3339()),
            ) {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "rosters" })),
                );
            }
            if let Err(e) = conn.execute(
                "UPDATE groups SET roster_id = ? WHERE id = ?",
                (&roster_id, &group_id),
            ) {
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
            roster_id
        }
    };

    // Replace wholesale: scores, grade records, then students.
    if let Err(e) = conn.execute(
        "DELETE FROM activity_scores WHERE unit_grade_id IN
           (SELECT ug.id FROM unit_grades ug
              JOIN students s ON s.id = ug.student_id
            WHERE s.roster_id = ?)",
        [&roster_id],
    ) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = conn.execute(
        "DELETE FROM unit_grades WHERE student_id IN
           (SELECT id FROM students WHERE roster_id = ?)",
        [&roster_id],
    ) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = conn.execute("DELETE FROM students WHERE roster_id = ?", [&roster_id]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    for (i, (name, control)) in parsed.iter().enumerate() {
        if let Err(e) = conn.execute(
            "INSERT INTO students(id, roster_id, name, control_number, sort_order)
             VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &roster_id,
                name,
                control,
                i as i64,
            ),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            );
        }
    }

    if let Err(e) = conn.execute(
        "UPDATE rosters SET final_average = 0, updated_at = ? WHERE id = ?",
        (Utc::now().to_rfc3339(), &roster_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "rosterId": roster_id, "students": parsed.len() }),
    )
}

fn handle_roster_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let group_id = match req.params.get("groupId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing groupId", None),
    };

    let group = match store::load_group(conn, &group_id) {
        Ok(g) => g,
        Err(e) => return err(&req.id, e.code, e.message, None),
    };
    match store::load_roster(conn, &group) {
        Ok(roster) => ok(&req.id, json!({ "roster": roster_json(&roster) })),
        Err(e) => err(&req.id, e.code, e.message, None),
    }
}

/// Roster Initializer: rebuilds every student's grade records from the
/// group's current unit structure with all scores zeroed. Runs after any
/// structural change. Finals are left as they were.
fn handle_roster_initialize(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let group_id = match req.params.get("groupId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing groupId", None),
    };

    let group = match store::load_group(conn, &group_id) {
        Ok(g) => g,
        Err(e) => return err(&req.id, e.code, e.message, None),
    };
    let roster = match store::load_roster(conn, &group) {
        Ok(r) => r,
        Err(e) => return err(&req.id, e.code, e.message, None),
    };

    if let Err(e) = store::reset_roster_grades(conn, &group, &roster) {
        return err(&req.id, e.code, e.message, None);
    }

    let refreshed = match store::load_roster(conn, &group) {
        Ok(r) => r,
        Err(e) => return err(&req.id, e.code, e.message, None),
    };

    ok(
        &req.id,
        json!({
            "group": group_json(&group),
            "roster": roster_json(&refreshed)
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.setStudents" => Some(handle_roster_set_students(state, req)),
        "roster.get" => Some(handle_roster_get(state, req)),
        "roster.initialize" => Some(handle_roster_initialize(state, req)),
        _ => None,
    }
}
