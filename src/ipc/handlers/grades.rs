use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::Connection;
use serde_json::json;

fn recompute_and_save(
    conn: &Connection,
    group: &store::Group,
    roster: &mut store::Roster,
) -> Result<(), store::StoreError> {
    calc::recompute_roster(group, roster);
    store::save_roster_grades(conn, roster)
}

fn edit_result(
    student_id: &str,
    unit: Option<i64>,
    activity: Option<&str>,
    status: &str,
    reason: Option<&str>,
) -> serde_json::Value {
    let mut v = json!({
        "studentId": student_id,
        "unidad": unit,
        "nombreActividad": activity,
        "status": status,
    });
    if let Some(r) = reason {
        v["reason"] = json!(r);
    }
    v
}

/// Grade Updater: best-effort merge of score edits into the roster. Unknown
/// student/unit/activity references are skipped, never errors; every activity
/// edit gets an explicit applied/skipped entry so the caller can see what the
/// leniency swallowed. Persists the roster once, then recomputes averages.
fn handle_grades_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let group_id = match req.params.get("groupId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing groupId", None),
    };
    let Some(edits_arr) = req.params.get("alumnos").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing alumnos[]", None);
    };

    let group = match store::load_group(conn, &group_id) {
        Ok(g) => g,
        Err(e) => return err(&req.id, e.code, e.message, None),
    };
    let mut roster = match store::load_roster(conn, &group) {
        Ok(r) => r,
        Err(e) => return err(&req.id, e.code, e.message, None),
    };

    let mut results: Vec<serde_json::Value> = Vec::new();
    let mut applied: usize = 0;
    let mut skipped: usize = 0;

    for entry in edits_arr {
        let student_id = entry
            .get("studentId")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let unit_edits = entry
            .get("calificaciones")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        if student_id.is_empty() || unit_edits.is_empty() {
            skipped += 1;
            results.push(edit_result(student_id, None, None, "skipped", Some("malformed_edit")));
            continue;
        }

        let student_index = roster.students.iter().position(|s| s.id == student_id);

        for unit_edit in &unit_edits {
            let unit_number = unit_edit.get("unidad").and_then(|v| v.as_i64());
            let activity_edits = unit_edit
                .get("actividades")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            for activity_edit in &activity_edits {
                let name = activity_edit
                    .get("nombreActividad")
                    .and_then(|v| v.as_str());
                let value = activity_edit
                    .get("calificacionActividad")
                    .and_then(|v| v.as_f64());

                let (Some(unit_number), Some(name), Some(value)) = (unit_number, name, value)
                else {
                    skipped += 1;
                    results.push(edit_result(
                        student_id,
                        unit_number,
                        name,
                        "skipped",
                        Some("malformed_edit"),
                    ));
                    continue;
                };

                let Some(si) = student_index else {
                    skipped += 1;
                    results.push(edit_result(
                        student_id,
                        Some(unit_number),
                        Some(name),
                        "skipped",
                        Some("student_not_found"),
                    ));
                    continue;
                };

                let student = &mut roster.students[si];
                let Some(grade) = student
                    .grades
                    .iter_mut()
                    .find(|g| g.unit_number == unit_number)
                else {
                    skipped += 1;
                    results.push(edit_result(
                        student_id,
                        Some(unit_number),
                        Some(name),
                        "skipped",
                        Some("unit_not_found"),
                    ));
                    continue;
                };

                // Exact, case-sensitive name match against the stored score.
                let Some(score) = grade
                    .scores
                    .iter_mut()
                    .find(|s| s.activity_name == name)
                else {
                    skipped += 1;
                    results.push(edit_result(
                        student_id,
                        Some(unit_number),
                        Some(name),
                        "skipped",
                        Some("activity_not_found"),
                    ));
                    continue;
                };

                score.score = value;
                applied += 1;
                results.push(edit_result(
                    student_id,
                    Some(unit_number),
                    Some(name),
                    "applied",
                    None,
                ));
            }
        }
    }

    if let Err(e) = store::save_roster_grades(conn, &roster) {
        return err(&req.id, e.code, e.message, None);
    }
    if let Err(e) = recompute_and_save(conn, &group, &mut roster) {
        return err(&req.id, "compute_failed", e.message, None);
    }

    ok(
        &req.id,
        json!({
            "applied": applied,
            "skipped": skipped,
            "results": results
        }),
    )
}

/// Averaging Engine trigger: recomputes unit, final, and roster averages
/// from current scores. Safe to re-run; unchanged scores reproduce the same
/// numbers.
fn handle_averages_recompute(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let mut roster = match store::load_roster(conn, &group) {
        Ok(r) => r,
        Err(e) => return err(&req.id, e.code, e.message, None),
    };

    if let Err(e) = recompute_and_save(conn, &group, &mut roster) {
        return err(&req.id, "compute_failed", e.message, None);
    }

    ok(
        &req.id,
        json!({
            "message": "averages recalculated",
            "promedioFinalGrupo": roster.final_average
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.update" => Some(handle_grades_update(state, req)),
        "averages.recompute" => Some(handle_averages_recompute(state, req)),
        _ => None,
    }
}
