use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store;

/// Statistics Aggregator: classifies every student per unit and per final
/// average, persists the counters onto the group and its units, and returns
/// the summary. Unit counters are written by unit number, so the stored unit
/// order can never misalign the write-back.
fn handle_statistics_compute(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let stats = calc::compute_group_statistics(&group, &roster);

    for unit_stats in &stats.units {
        if let Err(e) = store::save_unit_counts(
            conn,
            &group.id,
            unit_stats.unidad,
            unit_stats.counts.aprobados,
            unit_stats.counts.reprobados,
            unit_stats.counts.desertores,
        ) {
            return err(&req.id, "compute_failed", e.message, None);
        }
    }

    if let Err(e) = store::save_group_aggregates(
        conn,
        &group.id,
        stats.final_average_group,
        stats.finals.aprobados,
        stats.finals.reprobados,
        stats.finals.desertores,
        calc::percent_value(stats.finals.aprobados, stats.students_total),
        calc::percent_value(stats.finals.reprobados, stats.students_total),
        calc::percent_value(stats.finals.desertores, stats.students_total),
    ) {
        return err(&req.id, "compute_failed", e.message, None);
    }

    match serde_json::to_value(&stats) {
        Ok(result) => ok(&req.id, result),
        Err(e) => err(&req.id, "compute_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "statistics.compute" => Some(handle_statistics_compute(state, req)),
        _ => None,
    }
}
