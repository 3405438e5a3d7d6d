use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

/// Store-boundary failure with an IPC-ready code. `not_found` is the only
/// code callers branch on; everything else surfaces as-is.
#[derive(Debug, Clone)]
pub struct StoreError {
    pub code: &'static str,
    pub message: String,
}

impl StoreError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            code: "not_found",
            message: message.into(),
        }
    }

    fn db(e: rusqlite::Error) -> Self {
        Self {
            code: "db_query_failed",
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActivityDef {
    pub name: String,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct Unit {
    pub id: String,
    pub number: i64,
    pub activities: Vec<ActivityDef>,
    pub passed_count: i64,
    pub failed_count: i64,
    pub dropout_count: i64,
}

#[derive(Debug, Clone)]
pub struct Group {
    pub id: String,
    pub period_id: String,
    pub group_number: i64,
    pub subject_id: Option<String>,
    pub teacher_name: Option<String>,
    pub roster_id: Option<String>,
    pub units: Vec<Unit>,
    pub general_average: f64,
    pub passed_count: i64,
    pub failed_count: i64,
    pub dropout_count: i64,
    pub passed_percent: f64,
    pub failed_percent: f64,
    pub dropout_percent: f64,
}

#[derive(Debug, Clone)]
pub struct ActivityScore {
    pub id: String,
    pub activity_name: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct UnitGrade {
    pub id: String,
    pub unit_number: i64,
    pub unit_average: f64,
    pub scores: Vec<ActivityScore>,
}

#[derive(Debug, Clone)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub control_number: String,
    pub sort_order: i64,
    pub final_average: f64,
    pub grades: Vec<UnitGrade>,
}

#[derive(Debug, Clone)]
pub struct Roster {
    pub id: String,
    pub group_id: String,
    pub final_average: f64,
    pub students: Vec<Student>,
}

pub fn load_group(conn: &Connection, group_id: &str) -> Result<Group, StoreError> {
    let row = conn
        .query_row(
            "SELECT period_id, group_number, subject_id, teacher_name, roster_id,
                    general_average, passed_count, failed_count, dropout_count,
                    passed_percent, failed_percent, dropout_percent
             FROM groups WHERE id = ?",
            [group_id],
            |r| {
                Ok(Group {
                    id: group_id.to_string(),
                    period_id: r.get(0)?,
                    group_number: r.get(1)?,
                    subject_id: r.get(2)?,
                    teacher_name: r.get(3)?,
                    roster_id: r.get(4)?,
                    units: Vec::new(),
                    general_average: r.get(5)?,
                    passed_count: r.get(6)?,
                    failed_count: r.get(7)?,
                    dropout_count: r.get(8)?,
                    passed_percent: r.get(9)?,
                    failed_percent: r.get(10)?,
                    dropout_percent: r.get(11)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::db)?;
    let Some(mut group) = row else {
        return Err(StoreError::not_found("group not found"));
    };

    let mut units_stmt = conn
        .prepare(
            "SELECT id, unit_number, passed_count, failed_count, dropout_count
             FROM units WHERE group_id = ? ORDER BY unit_number",
        )
        .map_err(StoreError::db)?;
    let mut units: Vec<Unit> = units_stmt
        .query_map([group_id], |r| {
            Ok(Unit {
                id: r.get(0)?,
                number: r.get(1)?,
                activities: Vec::new(),
                passed_count: r.get(2)?,
                failed_count: r.get(3)?,
                dropout_count: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::db)?;

    let mut acts_stmt = conn
        .prepare("SELECT name, weight FROM activities WHERE unit_id = ? ORDER BY sort_order")
        .map_err(StoreError::db)?;
    for unit in &mut units {
        unit.activities = acts_stmt
            .query_map([&unit.id], |r| {
                Ok(ActivityDef {
                    name: r.get(0)?,
                    weight: r.get(1)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(StoreError::db)?;
    }

    group.units = units;
    Ok(group)
}

/// Loads the roster document the group points at, students in roster order,
/// grade records in unit order, scores in definition order.
pub fn load_roster(conn: &Connection, group: &Group) -> Result<Roster, StoreError> {
    let Some(roster_id) = group.roster_id.as_deref() else {
        return Err(StoreError::not_found("group has no roster"));
    };

    let row = conn
        .query_row(
            "SELECT group_id, final_average FROM rosters WHERE id = ?",
            [roster_id],
            |r| {
                Ok(Roster {
                    id: roster_id.to_string(),
                    group_id: r.get(0)?,
                    final_average: r.get(1)?,
                    students: Vec::new(),
                })
            },
        )
        .optional()
        .map_err(StoreError::db)?;
    let Some(mut roster) = row else {
        return Err(StoreError::not_found("roster not found"));
    };

    let mut students_stmt = conn
        .prepare(
            "SELECT id, name, control_number, sort_order, final_average
             FROM students WHERE roster_id = ? ORDER BY sort_order",
        )
        .map_err(StoreError::db)?;
    let mut students: Vec<Student> = students_stmt
        .query_map([roster_id], |r| {
            Ok(Student {
                id: r.get(0)?,
                name: r.get(1)?,
                control_number: r.get(2)?,
                sort_order: r.get(3)?,
                final_average: r.get(4)?,
                grades: Vec::new(),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::db)?;

    let mut grades_stmt = conn
        .prepare(
            "SELECT id, unit_number, unit_average
             FROM unit_grades WHERE student_id = ? ORDER BY unit_number",
        )
        .map_err(StoreError::db)?;
    let mut scores_stmt = conn
        .prepare(
            "SELECT id, activity_name, score
             FROM activity_scores WHERE unit_grade_id = ? ORDER BY sort_order",
        )
        .map_err(StoreError::db)?;

    for student in &mut students {
        let mut grades: Vec<UnitGrade> = grades_stmt
            .query_map([&student.id], |r| {
                Ok(UnitGrade {
                    id: r.get(0)?,
                    unit_number: r.get(1)?,
                    unit_average: r.get(2)?,
                    scores: Vec::new(),
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(StoreError::db)?;
        for grade in &mut grades {
            grade.scores = scores_stmt
                .query_map([&grade.id], |r| {
                    Ok(ActivityScore {
                        id: r.get(0)?,
                        activity_name: r.get(1)?,
                        score: r.get(2)?,
                    })
                })
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(StoreError::db)?;
        }
        student.grades = grades;
    }

    roster.students = students;
    Ok(roster)
}

/// Writes the mutable parts of a roster document back: activity scores,
/// unit averages, student finals, and the roster-level average. One call
/// per external request, so each stage persists exactly once.
pub fn save_roster_grades(conn: &Connection, roster: &Roster) -> Result<(), StoreError> {
    for student in &roster.students {
        for grade in &student.grades {
            for score in &grade.scores {
                conn.execute(
                    "UPDATE activity_scores SET score = ? WHERE id = ?",
                    (score.score, &score.id),
                )
                .map_err(StoreError::db)?;
            }
            conn.execute(
                "UPDATE unit_grades SET unit_average = ? WHERE id = ?",
                (grade.unit_average, &grade.id),
            )
            .map_err(StoreError::db)?;
        }
        conn.execute(
            "UPDATE students SET final_average = ? WHERE id = ?",
            (student.final_average, &student.id),
        )
        .map_err(StoreError::db)?;
    }
    conn.execute(
        "UPDATE rosters SET final_average = ?, updated_at = ? WHERE id = ?",
        (roster.final_average, Utc::now().to_rfc3339(), &roster.id),
    )
    .map_err(StoreError::db)?;
    Ok(())
}

/// Roster Initializer persistence: drops every student's grade records and
/// rebuilds the zeroed skeleton from the group's current unit structure.
/// Student identity and final averages stay untouched.
pub fn reset_roster_grades(
    conn: &Connection,
    group: &Group,
    roster: &Roster,
) -> Result<(), StoreError> {
    for student in &roster.students {
        conn.execute(
            "DELETE FROM activity_scores WHERE unit_grade_id IN
               (SELECT id FROM unit_grades WHERE student_id = ?)",
            [&student.id],
        )
        .map_err(StoreError::db)?;
        conn.execute(
            "DELETE FROM unit_grades WHERE student_id = ?",
            [&student.id],
        )
        .map_err(StoreError::db)?;

        for unit in &group.units {
            let grade_id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO unit_grades(id, student_id, unit_number, unit_average)
                 VALUES(?, ?, ?, 0)",
                (&grade_id, &student.id, unit.number),
            )
            .map_err(StoreError::db)?;
            for (i, activity) in unit.activities.iter().enumerate() {
                conn.execute(
                    "INSERT INTO activity_scores(id, unit_grade_id, activity_name, score, sort_order)
                     VALUES(?, ?, ?, 0, ?)",
                    (
                        Uuid::new_v4().to_string(),
                        &grade_id,
                        &activity.name,
                        i as i64,
                    ),
                )
                .map_err(StoreError::db)?;
            }
        }
    }

    conn.execute(
        "UPDATE rosters SET updated_at = ? WHERE id = ?",
        (Utc::now().to_rfc3339(), &roster.id),
    )
    .map_err(StoreError::db)?;
    Ok(())
}

/// Unit counters are matched by the stored unit number, never by list
/// position, so reordered or sparse unit lists cannot misalign.
pub fn save_unit_counts(
    conn: &Connection,
    group_id: &str,
    unit_number: i64,
    passed: i64,
    failed: i64,
    dropouts: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE units SET passed_count = ?, failed_count = ?, dropout_count = ?
         WHERE group_id = ? AND unit_number = ?",
        (passed, failed, dropouts, group_id, unit_number),
    )
    .map_err(StoreError::db)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn save_group_aggregates(
    conn: &Connection,
    group_id: &str,
    general_average: f64,
    passed: i64,
    failed: i64,
    dropouts: i64,
    passed_percent: f64,
    failed_percent: f64,
    dropout_percent: f64,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE groups SET general_average = ?, passed_count = ?, failed_count = ?,
             dropout_count = ?, passed_percent = ?, failed_percent = ?, dropout_percent = ?
         WHERE id = ?",
        (
            general_average,
            passed,
            failed,
            dropouts,
            passed_percent,
            failed_percent,
            dropout_percent,
            group_id,
        ),
    )
    .map_err(StoreError::db)?;
    Ok(())
}
