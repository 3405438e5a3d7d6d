use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "kardex.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS periods(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_date TEXT,
            end_date TEXT,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT,
            semester INTEGER,
            description TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS groups(
            id TEXT PRIMARY KEY,
            period_id TEXT NOT NULL,
            group_number INTEGER NOT NULL,
            subject_id TEXT,
            teacher_name TEXT,
            roster_id TEXT,
            general_average REAL NOT NULL DEFAULT 0,
            passed_count INTEGER NOT NULL DEFAULT 0,
            failed_count INTEGER NOT NULL DEFAULT 0,
            dropout_count INTEGER NOT NULL DEFAULT 0,
            passed_percent REAL NOT NULL DEFAULT 0,
            failed_percent REAL NOT NULL DEFAULT 0,
            dropout_percent REAL NOT NULL DEFAULT 0,
            FOREIGN KEY(period_id) REFERENCES periods(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_groups_period ON groups(period_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS units(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            unit_number INTEGER NOT NULL,
            passed_count INTEGER NOT NULL DEFAULT 0,
            failed_count INTEGER NOT NULL DEFAULT 0,
            dropout_count INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(group_id) REFERENCES groups(id),
            UNIQUE(group_id, unit_number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_units_group ON units(group_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id TEXT PRIMARY KEY,
            unit_id TEXT NOT NULL,
            name TEXT NOT NULL,
            weight REAL NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(unit_id) REFERENCES units(id),
            UNIQUE(unit_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_unit ON activities(unit_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rosters(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL UNIQUE,
            final_average REAL NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(group_id) REFERENCES groups(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            roster_id TEXT NOT NULL,
            name TEXT NOT NULL,
            control_number TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            final_average REAL NOT NULL DEFAULT 0,
            FOREIGN KEY(roster_id) REFERENCES rosters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_roster ON students(roster_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_roster_sort ON students(roster_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS unit_grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            unit_number INTEGER NOT NULL,
            unit_average REAL NOT NULL DEFAULT 0,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, unit_number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_unit_grades_student ON unit_grades(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activity_scores(
            id TEXT PRIMARY KEY,
            unit_grade_id TEXT NOT NULL,
            activity_name TEXT NOT NULL,
            score REAL NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(unit_grade_id) REFERENCES unit_grades(id),
            UNIQUE(unit_grade_id, activity_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activity_scores_grade ON activity_scores(unit_grade_id)",
        [],
    )?;

    // Workspaces created before teacher names were tracked lack the column.
    ensure_groups_teacher_name(&conn)?;

    Ok(conn)
}

fn ensure_groups_teacher_name(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "groups", "teacher_name")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE groups ADD COLUMN teacher_name TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
