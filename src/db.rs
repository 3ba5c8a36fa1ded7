use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "katrol.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            active INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            nisn TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            class_id TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_name ON students(class_id, name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS nilai(
            id TEXT PRIMARY KEY,
            nisn TEXT NOT NULL,
            class_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            semester INTEGER NOT NULL,
            academic_year TEXT NOT NULL,
            assessment_type TEXT NOT NULL,
            score REAL,
            updated_at TEXT,
            FOREIGN KEY(nisn) REFERENCES students(nisn),
            UNIQUE(nisn, class_id, subject, semester, academic_year, assessment_type)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_nilai_scope
         ON nilai(class_id, subject, semester, academic_year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_nilai_student ON nilai(nisn)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS nilai_settings(
            class_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            kkm INTEGER NOT NULL,
            max_curved INTEGER NOT NULL DEFAULT 100,
            updated_at TEXT,
            PRIMARY KEY(class_id, subject)
        )",
        [],
    )?;
    // Existing workspaces may predate the configurable curve ceiling.
    ensure_settings_max_curved(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS nilai_katrol(
            id TEXT PRIMARY KEY,
            nisn TEXT NOT NULL,
            student_name TEXT NOT NULL,
            class_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            semester INTEGER NOT NULL,
            academic_year TEXT NOT NULL,
            raw_scores TEXT NOT NULL,
            curved_scores TEXT NOT NULL,
            periodic_mean_raw REAL,
            periodic_mean_curved REAL,
            final_raw REAL,
            final_curved REAL,
            status TEXT NOT NULL,
            min_raw REAL,
            max_raw REAL,
            kkm INTEGER NOT NULL,
            max_curved INTEGER NOT NULL,
            processed_at TEXT,
            FOREIGN KEY(nisn) REFERENCES students(nisn),
            UNIQUE(nisn, class_id, subject, semester, academic_year)
        )",
        [],
    )?;
    ensure_katrol_settings_snapshot(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_nilai_katrol_scope
         ON nilai_katrol(class_id, subject, semester, academic_year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_nilai_katrol_student ON nilai_katrol(nisn)",
        [],
    )?;

    Ok(conn)
}

fn ensure_settings_max_curved(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "nilai_settings", "max_curved")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE nilai_settings ADD COLUMN max_curved INTEGER NOT NULL DEFAULT 100",
        [],
    )?;
    Ok(())
}

// The settings snapshot columns landed after the first workspaces shipped.
// Backfill from the scope's current settings where a row exists.
fn ensure_katrol_settings_snapshot(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "nilai_katrol", "kkm")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE nilai_katrol ADD COLUMN kkm INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    conn.execute(
        "ALTER TABLE nilai_katrol ADD COLUMN max_curved INTEGER NOT NULL DEFAULT 100",
        [],
    )?;
    conn.execute(
        "UPDATE nilai_katrol SET
           kkm = COALESCE((SELECT s.kkm FROM nilai_settings s
                           WHERE s.class_id = nilai_katrol.class_id
                             AND s.subject = nilai_katrol.subject), 0),
           max_curved = COALESCE((SELECT s.max_curved FROM nilai_settings s
                                  WHERE s.class_id = nilai_katrol.class_id
                                    AND s.subject = nilai_katrol.subject), 100)",
        [],
    )?;
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
