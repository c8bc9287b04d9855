use crate::attendance::{AttendanceRecord, MonthKey};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "school.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_no TEXT NOT NULL UNIQUE,
            student_name TEXT NOT NULL,
            student_type TEXT NOT NULL DEFAULT 'student',
            grade TEXT NOT NULL,
            section TEXT NOT NULL,
            adviser TEXT,
            contact_number TEXT,
            email TEXT,
            address TEXT,
            birth_date TEXT,
            qr_payload TEXT,
            status TEXT NOT NULL DEFAULT 'ACTIVE',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_grade_section ON students(grade, section)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_status ON students(status)",
        [],
    )?;

    // One row per (student, month, day, period); re-marking updates in place.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            month_year TEXT NOT NULL,
            day INTEGER NOT NULL,
            period TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, month_year, day, period)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_month ON attendance(month_year, day)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student_month ON attendance(student_id, month_year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payment_methods(
            id TEXT PRIMARY KEY,
            method_code TEXT NOT NULL UNIQUE,
            method_name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1,
            has_qr INTEGER NOT NULL DEFAULT 0,
            qr_code_data BLOB,
            qr_code_mimetype TEXT,
            qr_code_filename TEXT,
            qr_code_sha256 TEXT,
            account_number TEXT NOT NULL DEFAULT '',
            account_name TEXT NOT NULL DEFAULT '',
            instructions TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            payment_method_id TEXT,
            amount REAL NOT NULL,
            description TEXT NOT NULL,
            due_date TEXT,
            status TEXT NOT NULL,
            reference_number TEXT,
            paid_date TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(payment_method_id) REFERENCES payment_methods(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student ON payments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_status ON payments(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_method ON payments(payment_method_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS admins(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            permissions TEXT NOT NULL DEFAULT '[]',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Attendance rows for one month, optionally restricted to a student set, in
/// (student, day, period) order. Rows that fail validation are an error rather
/// than silently skipped.
pub fn attendance_records_for_month(
    conn: &Connection,
    month: MonthKey,
    student_ids: Option<&[String]>,
) -> anyhow::Result<Vec<AttendanceRecord>> {
    let month_key = month.to_string();
    let mut stmt = conn.prepare(
        "SELECT student_id, day, period, status
         FROM attendance
         WHERE month_year = ?
         ORDER BY student_id, day, period",
    )?;
    let rows = stmt
        .query_map([&month_key], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let filter: Option<std::collections::HashSet<&str>> =
        student_ids.map(|ids| ids.iter().map(|s| s.as_str()).collect());

    let mut out = Vec::with_capacity(rows.len());
    for (student_id, day, period, status) in rows {
        if let Some(f) = filter.as_ref() {
            if !f.contains(student_id.as_str()) {
                continue;
            }
        }
        let rec = AttendanceRecord::parse(&student_id, &month_key, day, &period, &status)?;
        out.push(rec);
    }
    Ok(out)
}
