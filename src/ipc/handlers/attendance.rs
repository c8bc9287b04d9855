use crate::attendance::{self, AttendanceError, AttendanceStatus, MonthKey, Period};
use crate::db;
use crate::export::{self, SheetFilter, SheetStudent};
use crate::ipc::handlers::setup::attendance_settings;
use crate::ipc::handlers::students::find_student;
use crate::ipc::helpers::{
    active_roster, get_optional_str, get_required_str, get_string_list, month_of, parse_date_param,
    parse_day_param, parse_month_param, parse_period_param, parse_status_value, with_conn, HandlerErr,
    RosterScope, RosterStudent,
};
use crate::ipc::types::{AppState, Request};
use chrono::Datelike;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkOutcome {
    Created,
    Updated,
    Cleared,
    Unchanged,
}

impl MarkOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Cleared => "cleared",
            Self::Unchanged => "unchanged",
        }
    }
}

struct Slot {
    month: MonthKey,
    day: u8,
    period: Period,
}

/// Periods past the configured `periodsPerDay` are not shown anywhere, so
/// they cannot be written either.
fn parse_slot(params: &serde_json::Value, periods_per_day: usize) -> Result<Slot, HandlerErr> {
    let month = parse_month_param(params, "month")?;
    let day = parse_day_param(params, month)?;
    let period = parse_period_param(params)?;
    if usize::from(period.number()) > periods_per_day {
        return Err(HandlerErr::from(AttendanceError::InvalidPeriod(period.to_string()))
            .with_details(json!({ "periodsPerDay": periods_per_day })));
    }
    Ok(Slot { month, day, period })
}

fn roster_for_request(
    conn: &Connection,
    scope: &RosterScope,
    params: &serde_json::Value,
) -> Result<Vec<RosterStudent>, HandlerErr> {
    let grade = get_optional_str(params, "grade")?;
    let section = get_optional_str(params, "section")?;
    active_roster(conn, scope, grade.as_deref(), section.as_deref())
}

fn ids_of(roster: &[RosterStudent]) -> Vec<String> {
    roster.iter().map(|s| s.id.clone()).collect()
}

/// Writes one cell. `None` removes the record.
fn write_status(
    conn: &Connection,
    student_id: &str,
    slot: &Slot,
    status: Option<AttendanceStatus>,
) -> Result<MarkOutcome, HandlerErr> {
    let month_key = slot.month.to_string();
    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT id, status FROM attendance
             WHERE student_id = ? AND month_year = ? AND day = ? AND period = ?",
            (student_id, &month_key, slot.day, slot.period.as_str()),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let now = db::now_timestamp();

    match (existing, status) {
        (None, None) => Ok(MarkOutcome::Unchanged),
        (Some((row_id, _)), None) => {
            conn.execute("DELETE FROM attendance WHERE id = ?", [&row_id])
                .map_err(|e| HandlerErr::write("db_update_failed", "attendance", e))?;
            Ok(MarkOutcome::Cleared)
        }
        (Some((_, current)), Some(next)) if current == next.as_str() => Ok(MarkOutcome::Unchanged),
        (Some((row_id, _)), Some(next)) => {
            conn.execute(
                "UPDATE attendance SET status = ?, updated_at = ? WHERE id = ?",
                (next.as_str(), &now, &row_id),
            )
            .map_err(|e| HandlerErr::write("db_update_failed", "attendance", e))?;
            Ok(MarkOutcome::Updated)
        }
        (None, Some(next)) => {
            conn.execute(
                "INSERT INTO attendance(id, student_id, month_year, day, period, status, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    uuid::Uuid::new_v4().to_string(),
                    student_id,
                    &month_key,
                    slot.day,
                    slot.period.as_str(),
                    next.as_str(),
                    &now,
                    &now,
                ),
            )
            .map_err(|e| HandlerErr::write("db_insert_failed", "attendance", e))?;
            Ok(MarkOutcome::Created)
        }
    }
}

fn attendance_month_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let scope = RosterScope::from_params(params)?;
    let month = parse_month_param(params, "month")?;
    let settings = attendance_settings(conn)?;
    let roster = roster_for_request(conn, &scope, params)?;
    let records = db::attendance_records_for_month(conn, month, Some(&ids_of(&roster)))
        .map_err(HandlerErr::query)?;

    // student -> day -> period -> status; only marked cells are present.
    let mut grid: BTreeMap<String, BTreeMap<String, BTreeMap<&'static str, &'static str>>> =
        BTreeMap::new();
    for r in &records {
        grid.entry(r.student_id.clone())
            .or_default()
            .entry(r.day.to_string())
            .or_default()
            .insert(r.period.as_str(), r.status.as_str());
    }
    let periods: Vec<&str> = Period::ALL
        .iter()
        .take(settings.periods_per_day)
        .map(|p| p.as_str())
        .collect();

    Ok(json!({
        "month": month.to_string(),
        "daysInMonth": month.days_in_month(),
        "periods": periods,
        "scope": scope.describe(),
        "students": roster,
        "grid": grid
    }))
}

fn attendance_set_status(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let scope = RosterScope::from_params(params)?;
    let student_id = get_required_str(params, "studentId")?;
    let slot = parse_slot(params, attendance_settings(conn)?.periods_per_day)?;
    let status = match params.get("status") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(parse_status_value(v)?),
    };

    let student = find_student(conn, &student_id)?.ok_or_else(|| {
        HandlerErr::not_found("student not found").with_details(json!({ "studentId": student_id }))
    })?;
    if !scope.allows(&student.grade, &student.section) {
        return Err(HandlerErr::forbidden("student is outside your section")
            .with_details(json!({ "studentId": student_id })));
    }
    if student.status != "ACTIVE" {
        return Err(HandlerErr::forbidden("student is not active")
            .with_details(json!({ "studentId": student_id, "status": student.status })));
    }

    let outcome = write_status(conn, &student_id, &slot, status)?;
    tracing::debug!(
        student_id = %student_id,
        month = %slot.month,
        day = slot.day,
        period = %slot.period,
        outcome = outcome.as_str(),
        "attendance marked"
    );
    Ok(json!({
        "ok": true,
        "outcome": outcome.as_str(),
        "status": status.map(|s| s.as_str())
    }))
}

fn attendance_bulk_stamp(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let scope = RosterScope::from_params(params)?;
    let student_ids = get_string_list(params, "studentIds")?;
    let slot = parse_slot(params, attendance_settings(conn)?.periods_per_day)?;
    let Some(status_value) = params.get("status") else {
        return Err(HandlerErr::bad_params("missing status"));
    };
    let status = parse_status_value(status_value)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut stamped = 0usize;
    let mut skipped: Vec<serde_json::Value> = Vec::new();
    for student_id in student_ids {
        let reason = match find_student(&tx, &student_id)? {
            None => Some("not_found"),
            Some(s) if s.status != "ACTIVE" => Some("inactive"),
            Some(s) if !scope.allows(&s.grade, &s.section) => Some("forbidden"),
            Some(_) => None,
        };
        if let Some(reason) = reason {
            skipped.push(json!({ "studentId": student_id, "reason": reason }));
            continue;
        }
        if write_status(&tx, &student_id, &slot, Some(status))? != MarkOutcome::Unchanged {
            stamped += 1;
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(
        month = %slot.month,
        day = slot.day,
        period = %slot.period,
        status = %status,
        stamped,
        skipped = skipped.len(),
        "attendance bulk stamp"
    );

    Ok(json!({ "ok": true, "stamped": stamped, "skipped": skipped }))
}

fn attendance_day_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let scope = RosterScope::from_params(params)?;
    let date = parse_date_param(params)?;
    let month = month_of(date)?;
    let settings = attendance_settings(conn)?;
    let roster_ids = ids_of(&roster_for_request(conn, &scope, params)?);
    let records = db::attendance_records_for_month(conn, month, Some(&roster_ids))
        .map_err(HandlerErr::query)?;
    let summary = attendance::summarize_day(&records, &roster_ids, date.day(), &settings.policy)?;

    Ok(json!({
        "date": date.format("%Y-%m-%d").to_string(),
        "scope": scope.describe(),
        "policy": settings.policy,
        "summary": summary
    }))
}

fn attendance_student_month(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let scope = RosterScope::from_params(params)?;
    let student_id = get_required_str(params, "studentId")?;
    let month = parse_month_param(params, "month")?;
    let student = find_student(conn, &student_id)?.ok_or_else(|| {
        HandlerErr::not_found("student not found").with_details(json!({ "studentId": student_id }))
    })?;
    if !scope.allows(&student.grade, &student.section) {
        return Err(HandlerErr::forbidden("student is outside your section"));
    }

    let settings = attendance_settings(conn)?;
    let ids = vec![student_id.clone()];
    let records =
        db::attendance_records_for_month(conn, month, Some(&ids)).map_err(HandlerErr::query)?;
    let summary = attendance::summarize_month(&records, &student_id, &settings.policy);
    let days: Vec<serde_json::Value> = attendance::day_labels_for_month(&records, &student_id)
        .into_iter()
        .map(|(day, label)| json!({ "day": day, "label": label }))
        .collect();

    Ok(json!({
        "month": month.to_string(),
        "student": {
            "id": student.id,
            "studentNo": student.student_no,
            "studentName": student.student_name
        },
        "summary": summary,
        "days": days
    }))
}

fn attendance_export_csv(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let scope = RosterScope::from_params(params)?;
    let date = parse_date_param(params)?;
    let out_path = get_required_str(params, "outPath")?;
    let settings = attendance_settings(conn)?;
    let roster = roster_for_request(conn, &scope, params)?;
    let records = db::attendance_records_for_month(conn, month_of(date)?, Some(&ids_of(&roster)))
        .map_err(HandlerErr::query)?;

    let filter = if scope.is_restricted() {
        SheetFilter {
            grade: scope.grade.clone(),
            section: scope.section.clone(),
        }
    } else {
        SheetFilter {
            grade: get_optional_str(params, "grade")?,
            section: get_optional_str(params, "section")?,
        }
    };
    let students: Vec<SheetStudent> = roster
        .into_iter()
        .map(|s| SheetStudent {
            id: s.id,
            student_no: s.student_no,
            student_name: s.student_name,
            grade: s.grade,
            section: s.section,
            adviser: s.adviser,
        })
        .collect();
    let csv = export::daily_attendance_csv(date, &students, &records, &filter, settings.periods_per_day);

    let out = std::path::Path::new(&out_path);
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
        })?;
    }
    std::fs::write(out, csv).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
    })?;
    tracing::info!(path = %out_path, rows = students.len(), "attendance sheet exported");

    Ok(json!({ "ok": true, "path": out_path, "rowsExported": students.len() }))
}

fn handle_attendance_month_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, attendance_month_open)
}

fn handle_attendance_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, attendance_set_status)
}

fn handle_attendance_bulk_stamp(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, attendance_bulk_stamp)
}

fn handle_attendance_day_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, attendance_day_summary)
}

fn handle_attendance_student_month(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, attendance_student_month)
}

fn handle_attendance_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, attendance_export_csv)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.monthOpen" => Some(handle_attendance_month_open(state, req)),
        "attendance.setStatus" => Some(handle_attendance_set_status(state, req)),
        "attendance.bulkStamp" => Some(handle_attendance_bulk_stamp(state, req)),
        "attendance.daySummary" => Some(handle_attendance_day_summary(state, req)),
        "attendance.studentMonth" => Some(handle_attendance_student_month(state, req)),
        "attendance.exportCsv" => Some(handle_attendance_export_csv(state, req)),
        _ => None,
    }
}
