use crate::attendance;
use crate::db;
use crate::ipc::handlers::setup::attendance_settings;
use crate::ipc::handlers::students::find_student_by_no;
use crate::ipc::helpers::{
    active_roster, get_required_str, month_of, parse_date_param, with_conn, HandlerErr, RosterScope,
};
use crate::ipc::types::{AppState, Request};
use chrono::Datelike;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const RECENT_ACTIVITY_LIMIT: i64 = 5;

fn count(conn: &Connection, sql: &str) -> Result<i64, HandlerErr> {
    conn.query_row(sql, [], |r| r.get(0)).map_err(HandlerErr::query)
}

fn dashboard_admin(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = parse_date_param(params)?;
    let month = month_of(date)?;
    let settings = attendance_settings(conn)?;

    let roster_ids: Vec<String> = active_roster(conn, &RosterScope::admin(), None, None)?
        .into_iter()
        .map(|s| s.id)
        .collect();
    let records = db::attendance_records_for_month(conn, month, Some(&roster_ids))
        .map_err(HandlerErr::query)?;
    let summary = attendance::summarize_day(&records, &roster_ids, date.day(), &settings.policy)?;

    let class_name: Option<(String, String)> = conn
        .query_row(
            "SELECT grade, section
             FROM students
             WHERE status = 'ACTIVE'
             GROUP BY grade, section
             ORDER BY COUNT(*) DESC, grade, section
             LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let class_name = class_name
        .map(|(g, s)| format!("{} - {}", g, s))
        .unwrap_or_else(|| "All Classes".to_string());

    let pending_payments = count(
        conn,
        "SELECT COUNT(*)
         FROM payments p
         JOIN students s ON s.id = p.student_id
         WHERE p.status = 'pending' AND s.status = 'ACTIVE'",
    )?;

    Ok(json!({
        "date": date.format("%Y-%m-%d").to_string(),
        "className": class_name,
        "totalStudents": summary.total_students,
        "presentToday": summary.present_today,
        "lateToday": summary.late_today,
        "absentToday": summary.absent_today,
        "excusedToday": summary.excused_today,
        "notMarked": summary.not_marked,
        "todaysAttendanceRate": summary.attendance_rate_percent,
        "pendingPayments": pending_payments,
        "summary": summary
    }))
}

fn dashboard_student(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_no = get_required_str(params, "studentNo")?;
    let date = parse_date_param(params)?;
    let month = month_of(date)?;
    let settings = attendance_settings(conn)?;

    let student = find_student_by_no(conn, &student_no)?
        .filter(|s| s.status == "ACTIVE")
        .ok_or_else(|| {
            HandlerErr::not_found("student not found or inactive")
                .with_details(json!({ "studentNo": student_no }))
        })?;

    let ids = vec![student.id.clone()];
    let records =
        db::attendance_records_for_month(conn, month, Some(&ids)).map_err(HandlerErr::query)?;
    let today = attendance::summarize_student_day(&records, &student.id, date.day())?;
    let mut month_summary = attendance::summarize_month(&records, &student.id, &settings.policy);
    month_summary.day_status = Some(today.label);

    let latest_payment = conn
        .query_row(
            "SELECT status, amount, due_date, paid_date
             FROM payments
             WHERE student_id = ?
             ORDER BY created_at DESC
             LIMIT 1",
            [&student.id],
            |r| {
                Ok(json!({
                    "status": r.get::<_, String>(0)?,
                    "amount": r.get::<_, f64>(1)?,
                    "dueDate": r.get::<_, Option<String>>(2)?,
                    "paidDate": r.get::<_, Option<String>>(3)?,
                }))
            },
        )
        .optional()
        .map_err(HandlerErr::query)?
        .unwrap_or_else(|| json!({ "status": "No Data", "amount": 0, "dueDate": null, "paidDate": null }));

    let mut stmt = conn
        .prepare(
            "SELECT day, period, status, updated_at
             FROM attendance
             WHERE student_id = ? AND month_year = ?
             ORDER BY updated_at DESC, day DESC, period DESC
             LIMIT ?",
        )
        .map_err(HandlerErr::query)?;
    let recent_activity = stmt
        .query_map(
            (&student.id, month.to_string(), RECENT_ACTIVITY_LIMIT),
            |r| {
                let day: i64 = r.get(0)?;
                let period: String = r.get(1)?;
                Ok(json!({
                    "day": format!("Day {}", day),
                    "period": format!("Period {}", period.trim_start_matches('p')),
                    "status": r.get::<_, String>(2)?,
                    "date": r.get::<_, String>(3)?,
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({
        "date": date.format("%Y-%m-%d").to_string(),
        "studentInfo": {
            "studentNo": student.student_no,
            "studentName": student.student_name,
            "grade": student.grade,
            "section": student.section,
            "adviser": student.adviser
        },
        "todayStatus": {
            "overall": today.label,
            "periods": {
                "total": today.total,
                "present": today.present,
                "absent": today.absent,
                "late": today.late,
                "excused": today.excused
            }
        },
        "overallAttendance": {
            "rate": month_summary.rate,
            "periods": {
                "total": month_summary.total_periods_in_window,
                "present": month_summary.present_count,
                "absent": month_summary.absent_count,
                "late": month_summary.late_count,
                "excused": month_summary.excused_count
            }
        },
        "monthSummary": month_summary,
        "payment": latest_payment,
        "recentActivity": recent_activity
    }))
}

fn handle_dashboard_admin(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, dashboard_admin)
}

fn handle_dashboard_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, dashboard_student)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.admin" => Some(handle_dashboard_admin(state, req)),
        "dashboard.student" => Some(handle_dashboard_student(state, req)),
        _ => None,
    }
}
