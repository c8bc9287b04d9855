use crate::db;
use crate::ipc::handlers::setup::payments_settings;
use crate::ipc::handlers::students::find_student_by_no;
use crate::ipc::helpers::{
    get_optional_str, get_required_str, get_string_list, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;

pub const PAYMENT_STATUSES: [&str; 5] = ["pending", "processing", "completed", "failed", "cancelled"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentRow {
    id: String,
    student_id: String,
    student_no: String,
    student_name: String,
    grade: String,
    section: String,
    amount: f64,
    description: String,
    due_date: Option<String>,
    status: String,
    reference_number: Option<String>,
    paid_date: Option<String>,
    payment_method_id: Option<String>,
    payment_method: Option<String>,
    created_at: String,
    updated_at: String,
}

const PAYMENT_SELECT: &str = "SELECT p.id, p.student_id, s.student_no, s.student_name, s.grade, s.section,
            p.amount, p.description, p.due_date, p.status, p.reference_number, p.paid_date,
            p.payment_method_id, pm.method_name, p.created_at, p.updated_at
     FROM payments p
     JOIN students s ON s.id = p.student_id
     LEFT JOIN payment_methods pm ON pm.id = p.payment_method_id";

fn payment_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<PaymentRow> {
    Ok(PaymentRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_no: r.get(2)?,
        student_name: r.get(3)?,
        grade: r.get(4)?,
        section: r.get(5)?,
        amount: r.get(6)?,
        description: r.get(7)?,
        due_date: r.get(8)?,
        status: r.get(9)?,
        reference_number: r.get(10)?,
        paid_date: r.get(11)?,
        payment_method_id: r.get(12)?,
        payment_method: r.get(13)?,
        created_at: r.get(14)?,
        updated_at: r.get(15)?,
    })
}

fn query_payments(conn: &Connection, where_sql: &str, binds: Vec<Value>) -> Result<Vec<PaymentRow>, HandlerErr> {
    let sql = format!("{} WHERE {} ORDER BY p.created_at DESC, p.id", PAYMENT_SELECT, where_sql);
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    stmt.query_map(params_from_iter(binds), payment_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)
}

fn parse_payment_status(raw: &str) -> Result<&'static str, HandlerErr> {
    let lower = raw.trim().to_ascii_lowercase();
    PAYMENT_STATUSES
        .iter()
        .copied()
        .find(|s| *s == lower)
        .ok_or_else(|| {
            HandlerErr::bad_params(format!(
                "status must be one of: {}",
                PAYMENT_STATUSES.join(", ")
            ))
        })
}

fn parse_amount(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    let amount = params
        .get(key)
        .and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if !amount.is_finite() || amount <= 0.0 {
        return Err(HandlerErr::bad_params(format!("{} must be greater than 0", key)));
    }
    Ok(amount)
}

fn parse_due_date(params: &serde_json::Value) -> Result<Option<String>, HandlerErr> {
    let Some(raw) = get_optional_str(params, "dueDate")? else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map(|d| Some(d.format("%Y-%m-%d").to_string()))
        .map_err(|_| HandlerErr::bad_params("dueDate must be YYYY-MM-DD"))
}

fn method_exists(conn: &Connection, method_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM payment_methods WHERE id = ?",
        [method_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

fn payments_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut where_sql = String::from("s.status = 'ACTIVE'");
    let mut binds: Vec<Value> = Vec::new();
    if let Some(raw) = get_optional_str(params, "status")? {
        where_sql.push_str(" AND p.status = ?");
        binds.push(Value::Text(parse_payment_status(&raw)?.to_string()));
    }
    let payments = query_payments(conn, &where_sql, binds)?;
    Ok(json!({ "payments": payments }))
}

fn payments_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_ids = get_string_list(params, "studentIds")?;
    if student_ids.is_empty() {
        return Err(HandlerErr::bad_params("studentIds must not be empty"));
    }
    let amount = parse_amount(params, "amount")?;
    let description = match get_optional_str(params, "description")? {
        Some(d) => d,
        None => payments_settings(conn)?.default_description,
    };
    let due_date = parse_due_date(params)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let now = db::now_timestamp();
    let mut created: Vec<String> = Vec::with_capacity(student_ids.len());
    for student_id in &student_ids {
        let active: Option<String> = tx
            .query_row("SELECT status FROM students WHERE id = ?", [student_id], |r| r.get(0))
            .optional()
            .map_err(HandlerErr::query)?;
        if active.as_deref() != Some("ACTIVE") {
            // Whole batch is rejected; nothing is committed.
            return Err(HandlerErr::not_found("student not found or inactive")
                .with_details(json!({ "studentId": student_id })));
        }
        let payment_id = uuid::Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO payments(id, student_id, payment_method_id, amount, description, due_date,
                 status, reference_number, paid_date, created_at, updated_at)
             VALUES(?, ?, NULL, ?, ?, ?, 'pending', NULL, NULL, ?, ?)",
            (&payment_id, student_id, amount, &description, &due_date, &now, &now),
        )
        .map_err(|e| HandlerErr::write("db_insert_failed", "payments", e))?;
        created.push(payment_id);
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(count = created.len(), amount, "payments created");

    Ok(json!({ "ok": true, "created": created.len(), "paymentIds": created }))
}

fn payments_update_status(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let payment_id = get_required_str(params, "paymentId")?;
    let status = parse_payment_status(&get_required_str(params, "status")?)?;
    let now = db::now_timestamp();
    // Only completed payments carry a paid date.
    let paid_date = (status == "completed").then(|| now.clone());

    let changed = conn
        .execute(
            "UPDATE payments
             SET status = ?, paid_date = ?, updated_at = ?
             WHERE id = ?",
            (status, &paid_date, &now, &payment_id),
        )
        .map_err(|e| HandlerErr::write("db_update_failed", "payments", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("payment not found")
            .with_details(json!({ "paymentId": payment_id })));
    }
    tracing::info!(payment_id = %payment_id, status, "payment status updated");
    Ok(json!({ "ok": true, "status": status, "paidDate": paid_date }))
}

fn payments_for_student(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_no = get_required_str(params, "studentNo")?;
    let student = find_student_by_no(conn, &student_no)?
        .filter(|s| s.status == "ACTIVE")
        .ok_or_else(|| {
            HandlerErr::not_found("student not found").with_details(json!({ "studentNo": student_no }))
        })?;
    let payments = query_payments(conn, "p.student_id = ?", vec![Value::Text(student.id)])?;
    Ok(json!({ "payments": payments }))
}

fn payments_submit_reference(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_no = get_required_str(params, "studentNo")?;
    let reference_number = get_required_str(params, "referenceNumber")?;
    let payment_id = get_optional_str(params, "paymentId")?;
    let method_id = get_optional_str(params, "methodId")?;

    let student = find_student_by_no(conn, &student_no)?.ok_or_else(|| {
        HandlerErr::not_found("student not found").with_details(json!({ "studentNo": student_no }))
    })?;
    if let Some(m) = method_id.as_deref() {
        if !method_exists(conn, m)? {
            return Err(HandlerErr::not_found("payment method not found")
                .with_details(json!({ "methodId": m })));
        }
    }
    let now = db::now_timestamp();

    let result_id = match payment_id {
        Some(payment_id) => {
            let existing: Option<Option<String>> = conn
                .query_row(
                    "SELECT payment_method_id FROM payments WHERE id = ? AND student_id = ?",
                    (&payment_id, &student.id),
                    |r| r.get(0),
                )
                .optional()
                .map_err(HandlerErr::query)?;
            let Some(existing_method) = existing else {
                return Err(HandlerErr::not_found("payment not found")
                    .with_details(json!({ "paymentId": payment_id })));
            };
            let final_method = method_id.or(existing_method);
            conn.execute(
                "UPDATE payments
                 SET reference_number = ?, status = 'processing', payment_method_id = ?, updated_at = ?
                 WHERE id = ? AND student_id = ?",
                (&reference_number, &final_method, &now, &payment_id, &student.id),
            )
            .map_err(|e| HandlerErr::write("db_update_failed", "payments", e))?;
            payment_id
        }
        None => {
            let Some(method_id) = method_id else {
                return Err(HandlerErr::bad_params("methodId is required for new payments"));
            };
            let amount = match params.get("amount") {
                None | Some(serde_json::Value::Null) => 0.0,
                Some(_) => parse_amount(params, "amount")?,
            };
            let description = get_optional_str(params, "description")?
                .unwrap_or_else(|| "Payment submitted".to_string());
            let payment_id = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO payments(id, student_id, payment_method_id, amount, description, due_date,
                     status, reference_number, paid_date, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, NULL, 'processing', ?, NULL, ?, ?)",
                (
                    &payment_id,
                    &student.id,
                    &method_id,
                    amount,
                    &description,
                    &reference_number,
                    &now,
                    &now,
                ),
            )
            .map_err(|e| HandlerErr::write("db_insert_failed", "payments", e))?;
            payment_id
        }
    };
    tracing::info!(payment_id = %result_id, student_no = %student_no, "payment reference submitted");

    Ok(json!({ "ok": true, "paymentId": result_id, "status": "processing" }))
}

fn handle_payments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, payments_list)
}

fn handle_payments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, payments_create)
}

fn handle_payments_update_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, payments_update_status)
}

fn handle_payments_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, payments_for_student)
}

fn handle_payments_submit_reference(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, payments_submit_reference)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "payments.list" => Some(handle_payments_list(state, req)),
        "payments.create" => Some(handle_payments_create(state, req)),
        "payments.updateStatus" => Some(handle_payments_update_status(state, req)),
        "payments.forStudent" => Some(handle_payments_for_student(state, req)),
        "payments.submitReference" => Some(handle_payments_submit_reference(state, req)),
        _ => None,
    }
}
