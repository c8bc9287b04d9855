use crate::db;
use crate::ipc::helpers::{get_optional_str, get_required_str, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::qr::{self, StudentQrPayload};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;

const STUDENT_STATUSES: [&str; 4] = ["ACTIVE", "INACTIVE", "GRADUATED", "TRANSFERRED"];
const STUDENT_TYPES: [&str; 2] = ["student", "secretary"];

const STUDENT_COLUMNS: &str = "id, student_no, student_name, student_type, grade, section, adviser,
     contact_number, email, address, birth_date, qr_payload, status, created_at, updated_at";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub student_no: String,
    pub student_name: String,
    pub student_type: String,
    pub grade: String,
    pub section: String,
    pub adviser: Option<String>,
    pub contact_number: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub birth_date: Option<String>,
    #[serde(skip_serializing)]
    pub qr_payload: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

fn student_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        student_no: r.get(1)?,
        student_name: r.get(2)?,
        student_type: r.get(3)?,
        grade: r.get(4)?,
        section: r.get(5)?,
        adviser: r.get(6)?,
        contact_number: r.get(7)?,
        email: r.get(8)?,
        address: r.get(9)?,
        birth_date: r.get(10)?,
        qr_payload: r.get(11)?,
        status: r.get(12)?,
        created_at: r.get(13)?,
        updated_at: r.get(14)?,
    })
}

pub fn find_student(conn: &Connection, student_id: &str) -> Result<Option<StudentRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS),
        [student_id],
        student_from_row,
    )
    .optional()
    .map_err(HandlerErr::query)
}

pub fn find_student_by_no(conn: &Connection, student_no: &str) -> Result<Option<StudentRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM students WHERE student_no = ?", STUDENT_COLUMNS),
        [student_no],
        student_from_row,
    )
    .optional()
    .map_err(HandlerErr::query)
}

fn require_student(conn: &Connection, student_id: &str) -> Result<StudentRow, HandlerErr> {
    find_student(conn, student_id)?.ok_or_else(|| {
        HandlerErr::not_found("student not found").with_details(json!({ "studentId": student_id }))
    })
}

fn student_no_taken(conn: &Connection, student_no: &str, except_id: Option<&str>) -> Result<bool, HandlerErr> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE student_no = ?",
            [student_no],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    Ok(match (found, except_id) {
        (Some(id), Some(except)) => id != except,
        (Some(_), None) => true,
        (None, _) => false,
    })
}

fn check_choice(value: &str, allowed: &[&str], key: &str) -> Result<(), HandlerErr> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(HandlerErr::bad_params(format!(
            "{} must be one of: {}",
            key,
            allowed.join(", ")
        )))
    }
}

fn build_qr_payload(student: &StudentRow) -> Result<String, HandlerErr> {
    StudentQrPayload {
        student_id: student.student_no.clone(),
        student_name: student.student_name.clone(),
        grade: student.grade.clone(),
        section: student.section.clone(),
        adviser: student.adviser.clone(),
        id: student.id.clone(),
        kind: qr::STUDENT_QR_TYPE.to_string(),
        timestamp: db::now_timestamp(),
    }
    .encode()
    .map_err(|e| HandlerErr::new("bad_params", e.to_string()))
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut sql = format!("SELECT {} FROM students WHERE 1 = 1", STUDENT_COLUMNS);
    let mut binds: Vec<Value> = Vec::new();
    for (key, column) in [("grade", "grade"), ("section", "section"), ("status", "status")] {
        if let Some(v) = get_optional_str(params, key)? {
            sql.push_str(&format!(" AND {} = ?", column));
            binds.push(Value::Text(v));
        }
    }
    if let Some(search) = get_optional_str(params, "search")? {
        sql.push_str(" AND (student_no LIKE ? OR student_name LIKE ?)");
        let pattern = format!("%{}%", search);
        binds.push(Value::Text(pattern.clone()));
        binds.push(Value::Text(pattern));
    }
    sql.push_str(" ORDER BY grade, section, student_name");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let students = stmt
        .query_map(params_from_iter(binds), student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "students": students }))
}

fn students_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let student = require_student(conn, &student_id)?;
    Ok(json!({ "student": student }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_no = get_required_str(params, "studentNo")?;
    let student_name = get_required_str(params, "studentName")?;
    let grade = get_required_str(params, "grade")?;
    let section = get_required_str(params, "section")?;
    let student_type = get_optional_str(params, "studentType")?.unwrap_or_else(|| "student".into());
    check_choice(&student_type, &STUDENT_TYPES, "studentType")?;
    let status = get_optional_str(params, "status")?
        .map(|s| s.to_ascii_uppercase())
        .unwrap_or_else(|| "ACTIVE".into());
    check_choice(&status, &STUDENT_STATUSES, "status")?;

    if student_no_taken(conn, &student_no, None)? {
        return Err(HandlerErr::conflict("student number already exists")
            .with_details(json!({ "studentNo": student_no })));
    }

    let now = db::now_timestamp();
    let mut student = StudentRow {
        id: uuid::Uuid::new_v4().to_string(),
        student_no,
        student_name,
        student_type,
        grade,
        section,
        adviser: get_optional_str(params, "adviser")?,
        contact_number: get_optional_str(params, "contactNumber")?,
        email: get_optional_str(params, "email")?,
        address: get_optional_str(params, "address")?,
        birth_date: get_optional_str(params, "birthDate")?,
        qr_payload: None,
        status,
        created_at: now.clone(),
        updated_at: now,
    };
    student.qr_payload = Some(build_qr_payload(&student)?);

    conn.execute(
        "INSERT INTO students(id, student_no, student_name, student_type, grade, section, adviser,
             contact_number, email, address, birth_date, qr_payload, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            student.id,
            student.student_no,
            student.student_name,
            student.student_type,
            student.grade,
            student.section,
            student.adviser,
            student.contact_number,
            student.email,
            student.address,
            student.birth_date,
            student.qr_payload,
            student.status,
            student.created_at,
            student.updated_at,
        ],
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "students", e))?;
    tracing::info!(student_id = %student.id, student_no = %student.student_no, "student created");

    Ok(json!({ "studentId": student.id, "student": student }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let Some(patch) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let mut student = require_student(conn, &student_id)?;

    for key in patch.as_object().map(|o| o.keys()).into_iter().flatten() {
        match key.as_str() {
            "studentNo" => {
                let v = get_required_str(patch, key)?;
                if student_no_taken(conn, &v, Some(&student.id))? {
                    return Err(HandlerErr::conflict("student number already exists")
                        .with_details(json!({ "studentNo": v })));
                }
                student.student_no = v;
            }
            "studentName" => student.student_name = get_required_str(patch, key)?,
            "grade" => student.grade = get_required_str(patch, key)?,
            "section" => student.section = get_required_str(patch, key)?,
            "studentType" => {
                let v = get_required_str(patch, key)?;
                check_choice(&v, &STUDENT_TYPES, key)?;
                student.student_type = v;
            }
            "status" => {
                let v = get_required_str(patch, key)?.to_ascii_uppercase();
                check_choice(&v, &STUDENT_STATUSES, key)?;
                student.status = v;
            }
            "adviser" => student.adviser = get_optional_str(patch, key)?,
            "contactNumber" => student.contact_number = get_optional_str(patch, key)?,
            "email" => student.email = get_optional_str(patch, key)?,
            "address" => student.address = get_optional_str(patch, key)?,
            "birthDate" => student.birth_date = get_optional_str(patch, key)?,
            other => return Err(HandlerErr::bad_params(format!("unknown student field: {}", other))),
        }
    }
    student.qr_payload = Some(build_qr_payload(&student)?);
    student.updated_at = db::now_timestamp();

    conn.execute(
        "UPDATE students SET student_no = ?, student_name = ?, student_type = ?, grade = ?,
             section = ?, adviser = ?, contact_number = ?, email = ?, address = ?,
             birth_date = ?, qr_payload = ?, status = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            student.student_no,
            student.student_name,
            student.student_type,
            student.grade,
            student.section,
            student.adviser,
            student.contact_number,
            student.email,
            student.address,
            student.birth_date,
            student.qr_payload,
            student.status,
            student.updated_at,
            student.id,
        ],
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "students", e))?;

    Ok(json!({ "ok": true, "student": student }))
}

const PROFILE_FIELDS: [&str; 3] = ["contactNumber", "address", "email"];

/// Student self-service edit. Only contact details change; everything else
/// stays with `students.update`.
fn students_update_profile(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_no = get_required_str(params, "studentNo")?;
    let fields = params
        .as_object()
        .ok_or_else(|| HandlerErr::bad_params("params must be an object"))?;
    if let Some(other) = fields
        .keys()
        .find(|k| k.as_str() != "studentNo" && !PROFILE_FIELDS.contains(&k.as_str()))
    {
        return Err(HandlerErr::bad_params(format!("field cannot be edited from the profile: {}", other)));
    }
    if !PROFILE_FIELDS.iter().any(|k| fields.contains_key(*k)) {
        return Err(HandlerErr::bad_params("no profile fields to update"));
    }

    let mut student = find_student_by_no(conn, &student_no)?
        .filter(|s| s.status == "ACTIVE")
        .ok_or_else(|| {
            HandlerErr::not_found("active student not found").with_details(json!({ "studentNo": student_no }))
        })?;
    if fields.contains_key("contactNumber") {
        student.contact_number = get_optional_str(params, "contactNumber")?;
    }
    if fields.contains_key("address") {
        student.address = get_optional_str(params, "address")?;
    }
    if fields.contains_key("email") {
        student.email = get_optional_str(params, "email")?;
        if student.email.as_deref().is_some_and(|e| !e.contains('@')) {
            return Err(HandlerErr::bad_params("email is not valid"));
        }
    }
    student.updated_at = db::now_timestamp();

    conn.execute(
        "UPDATE students SET contact_number = ?, address = ?, email = ?, updated_at = ? WHERE id = ?",
        (
            &student.contact_number,
            &student.address,
            &student.email,
            &student.updated_at,
            &student.id,
        ),
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "students", e))?;
    tracing::info!(student_no = %student.student_no, "student profile updated");

    Ok(json!({ "ok": true, "student": student }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    require_student(conn, &student_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let attendance_removed = tx
        .execute("DELETE FROM attendance WHERE student_id = ?", [&student_id])
        .map_err(|e| HandlerErr::write("db_update_failed", "attendance", e))?;
    let payments_removed = tx
        .execute("DELETE FROM payments WHERE student_id = ?", [&student_id])
        .map_err(|e| HandlerErr::write("db_update_failed", "payments", e))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::write("db_update_failed", "students", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(student_id = %student_id, attendance_removed, payments_removed, "student deleted");

    Ok(json!({
        "ok": true,
        "attendanceRemoved": attendance_removed,
        "paymentsRemoved": payments_removed
    }))
}

fn students_dropdown(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, student_no, student_name, grade, section
             FROM students
             WHERE status = 'ACTIVE'
             ORDER BY student_name",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentNo": r.get::<_, String>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "grade": r.get::<_, String>(3)?,
                "section": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "students": rows }))
}

fn students_qr_payload(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let student = require_student(conn, &student_id)?;
    let payload = match student.qr_payload.clone() {
        Some(p) => p,
        None => {
            // Rows imported from older backups may predate stored payloads.
            let p = build_qr_payload(&student)?;
            conn.execute(
                "UPDATE students SET qr_payload = ? WHERE id = ?",
                (&p, &student.id),
            )
            .map_err(|e| HandlerErr::write("db_update_failed", "students", e))?;
            p
        }
    };
    let parsed: serde_json::Value =
        serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null);
    Ok(json!({
        "studentId": student.id,
        "payload": payload,
        "data": parsed
    }))
}

fn students_resolve_qr(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let content = params
        .get("content")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing content"))?;
    let parsed = qr::parse_student_qr(content).map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    let student = find_student_by_no(conn, &parsed.student_no)?
        .filter(|s| s.status == "ACTIVE")
        .ok_or_else(|| {
            HandlerErr::not_found("student not found or inactive")
                .with_details(json!({ "studentNo": parsed.student_no }))
        })?;
    Ok(json!({ "parsed": parsed, "student": student }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, students_list)
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, students_get)
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, students_create)
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, students_update)
}

fn handle_students_update_profile(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, students_update_profile)
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, students_delete)
}

fn handle_students_dropdown(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, students_dropdown)
}

fn handle_students_qr_payload(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, students_qr_payload)
}

fn handle_students_resolve_qr(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, students_resolve_qr)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.updateProfile" => Some(handle_students_update_profile(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.dropdown" => Some(handle_students_dropdown(state, req)),
        "students.qrPayload" => Some(handle_students_qr_payload(state, req)),
        "students.resolveQr" => Some(handle_students_resolve_qr(state, req)),
        _ => None,
    }
}
