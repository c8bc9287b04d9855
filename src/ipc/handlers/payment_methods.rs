use crate::db;
use crate::ipc::handlers::setup::payments_settings;
use crate::ipc::helpers::{get_optional_bool, get_optional_str, get_required_str, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::qr;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentMethodRow {
    id: String,
    method_code: String,
    method_name: String,
    description: String,
    is_active: bool,
    has_qr: bool,
    qr_code_mimetype: Option<String>,
    qr_code_filename: Option<String>,
    qr_code_sha256: Option<String>,
    account_number: String,
    account_name: String,
    instructions: String,
    created_at: String,
    updated_at: String,
}

const METHOD_COLUMNS: &str = "id, method_code, method_name, description, is_active, has_qr,
     qr_code_mimetype, qr_code_filename, qr_code_sha256, account_number, account_name,
     instructions, created_at, updated_at";

fn method_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<PaymentMethodRow> {
    Ok(PaymentMethodRow {
        id: r.get(0)?,
        method_code: r.get(1)?,
        method_name: r.get(2)?,
        description: r.get(3)?,
        is_active: r.get::<_, i64>(4)? != 0,
        has_qr: r.get::<_, i64>(5)? != 0,
        qr_code_mimetype: r.get(6)?,
        qr_code_filename: r.get(7)?,
        qr_code_sha256: r.get(8)?,
        account_number: r.get(9)?,
        account_name: r.get(10)?,
        instructions: r.get(11)?,
        created_at: r.get(12)?,
        updated_at: r.get(13)?,
    })
}

fn find_method(conn: &Connection, method_id: &str) -> Result<PaymentMethodRow, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM payment_methods WHERE id = ?", METHOD_COLUMNS),
        [method_id],
        method_from_row,
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| {
        HandlerErr::not_found("payment method not found").with_details(json!({ "methodId": method_id }))
    })
}

fn code_taken(conn: &Connection, code: &str, except_id: Option<&str>) -> Result<bool, HandlerErr> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM payment_methods WHERE method_code = ?",
            [code],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    Ok(found.is_some_and(|id| Some(id.as_str()) != except_id))
}

fn io_err(path: &str, e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": path }))
}

fn payment_methods_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let include_inactive = get_optional_bool(params, "includeInactive")?.unwrap_or(false);
    let sql = format!(
        "SELECT {} FROM payment_methods {} ORDER BY method_name",
        METHOD_COLUMNS,
        if include_inactive { "" } else { "WHERE is_active = 1" }
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let methods = stmt
        .query_map([], method_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "methods": methods }))
}

fn payment_methods_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let method_code = get_required_str(params, "methodCode")?.to_ascii_uppercase();
    let method_name = get_required_str(params, "methodName")?;
    if code_taken(conn, &method_code, None)? {
        return Err(HandlerErr::conflict("payment method code already exists")
            .with_details(json!({ "methodCode": method_code })));
    }
    let is_active = get_optional_bool(params, "isActive")?.unwrap_or(true);
    let text = |key: &str| -> Result<String, HandlerErr> {
        Ok(get_optional_str(params, key)?.unwrap_or_default())
    };
    let description = text("description")?;
    let account_number = text("accountNumber")?;
    let account_name = text("accountName")?;
    let instructions = text("instructions")?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = db::now_timestamp();
    conn.execute(
        "INSERT INTO payment_methods(id, method_code, method_name, description, is_active, has_qr,
             account_number, account_name, instructions, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            method_code,
            method_name,
            description,
            is_active as i64,
            account_number,
            account_name,
            instructions,
            now,
            now,
        ],
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "payment_methods", e))?;
    tracing::info!(method_id = %id, method_code = %method_code, "payment method created");

    Ok(json!({ "methodId": id, "method": find_method(conn, &id)? }))
}

fn payment_methods_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let method_id = get_required_str(params, "methodId")?;
    let Some(patch) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let mut m = find_method(conn, &method_id)?;

    for key in patch.as_object().map(|o| o.keys()).into_iter().flatten() {
        match key.as_str() {
            "methodCode" => {
                let code = get_required_str(patch, key)?.to_ascii_uppercase();
                if code_taken(conn, &code, Some(&m.id))? {
                    return Err(HandlerErr::conflict("payment method code already exists")
                        .with_details(json!({ "methodCode": code })));
                }
                m.method_code = code;
            }
            "methodName" => m.method_name = get_required_str(patch, key)?,
            "description" => m.description = get_optional_str(patch, key)?.unwrap_or_default(),
            "accountNumber" => m.account_number = get_optional_str(patch, key)?.unwrap_or_default(),
            "accountName" => m.account_name = get_optional_str(patch, key)?.unwrap_or_default(),
            "instructions" => m.instructions = get_optional_str(patch, key)?.unwrap_or_default(),
            "isActive" => {
                m.is_active = get_optional_bool(patch, key)?
                    .ok_or_else(|| HandlerErr::bad_params("isActive must be boolean"))?
            }
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown payment method field: {}",
                    other
                )))
            }
        }
    }

    conn.execute(
        "UPDATE payment_methods
         SET method_code = ?, method_name = ?, description = ?, is_active = ?,
             account_number = ?, account_name = ?, instructions = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            m.method_code,
            m.method_name,
            m.description,
            m.is_active as i64,
            m.account_number,
            m.account_name,
            m.instructions,
            db::now_timestamp(),
            m.id,
        ],
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "payment_methods", e))?;

    Ok(json!({ "ok": true, "method": find_method(conn, &method_id)? }))
}

fn payment_methods_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let method_id = get_required_str(params, "methodId")?;
    find_method(conn, &method_id)?;
    let in_use: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM payments WHERE payment_method_id = ?",
            [&method_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    if in_use > 0 {
        return Err(HandlerErr::conflict("payment method is referenced by payments")
            .with_details(json!({ "methodId": method_id, "payments": in_use })));
    }
    conn.execute("DELETE FROM payment_methods WHERE id = ?", [&method_id])
        .map_err(|e| HandlerErr::write("db_update_failed", "payment_methods", e))?;
    tracing::info!(method_id = %method_id, "payment method deleted");
    Ok(json!({ "ok": true }))
}

fn payment_methods_upload_qr(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let method_id = get_required_str(params, "methodId")?;
    let path = get_required_str(params, "path")?;
    find_method(conn, &method_id)?;
    let limit = payments_settings(conn)?.max_qr_upload_bytes;

    let src = Path::new(&path);
    let size = std::fs::metadata(src).map_err(|e| io_err(&path, e))?.len();
    if size > limit {
        return Err(HandlerErr::bad_params("QR image exceeds the upload size limit")
            .with_details(json!({ "size": size, "limit": limit })));
    }
    let bytes = std::fs::read(src).map_err(|e| io_err(&path, e))?;
    let Some(mime) = qr::sniff_image_mime(&bytes) else {
        return Err(HandlerErr::bad_params("file is not a PNG, JPEG, GIF or WebP image")
            .with_details(json!({ "path": path })));
    };
    let sha256 = qr::sha256_hex(&bytes);
    let filename = src
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "qr".to_string());

    conn.execute(
        "UPDATE payment_methods
         SET has_qr = 1, qr_code_data = ?, qr_code_mimetype = ?, qr_code_filename = ?,
             qr_code_sha256 = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![bytes, mime, filename, sha256, db::now_timestamp(), method_id],
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "payment_methods", e))?;
    tracing::info!(method_id = %method_id, mime, size, "payment method QR uploaded");

    Ok(json!({
        "ok": true,
        "mimetype": mime,
        "filename": filename,
        "size": bytes.len(),
        "sha256": sha256
    }))
}

fn payment_methods_export_qr(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let method_id = get_required_str(params, "methodId")?;
    let out_path = get_required_str(params, "outPath")?;
    find_method(conn, &method_id)?;

    let stored: Option<(Vec<u8>, Option<String>)> = conn
        .query_row(
            "SELECT qr_code_data, qr_code_mimetype
             FROM payment_methods
             WHERE id = ? AND has_qr = 1 AND qr_code_data IS NOT NULL",
            [&method_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;

    let (bytes, mime, placeholder) = match stored {
        Some((data, mime)) => (data, mime.unwrap_or_else(|| "image/jpeg".to_string()), false),
        None => (
            qr::PLACEHOLDER_SVG.as_bytes().to_vec(),
            "image/svg+xml".to_string(),
            true,
        ),
    };

    let out = Path::new(&out_path);
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_err(&out_path, e))?;
    }
    std::fs::write(out, &bytes).map_err(|e| io_err(&out_path, e))?;

    Ok(json!({
        "ok": true,
        "path": out_path,
        "mimetype": mime,
        "placeholder": placeholder,
        "size": bytes.len()
    }))
}

fn handle_payment_methods_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, payment_methods_list)
}

fn handle_payment_methods_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, payment_methods_create)
}

fn handle_payment_methods_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, payment_methods_update)
}

fn handle_payment_methods_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, payment_methods_delete)
}

fn handle_payment_methods_upload_qr(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, payment_methods_upload_qr)
}

fn handle_payment_methods_export_qr(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, payment_methods_export_qr)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "paymentMethods.list" => Some(handle_payment_methods_list(state, req)),
        "paymentMethods.create" => Some(handle_payment_methods_create(state, req)),
        "paymentMethods.update" => Some(handle_payment_methods_update(state, req)),
        "paymentMethods.delete" => Some(handle_payment_methods_delete(state, req)),
        "paymentMethods.uploadQr" => Some(handle_payment_methods_upload_qr(state, req)),
        "paymentMethods.exportQr" => Some(handle_payment_methods_export_qr(state, req)),
        _ => None,
    }
}
