use crate::db;
use crate::ipc::helpers::{get_optional_bool, get_required_str, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn admins_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, email, name, permissions, is_active, created_at, updated_at
             FROM admins
             ORDER BY name, email",
        )
        .map_err(HandlerErr::query)?;
    let admins = stmt
        .query_map([], |r| {
            let permissions: String = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "email": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "permissions": serde_json::from_str::<serde_json::Value>(&permissions)
                    .unwrap_or_else(|_| json!([])),
                "isActive": r.get::<_, i64>(4)? != 0,
                "createdAt": r.get::<_, String>(5)?,
                "updatedAt": r.get::<_, String>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "admins": admins }))
}

fn admins_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_str(params, "email")?.to_ascii_lowercase();
    if !email.contains('@') {
        return Err(HandlerErr::bad_params("email is not valid"));
    }
    let name = get_required_str(params, "name")?;
    let permissions: Vec<String> = match params.get("permissions") {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| HandlerErr::bad_params("permissions must be strings"))
            })
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(HandlerErr::bad_params("permissions must be an array")),
    };

    let exists = conn
        .query_row("SELECT 1 FROM admins WHERE email = ?", [&email], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if exists {
        return Err(HandlerErr::conflict("admin email already exists")
            .with_details(json!({ "email": email })));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = db::now_timestamp();
    let permissions_json = serde_json::to_string(&permissions)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    conn.execute(
        "INSERT INTO admins(id, email, name, permissions, is_active, created_at, updated_at)
         VALUES(?, ?, ?, ?, 1, ?, ?)",
        (&id, &email, &name, &permissions_json, &now, &now),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "admins", e))?;
    tracing::info!(admin_id = %id, email = %email, "admin created");

    Ok(json!({ "adminId": id }))
}

fn admins_set_active(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let admin_id = get_required_str(params, "adminId")?;
    let active = get_optional_bool(params, "active")?
        .ok_or_else(|| HandlerErr::bad_params("missing active"))?;
    let changed = conn
        .execute(
            "UPDATE admins SET is_active = ?, updated_at = ? WHERE id = ?",
            (active as i64, db::now_timestamp(), &admin_id),
        )
        .map_err(|e| HandlerErr::write("db_update_failed", "admins", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("admin not found").with_details(json!({ "adminId": admin_id })));
    }
    Ok(json!({ "ok": true, "isActive": active }))
}

fn handle_admins_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, admins_list)
}

fn handle_admins_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, admins_create)
}

fn handle_admins_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, admins_set_active)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admins.list" => Some(handle_admins_list(state, req)),
        "admins.create" => Some(handle_admins_create(state, req)),
        "admins.setActive" => Some(handle_admins_set_active(state, req)),
        _ => None,
    }
}
