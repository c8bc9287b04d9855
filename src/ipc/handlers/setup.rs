use crate::attendance::{AggregationPolicy, DayStatusPolicy, LateCounts};
use crate::db;
use crate::ipc::helpers::{with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

pub const MAX_QR_UPLOAD_BYTES: i64 = 5 * 1024 * 1024;

#[derive(Clone, Copy)]
enum SetupSection {
    Attendance,
    Payments,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "attendance" => Some(Self::Attendance),
            "payments" => Some(Self::Payments),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Attendance => "setup.attendance",
            Self::Payments => "setup.payments",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Attendance => json!({
            "dayStatusPolicy": "worst",
            "lateCounts": "dailyOnly",
            "periodsPerDay": 8
        }),
        SetupSection::Payments => json!({
            "maxQrUploadBytes": MAX_QR_UPLOAD_BYTES,
            "defaultDescription": "Payment"
        }),
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Attendance => match k.as_str() {
                "dayStatusPolicy" => {
                    let s = parse_string_max(v, k, 16)?;
                    if s != "worst" && s != "lastRecorded" {
                        return Err("dayStatusPolicy must be one of: worst, lastRecorded".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "lateCounts" => {
                    let s = parse_string_max(v, k, 16)?;
                    if s != "dailyOnly" && s != "always" && s != "never" {
                        return Err("lateCounts must be one of: dailyOnly, always, never".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "periodsPerDay" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 8)?));
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
            SetupSection::Payments => match k.as_str() {
                "maxQrUploadBytes" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, 1024, 20 * 1024 * 1024)?),
                    );
                }
                "defaultDescription" => {
                    let s = parse_string_max(v, k, 120)?;
                    if s.is_empty() {
                        return Err("defaultDescription must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown payments field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // A saved section that no longer validates is replaced wholesale by defaults.
            if merge_section_patch(section, &mut current, saved_obj).is_err() {
                tracing::warn!(key = section.key(), "ignoring malformed saved setup section");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

#[derive(Debug, Clone, Copy)]
pub struct AttendanceSettings {
    pub policy: AggregationPolicy,
    pub periods_per_day: usize,
}

pub fn attendance_settings(conn: &rusqlite::Connection) -> Result<AttendanceSettings, HandlerErr> {
    let v = load_section(conn, SetupSection::Attendance).map_err(HandlerErr::query)?;
    let day_status = match v.get("dayStatusPolicy").and_then(|x| x.as_str()) {
        Some("lastRecorded") => DayStatusPolicy::LastRecorded,
        _ => DayStatusPolicy::Worst,
    };
    let late_counts = match v.get("lateCounts").and_then(|x| x.as_str()) {
        Some("always") => LateCounts::Always,
        Some("never") => LateCounts::Never,
        _ => LateCounts::DailyOnly,
    };
    let periods_per_day = v
        .get("periodsPerDay")
        .and_then(|x| x.as_u64())
        .unwrap_or(8) as usize;
    Ok(AttendanceSettings {
        policy: AggregationPolicy {
            day_status,
            late_counts,
        },
        periods_per_day,
    })
}

#[derive(Debug, Clone)]
pub struct PaymentsSettings {
    pub max_qr_upload_bytes: u64,
    pub default_description: String,
}

pub fn payments_settings(conn: &rusqlite::Connection) -> Result<PaymentsSettings, HandlerErr> {
    let v = load_section(conn, SetupSection::Payments).map_err(HandlerErr::query)?;
    Ok(PaymentsSettings {
        max_qr_upload_bytes: v
            .get("maxQrUploadBytes")
            .and_then(|x| x.as_u64())
            .unwrap_or(MAX_QR_UPLOAD_BYTES as u64),
        default_description: v
            .get("defaultDescription")
            .and_then(|x| x.as_str())
            .unwrap_or("Payment")
            .to_string(),
    })
}

fn setup_get(conn: &rusqlite::Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let attendance = load_section(conn, SetupSection::Attendance).map_err(HandlerErr::query)?;
    let payments = load_section(conn, SetupSection::Payments).map_err(HandlerErr::query)?;
    Ok(json!({
        "attendance": attendance,
        "payments": payments
    }))
}

fn setup_update(conn: &rusqlite::Connection, params: &Value) -> Result<Value, HandlerErr> {
    let Some(section_raw) = params.get("section").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing section"));
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return Err(HandlerErr::bad_params("unknown section"));
    };
    let Some(patch_obj) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut current = load_section(conn, section).map_err(HandlerErr::query)?;
    merge_section_patch(section, &mut current, patch_obj).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, section.key(), &current)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tracing::info!(section = section_raw, "setup section updated");
    Ok(json!({ "ok": true, "section": section_raw, "values": current }))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> Value {
    with_conn(state, req, setup_get)
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Value {
    with_conn(state, req, setup_update)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
