use crate::attendance::{AttendanceError, AttendanceStatus, MonthKey, Period};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{params_from_iter, types::Value, Connection};
use serde::Serialize;
use serde_json::json;

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("forbidden", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    pub fn query(e: impl std::fmt::Display) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn write(code: &'static str, table: &str, e: impl std::fmt::Display) -> Self {
        Self::new(code, e.to_string()).with_details(json!({ "table": table }))
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<AttendanceError> for HandlerErr {
    fn from(e: AttendanceError) -> Self {
        HandlerErr::new(e.code(), e.to_string())
    }
}

/// Runs `f` against the open workspace and wraps the outcome in a response envelope.
pub fn with_conn<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => {
            tracing::debug!(method = %req.method, code = error.code, "request failed: {}", error.message);
            error.response(&req.id)
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Missing, null and blank all read as `None`; any non-string value is rejected.
pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => {
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be string or null", key))),
    }
}

pub fn get_optional_bool(params: &serde_json::Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn get_string_list(params: &serde_json::Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(arr) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    Ok(arr
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .collect())
}

pub fn parse_month_param(params: &serde_json::Value, key: &str) -> Result<MonthKey, HandlerErr> {
    let raw = get_required_str(params, key)?;
    Ok(raw.parse::<MonthKey>()?)
}

pub fn parse_day_param(params: &serde_json::Value, month: MonthKey) -> Result<u8, HandlerErr> {
    let Some(v) = params.get("day") else {
        return Err(HandlerErr::bad_params("missing day"));
    };
    // Day keys arrive as either numbers or strings ("7").
    let day = match v {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| AttendanceError::InvalidDay(v.to_string()))?;
    let day = u32::try_from(day).map_err(|_| AttendanceError::InvalidDay(day.to_string()))?;
    Ok(month.check_day(day)?)
}

pub fn parse_period_param(params: &serde_json::Value) -> Result<Period, HandlerErr> {
    let raw = get_required_str(params, "period")?;
    Ok(raw.parse::<Period>()?)
}

pub fn parse_status_value(v: &serde_json::Value) -> Result<AttendanceStatus, HandlerErr> {
    let Some(s) = v.as_str() else {
        return Err(AttendanceError::InvalidStatus(v.to_string()).into());
    };
    Ok(s.parse::<AttendanceStatus>()?)
}

/// `params.date` as `YYYY-MM-DD`, defaulting to the local calendar date.
pub fn parse_date_param(params: &serde_json::Value) -> Result<NaiveDate, HandlerErr> {
    match get_optional_str(params, "date")? {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD")),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

pub fn month_of(date: NaiveDate) -> Result<MonthKey, HandlerErr> {
    use chrono::Datelike;
    Ok(MonthKey::new(date.year(), date.month())?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Secretary,
    Student,
}

/// Which students a caller may see or mark. Secretaries and students are pinned
/// to a single grade and section.
#[derive(Debug, Clone)]
pub struct RosterScope {
    pub role: Role,
    pub grade: Option<String>,
    pub section: Option<String>,
}

impl RosterScope {
    pub fn admin() -> Self {
        Self {
            role: Role::Admin,
            grade: None,
            section: None,
        }
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self, HandlerErr> {
        let Some(scope) = params.get("scope").filter(|v| !v.is_null()) else {
            return Ok(Self::admin());
        };
        if !scope.is_object() {
            return Err(HandlerErr::bad_params("scope must be an object"));
        }
        let role = match get_optional_str(scope, "role")?.as_deref() {
            None | Some("admin") => Role::Admin,
            Some("secretary") => Role::Secretary,
            Some("student") => Role::Student,
            Some(other) => return Err(HandlerErr::bad_params(format!("unknown role: {}", other))),
        };
        let grade = get_optional_str(scope, "grade")?;
        let section = get_optional_str(scope, "section")?;
        if role != Role::Admin && (grade.is_none() || section.is_none()) {
            return Err(HandlerErr::forbidden(
                "user not assigned to any section/grade",
            ));
        }
        Ok(Self {
            role,
            grade,
            section,
        })
    }

    pub fn is_restricted(&self) -> bool {
        self.role != Role::Admin
    }

    pub fn allows(&self, grade: &str, section: &str) -> bool {
        if !self.is_restricted() {
            return true;
        }
        self.grade.as_deref() == Some(grade) && self.section.as_deref() == Some(section)
    }

    pub fn describe(&self) -> serde_json::Value {
        json!({
            "role": match self.role {
                Role::Admin => "admin",
                Role::Secretary => "secretary",
                Role::Student => "student",
            },
            "grade": self.grade,
            "section": self.section,
            "restricted": self.is_restricted(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStudent {
    pub id: String,
    pub student_no: String,
    pub student_name: String,
    pub grade: String,
    pub section: String,
    pub adviser: Option<String>,
    pub student_type: String,
}

/// Active students visible to `scope`, further narrowed by optional grade/section
/// filters, ordered by grade, section, name.
pub fn active_roster(
    conn: &Connection,
    scope: &RosterScope,
    grade: Option<&str>,
    section: Option<&str>,
) -> Result<Vec<RosterStudent>, HandlerErr> {
    let mut sql = String::from(
        "SELECT id, student_no, student_name, grade, section, adviser, student_type
         FROM students
         WHERE status = 'ACTIVE'",
    );
    let mut binds: Vec<Value> = Vec::new();
    let grade = if scope.is_restricted() { scope.grade.as_deref() } else { grade };
    let section = if scope.is_restricted() { scope.section.as_deref() } else { section };
    if let Some(g) = grade {
        sql.push_str(" AND grade = ?");
        binds.push(Value::Text(g.to_string()));
    }
    if let Some(s) = section {
        sql.push_str(" AND section = ?");
        binds.push(Value::Text(s.to_string()));
    }
    sql.push_str(" ORDER BY grade, section, student_name");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    stmt.query_map(params_from_iter(binds), |r| {
        Ok(RosterStudent {
            id: r.get(0)?,
            student_no: r.get(1)?,
            student_name: r.get(2)?,
            grade: r.get(3)?,
            section: r.get(4)?,
            adviser: r.get(5)?,
            student_type: r.get(6)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}
