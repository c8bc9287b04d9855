use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttendanceError {
    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid day: {0}")]
    InvalidDay(String),

    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    #[error("invalid month: {0}")]
    InvalidMonth(String),
}

impl AttendanceError {
    /// Wire error code used in IPC responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidStatus(_) => "invalid_status",
            Self::InvalidDay(_) => "invalid_day",
            Self::InvalidPeriod(_) => "invalid_period",
            Self::InvalidMonth(_) => "invalid_month",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
            Self::Excused => "excused",
        }
    }

    /// Capitalised form used in exports ("Present", "Late", ...).
    pub fn title(self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Absent => "Absent",
            Self::Late => "Late",
            Self::Excused => "Excused",
        }
    }

    // Higher is worse.
    fn severity(self) -> u8 {
        match self {
            Self::Present => 0,
            Self::Excused => 1,
            Self::Late => 2,
            Self::Absent => 3,
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = AttendanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            "late" => Ok(Self::Late),
            "excused" => Ok(Self::Excused),
            _ => Err(AttendanceError::InvalidStatus(s.to_string())),
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "p1")]
    P1,
    #[serde(rename = "p2")]
    P2,
    #[serde(rename = "p3")]
    P3,
    #[serde(rename = "p4")]
    P4,
    #[serde(rename = "p5")]
    P5,
    #[serde(rename = "p6")]
    P6,
    #[serde(rename = "p7")]
    P7,
    #[serde(rename = "p8")]
    P8,
}

impl Period {
    pub const ALL: [Period; 8] = [
        Period::P1,
        Period::P2,
        Period::P3,
        Period::P4,
        Period::P5,
        Period::P6,
        Period::P7,
        Period::P8,
    ];

    pub fn number(self) -> u8 {
        match self {
            Self::P1 => 1,
            Self::P2 => 2,
            Self::P3 => 3,
            Self::P4 => 4,
            Self::P5 => 5,
            Self::P6 => 6,
            Self::P7 => 7,
            Self::P8 => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::P1 => "p1",
            Self::P2 => "p2",
            Self::P3 => "p3",
            Self::P4 => "p4",
            Self::P5 => "p5",
            Self::P6 => "p6",
            Self::P7 => "p7",
            Self::P8 => "p8",
        }
    }
}

impl FromStr for Period {
    type Err = AttendanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        Period::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == t)
            .ok_or_else(|| AttendanceError::InvalidPeriod(s.to_string()))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A calendar month in `YYYY-MM` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Result<Self, AttendanceError> {
        if !(1..=12).contains(&month) || !(1900..=9999).contains(&year) {
            return Err(AttendanceError::InvalidMonth(format!(
                "{:04}-{:02}",
                year, month
            )));
        }
        Ok(Self { year, month })
    }

    pub fn days_in_month(self) -> u8 {
        let leap = (self.year % 4 == 0 && self.year % 100 != 0) || self.year % 400 == 0;
        match self.month {
            1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
            4 | 6 | 9 | 11 => 30,
            2 if leap => 29,
            _ => 28,
        }
    }

    pub fn check_day(self, day: u32) -> Result<u8, AttendanceError> {
        if day == 0 || day > u32::from(self.days_in_month()) {
            return Err(AttendanceError::InvalidDay(format!(
                "{} is out of range for {}",
                day, self
            )));
        }
        Ok(day as u8)
    }
}

impl FromStr for MonthKey {
    type Err = AttendanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let bad = || AttendanceError::InvalidMonth(s.to_string());
        let (y, m) = t.split_once('-').ok_or_else(bad)?;
        if y.len() != 4 || m.len() != 2 {
            return Err(bad());
        }
        let year = y.parse::<i32>().map_err(|_| bad())?;
        let month = m.parse::<u32>().map_err(|_| bad())?;
        MonthKey::new(year, month).map_err(|_| bad())
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub month: MonthKey,
    pub day: u8,
    pub period: Period,
    pub status: AttendanceStatus,
}

impl AttendanceRecord {
    pub fn new(
        student_id: impl Into<String>,
        month: MonthKey,
        day: u32,
        period: Period,
        status: AttendanceStatus,
    ) -> Result<Self, AttendanceError> {
        let day = month.check_day(day)?;
        Ok(Self {
            student_id: student_id.into(),
            month,
            day,
            period,
            status,
        })
    }

    /// Builds a record from untyped wire/store values, rejecting anything outside
    /// the closed domains before it can reach an aggregate.
    pub fn parse(
        student_id: &str,
        month: &str,
        day: i64,
        period: &str,
        status: &str,
    ) -> Result<Self, AttendanceError> {
        let month: MonthKey = month.parse()?;
        let day = u32::try_from(day).map_err(|_| AttendanceError::InvalidDay(day.to_string()))?;
        let period: Period = period.parse()?;
        let status: AttendanceStatus = status.parse()?;
        Self::new(student_id, month, day, period, status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DayStatusPolicy {
    /// Absent > Late > Excused > Present.
    #[default]
    Worst,
    /// Last record in input order wins.
    LastRecorded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LateCounts {
    /// Daily cohort rate counts late as attended, the monthly student rate does not.
    #[default]
    DailyOnly,
    Always,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationPolicy {
    pub day_status: DayStatusPolicy,
    pub late_counts: LateCounts,
}

impl AggregationPolicy {
    fn late_in_daily_rate(&self) -> bool {
        matches!(self.late_counts, LateCounts::DailyOnly | LateCounts::Always)
    }

    fn late_in_monthly_rate(&self) -> bool {
        matches!(self.late_counts, LateCounts::Always)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DayLabel {
    #[serde(rename = "Present")]
    Present,
    #[serde(rename = "Absent")]
    Absent,
    #[serde(rename = "Late")]
    Late,
    #[serde(rename = "Partially Present")]
    PartiallyPresent,
    #[serde(rename = "No Data")]
    NoData,
}

impl DayLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Absent => "Absent",
            Self::Late => "Late",
            Self::PartiallyPresent => "Partially Present",
            Self::NoData => "No Data",
        }
    }
}

impl fmt::Display for DayLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortSummary {
    pub day: u8,
    pub total_students: usize,
    pub students_with_any_record_today: usize,
    pub present_today: usize,
    pub late_today: usize,
    pub absent_today: usize,
    pub excused_today: usize,
    pub not_marked: usize,
    pub attendance_rate_percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub student_id: String,
    pub total_periods_in_window: usize,
    pub present_count: usize,
    pub absent_count: usize,
    pub late_count: usize,
    pub excused_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_status: Option<DayLabel>,
    pub rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDaySummary {
    pub student_id: String,
    pub day: u8,
    pub total: usize,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub excused: usize,
    pub label: DayLabel,
}

#[derive(Debug, Clone, Copy, Default)]
struct StatusCounts {
    present: usize,
    absent: usize,
    late: usize,
    excused: usize,
}

impl StatusCounts {
    fn add(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::Late => self.late += 1,
            AttendanceStatus::Excused => self.excused += 1,
        }
    }

    fn total(&self) -> usize {
        self.present + self.absent + self.late + self.excused
    }
}

/// Rounded percentage, half away from zero, clamped to 0..=100.
pub fn percent(numerator: usize, denominator: usize) -> u32 {
    if denominator == 0 {
        return 0;
    }
    let n = numerator.min(denominator) as f64;
    let v = (100.0 * n / denominator as f64).round();
    v.clamp(0.0, 100.0) as u32
}

/// Single status for one student's periods on one day.
pub fn day_status(
    statuses: &[AttendanceStatus],
    policy: DayStatusPolicy,
) -> Option<AttendanceStatus> {
    match policy {
        DayStatusPolicy::LastRecorded => statuses.last().copied(),
        // Ties keep the first occurrence; statuses of equal severity are equal.
        DayStatusPolicy::Worst => statuses
            .iter()
            .copied()
            .fold(None, |acc: Option<AttendanceStatus>, s| match acc {
                Some(a) if a.severity() >= s.severity() => Some(a),
                _ => Some(s),
            }),
    }
}

pub fn derive_day_label(period_statuses: &[AttendanceStatus]) -> DayLabel {
    if period_statuses.is_empty() {
        return DayLabel::NoData;
    }
    let mut counts = StatusCounts::default();
    for s in period_statuses {
        counts.add(*s);
    }
    let total = counts.total();
    if counts.absent == total {
        DayLabel::Absent
    } else if counts.present == total {
        DayLabel::Present
    } else if counts.late > 0 {
        DayLabel::Late
    } else {
        // Present/absent mixes land here, and so does anything involving excused.
        DayLabel::PartiallyPresent
    }
}

/// Cohort roll-up for one day. Records for other days or for students outside
/// `roster` are ignored. The roster is treated as a set: a student id listed
/// twice counts once in `total_students` and `not_marked`.
pub fn summarize_day<S: AsRef<str>>(
    records: &[AttendanceRecord],
    roster: &[S],
    day: u32,
    policy: &AggregationPolicy,
) -> Result<CohortSummary, AttendanceError> {
    if day == 0 || day > 31 {
        return Err(AttendanceError::InvalidDay(day.to_string()));
    }
    let day = day as u8;

    let eligible: HashSet<&str> = roster.iter().map(|s| s.as_ref()).collect();

    // Keep first-seen student order so LastRecorded stays a function of input order.
    let mut order: Vec<&str> = Vec::new();
    let mut by_student: HashMap<&str, Vec<AttendanceStatus>> = HashMap::new();
    for r in records {
        if r.day != day || !eligible.contains(r.student_id.as_str()) {
            continue;
        }
        let entry = by_student.entry(r.student_id.as_str()).or_insert_with(|| {
            order.push(r.student_id.as_str());
            Vec::new()
        });
        entry.push(r.status);
    }

    let mut counts = StatusCounts::default();
    for sid in &order {
        let statuses = by_student.get(sid).map(|v| v.as_slice()).unwrap_or(&[]);
        if let Some(s) = day_status(statuses, policy.day_status) {
            counts.add(s);
        }
    }

    let marked = order.len();
    let attended = if policy.late_in_daily_rate() {
        counts.present + counts.late
    } else {
        counts.present
    };

    Ok(CohortSummary {
        day,
        total_students: eligible.len(),
        students_with_any_record_today: marked,
        present_today: counts.present,
        late_today: counts.late,
        absent_today: counts.absent,
        excused_today: counts.excused,
        not_marked: eligible.len().saturating_sub(marked),
        attendance_rate_percent: percent(attended, marked),
    })
}

/// Per-student roll-up over a month window. Only records for `student_id` count.
pub fn summarize_month(
    records: &[AttendanceRecord],
    student_id: &str,
    policy: &AggregationPolicy,
) -> StudentSummary {
    let mut counts = StatusCounts::default();
    for r in records.iter().filter(|r| r.student_id == student_id) {
        counts.add(r.status);
    }
    let total = counts.total();
    let attended = if policy.late_in_monthly_rate() {
        counts.present + counts.late
    } else {
        counts.present
    };

    StudentSummary {
        student_id: student_id.to_string(),
        total_periods_in_window: total,
        present_count: counts.present,
        absent_count: counts.absent,
        late_count: counts.late,
        excused_count: counts.excused,
        day_status: None,
        rate: percent(attended, total),
    }
}

pub fn summarize_student_day(
    records: &[AttendanceRecord],
    student_id: &str,
    day: u32,
) -> Result<StudentDaySummary, AttendanceError> {
    if day == 0 || day > 31 {
        return Err(AttendanceError::InvalidDay(day.to_string()));
    }
    let mut periods: Vec<(Period, AttendanceStatus)> = records
        .iter()
        .filter(|r| r.student_id == student_id && u32::from(r.day) == day)
        .map(|r| (r.period, r.status))
        .collect();
    periods.sort_by_key(|(p, _)| *p);

    let statuses: Vec<AttendanceStatus> = periods.iter().map(|(_, s)| *s).collect();
    let mut counts = StatusCounts::default();
    for s in &statuses {
        counts.add(*s);
    }

    Ok(StudentDaySummary {
        student_id: student_id.to_string(),
        day: day as u8,
        total: counts.total(),
        present: counts.present,
        absent: counts.absent,
        late: counts.late,
        excused: counts.excused,
        label: derive_day_label(&statuses),
    })
}

/// Day label for every day of the month that has at least one record, ascending.
pub fn day_labels_for_month(records: &[AttendanceRecord], student_id: &str) -> Vec<(u8, DayLabel)> {
    let mut by_day: HashMap<u8, Vec<AttendanceStatus>> = HashMap::new();
    for r in records.iter().filter(|r| r.student_id == student_id) {
        by_day.entry(r.day).or_default().push(r.status);
    }
    let mut out: Vec<(u8, DayLabel)> = by_day
        .into_iter()
        .map(|(d, statuses)| (d, derive_day_label(&statuses)))
        .collect();
    out.sort_by_key(|(d, _)| *d);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use AttendanceStatus::{Absent, Excused, Late, Present};

    fn month() -> MonthKey {
        "2025-03".parse().expect("month")
    }

    fn rec(student: &str, day: u32, period: Period, status: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord::new(student, month(), day, period, status).expect("record")
    }

    #[test]
    fn day_labels_follow_priority() {
        assert_eq!(derive_day_label(&[]), DayLabel::NoData);
        assert_eq!(derive_day_label(&[Present, Present]), DayLabel::Present);
        assert_eq!(derive_day_label(&[Absent, Absent]), DayLabel::Absent);
        assert_eq!(derive_day_label(&[Present, Absent]), DayLabel::PartiallyPresent);
        assert_eq!(derive_day_label(&[Late, Present]), DayLabel::Late);
        assert_eq!(derive_day_label(&[Late, Absent]), DayLabel::Late);
    }

    #[test]
    fn day_label_falls_back_for_excused_mixes() {
        assert_eq!(derive_day_label(&[Present, Excused]), DayLabel::PartiallyPresent);
        assert_eq!(derive_day_label(&[Excused]), DayLabel::PartiallyPresent);
        assert_eq!(DayLabel::PartiallyPresent.to_string(), "Partially Present");
    }

    #[test]
    fn cohort_scenario_counts_marked_students_only() {
        let roster = ["S1", "S2", "S3"];
        let records = vec![rec("S1", 5, Period::P1, Present), rec("S2", 5, Period::P1, Absent)];
        let s = summarize_day(&records, &roster, 5, &AggregationPolicy::default()).expect("summary");
        assert_eq!(s.present_today, 1);
        assert_eq!(s.absent_today, 1);
        assert_eq!(s.late_today, 0);
        assert_eq!(s.students_with_any_record_today, 2);
        assert_eq!(s.attendance_rate_percent, 50);
        assert_eq!(s.total_students, 3);
        assert_eq!(s.not_marked, 1);
    }

    #[test]
    fn duplicate_roster_entries_count_once() {
        let roster = ["S1", "S1", "S2"];
        let records = vec![rec("S1", 5, Period::P1, Present)];
        let s = summarize_day(&records, &roster, 5, &AggregationPolicy::default()).expect("summary");
        assert_eq!(s.total_students, 2);
        assert_eq!(s.not_marked, 1);
        assert_eq!(s.students_with_any_record_today, 1);
    }

    #[test]
    fn empty_records_yield_zero_summary() {
        let roster = ["S1", "S2"];
        let s = summarize_day(&[], &roster, 1, &AggregationPolicy::default()).expect("summary");
        assert_eq!(s.present_today + s.late_today + s.absent_today, 0);
        assert_eq!(s.students_with_any_record_today, 0);
        assert_eq!(s.attendance_rate_percent, 0);
        assert_eq!(s.total_students, 2);
    }

    #[test]
    fn other_days_and_off_roster_students_are_ignored() {
        let roster = ["S1"];
        let records = vec![
            rec("S1", 4, Period::P1, Absent),
            rec("S1", 5, Period::P1, Present),
            rec("S9", 5, Period::P1, Absent),
        ];
        let s = summarize_day(&records, &roster, 5, &AggregationPolicy::default()).expect("summary");
        assert_eq!(s.students_with_any_record_today, 1);
        assert_eq!(s.present_today, 1);
        assert_eq!(s.absent_today, 0);
        assert_eq!(s.attendance_rate_percent, 100);
    }

    #[test]
    fn late_counts_toward_daily_rate_by_default() {
        let roster = ["S1", "S2", "S3", "S4"];
        let records = vec![
            rec("S1", 2, Period::P1, Present),
            rec("S2", 2, Period::P1, Late),
            rec("S3", 2, Period::P1, Absent),
            rec("S4", 2, Period::P1, Excused),
        ];
        let default = summarize_day(&records, &roster, 2, &AggregationPolicy::default()).expect("summary");
        assert_eq!(default.attendance_rate_percent, 50);
        assert_eq!(default.excused_today, 1);

        let never = AggregationPolicy {
            late_counts: LateCounts::Never,
            ..AggregationPolicy::default()
        };
        let s = summarize_day(&records, &roster, 2, &never).expect("summary");
        assert_eq!(s.attendance_rate_percent, 25);
    }

    #[test]
    fn worst_policy_is_order_independent() {
        let roster = ["S1"];
        let a = vec![rec("S1", 3, Period::P1, Absent), rec("S1", 3, Period::P2, Present)];
        let b = vec![rec("S1", 3, Period::P2, Present), rec("S1", 3, Period::P1, Absent)];
        let policy = AggregationPolicy::default();
        let sa = summarize_day(&a, &roster, 3, &policy).expect("summary");
        let sb = summarize_day(&b, &roster, 3, &policy).expect("summary");
        assert_eq!(sa, sb);
        assert_eq!(sa.absent_today, 1);
        assert_eq!(sa.present_today, 0);
    }

    #[test]
    fn last_recorded_policy_takes_the_final_record() {
        let roster = ["S1"];
        let records = vec![rec("S1", 3, Period::P1, Absent), rec("S1", 3, Period::P2, Present)];
        let policy = AggregationPolicy {
            day_status: DayStatusPolicy::LastRecorded,
            ..AggregationPolicy::default()
        };
        let s = summarize_day(&records, &roster, 3, &policy).expect("summary");
        assert_eq!(s.present_today, 1);
        assert_eq!(s.absent_today, 0);
    }

    #[test]
    fn worst_day_status_ranks_absent_then_late_then_excused() {
        assert_eq!(day_status(&[], DayStatusPolicy::Worst), None);
        assert_eq!(day_status(&[Present, Late], DayStatusPolicy::Worst), Some(Late));
        assert_eq!(day_status(&[Excused, Present], DayStatusPolicy::Worst), Some(Excused));
        assert_eq!(day_status(&[Late, Absent, Excused], DayStatusPolicy::Worst), Some(Absent));
    }

    #[test]
    fn month_scenario_counts_present_only() {
        let records = vec![
            rec("S1", 1, Period::P1, Present),
            rec("S1", 1, Period::P2, Present),
            rec("S1", 2, Period::P1, Absent),
            rec("S1", 3, Period::P1, Late),
            rec("S2", 3, Period::P1, Absent),
        ];
        let s = summarize_month(&records, "S1", &AggregationPolicy::default());
        assert_eq!(s.present_count, 2);
        assert_eq!(s.absent_count, 1);
        assert_eq!(s.late_count, 1);
        assert_eq!(s.excused_count, 0);
        assert_eq!(s.total_periods_in_window, 4);
        assert_eq!(s.rate, 50);

        let always = AggregationPolicy {
            late_counts: LateCounts::Always,
            ..AggregationPolicy::default()
        };
        assert_eq!(summarize_month(&records, "S1", &always).rate, 75);
    }

    #[test]
    fn month_counts_always_sum_to_total() {
        let mut records = Vec::new();
        for (i, status) in [Present, Absent, Late, Excused, Present, Late, Excused]
            .into_iter()
            .enumerate()
        {
            records.push(rec("S1", (i as u32 % 28) + 1, Period::ALL[i % 8], status));
        }
        let s = summarize_month(&records, "S1", &AggregationPolicy::default());
        assert_eq!(
            s.present_count + s.absent_count + s.late_count + s.excused_count,
            s.total_periods_in_window
        );
        assert!(s.rate <= 100);
        assert_eq!(summarize_month(&[], "S1", &AggregationPolicy::default()).rate, 0);
    }

    #[test]
    fn summaries_are_idempotent() {
        let roster = ["S1", "S2"];
        let records = vec![rec("S1", 9, Period::P3, Late), rec("S2", 9, Period::P1, Present)];
        let policy = AggregationPolicy::default();
        assert_eq!(
            summarize_day(&records, &roster, 9, &policy),
            summarize_day(&records, &roster, 9, &policy)
        );
        assert_eq!(
            summarize_month(&records, "S1", &policy),
            summarize_month(&records, "S1", &policy)
        );
    }

    #[test]
    fn percent_rounds_half_up_and_clamps() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(1, 8), 13);
        assert_eq!(percent(5, 4), 100);
    }

    #[test]
    fn parse_rejects_out_of_domain_values() {
        assert!(matches!(
            AttendanceRecord::parse("S1", "2025-03", 3, "p1", "tardy"),
            Err(AttendanceError::InvalidStatus(_))
        ));
        assert!(matches!(
            AttendanceRecord::parse("S1", "2025-03", 3, "p9", "present"),
            Err(AttendanceError::InvalidPeriod(_))
        ));
        assert!(matches!(
            AttendanceRecord::parse("S1", "2025-02", 29, "p1", "present"),
            Err(AttendanceError::InvalidDay(_))
        ));
        assert!(matches!(
            AttendanceRecord::parse("S1", "2025-13", 1, "p1", "present"),
            Err(AttendanceError::InvalidMonth(_))
        ));
        assert!(AttendanceRecord::parse("S1", "2024-02", 29, "P2", " Late ").is_ok());
    }

    #[test]
    fn invalid_target_day_is_rejected() {
        let roster: [&str; 0] = [];
        let err = summarize_day(&[], &roster, 0, &AggregationPolicy::default()).unwrap_err();
        assert_eq!(err.code(), "invalid_day");
        assert!(summarize_student_day(&[], "S1", 32).is_err());
    }

    #[test]
    fn student_day_summary_counts_periods() {
        let records = vec![
            rec("S1", 7, Period::P2, Absent),
            rec("S1", 7, Period::P1, Present),
            rec("S1", 8, Period::P1, Absent),
        ];
        let s = summarize_student_day(&records, "S1", 7).expect("day");
        assert_eq!(s.total, 2);
        assert_eq!(s.present, 1);
        assert_eq!(s.absent, 1);
        assert_eq!(s.label, DayLabel::PartiallyPresent);

        let labels = day_labels_for_month(&records, "S1");
        assert_eq!(labels, vec![(7, DayLabel::PartiallyPresent), (8, DayLabel::Absent)]);
    }

    #[test]
    fn policy_deserializes_from_camel_case() {
        let p: AggregationPolicy =
            serde_json::from_str(r#"{"dayStatus":"lastRecorded","lateCounts":"always"}"#)
                .expect("policy");
        assert_eq!(p.day_status, DayStatusPolicy::LastRecorded);
        assert_eq!(p.late_counts, LateCounts::Always);
    }
}
