use crate::attendance::{AttendanceRecord, AttendanceStatus, Period};
use chrono::NaiveDate;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct SheetStudent {
    pub id: String,
    pub student_no: String,
    pub student_name: String,
    pub grade: String,
    pub section: String,
    pub adviser: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SheetFilter {
    pub grade: Option<String>,
    pub section: Option<String>,
}

fn csv_field(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn csv_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",")
}

/// Daily attendance sheet for `date`, one row per student with one column per
/// period up to `periods_per_day`. Only records for that day are used.
pub fn daily_attendance_csv(
    date: NaiveDate,
    students: &[SheetStudent],
    records: &[AttendanceRecord],
    filter: &SheetFilter,
    periods_per_day: usize,
) -> String {
    use chrono::Datelike;
    let day = date.day() as u8;
    let periods: Vec<Period> = Period::ALL
        .iter()
        .copied()
        .take(periods_per_day.clamp(1, Period::ALL.len()))
        .collect();

    let mut cells: HashMap<(&str, Period), AttendanceStatus> = HashMap::new();
    for r in records.iter().filter(|r| r.day == day) {
        cells.insert((r.student_id.as_str(), r.period), r.status);
    }

    let grade_label = match filter.grade.as_deref() {
        Some(g) => format!("Grade {}", g),
        None => "All Grades".to_string(),
    };
    let section_label = match filter.section.as_deref() {
        Some(s) => format!("Section {}", s),
        None => "All Sections".to_string(),
    };

    let mut lines: Vec<String> = vec![
        csv_line(&[format!("Attendance Report - {}", date.format("%Y-%m-%d"))]),
        csv_line(&[format!("Grade: {}, Section: {}", grade_label, section_label)]),
        csv_line(&[format!("Total Students: {}", students.len())]),
        String::new(),
    ];

    let mut header: Vec<String> = ["Student ID", "Student Name", "Grade", "Section", "Adviser"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(periods.iter().map(|p| format!("Period {}", p.number())));
    lines.push(csv_line(&header));

    for s in students {
        let mut row = vec![
            s.student_no.clone(),
            s.student_name.clone(),
            if s.grade.is_empty() { "N/A".to_string() } else { s.grade.clone() },
            if s.section.is_empty() { "N/A".to_string() } else { s.section.clone() },
            s.adviser.clone().filter(|a| !a.is_empty()).unwrap_or_else(|| "N/A".to_string()),
        ];
        for p in &periods {
            let cell = cells
                .get(&(s.id.as_str(), *p))
                .map(|st| st.title())
                .unwrap_or("Not Set");
            row.push(cell.to_string());
        }
        lines.push(csv_line(&row));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
