//! Validation boundary between untyped spreadsheet rows and the typed tables
//! the engine works on. Rows that can't be typed are dropped and counted here;
//! nothing past this point deals with `serde_json::Value`.

use crate::error::EngineError;
use crate::model::{
    AttendanceRecord, Enrollment, NamedRef, RawAssessmentRecord, RawTables, ReferenceTables,
    ScaleThresholds, Student, TeachingAssignment, WeightConfig, WorkType,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

type Row = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    /// Rows rejected per table, before they reach the engine.
    pub dropped_rows: BTreeMap<String, usize>,
    pub weights_ignored: usize,
}

impl IngestReport {
    fn drop_row(&mut self, table: &str) {
        *self.dropped_rows.entry(table.to_string()).or_insert(0) += 1;
    }

    pub fn dropped(&self, table: &str) -> usize {
        self.dropped_rows.get(table).copied().unwrap_or(0)
    }
}

/// Ids arrive as strings or bare integers depending on the spreadsheet.
pub fn value_as_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        }
        Value::Number(n) => n
            .as_i64()
            .map(|i| i.to_string())
            .or_else(|| n.as_u64().map(|u| u.to_string())),
        _ => None,
    }
}

/// Numbers or numeric strings; accepts a decimal comma and a trailing `%`.
pub fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let t = s.trim().trim_end_matches('%').trim().replace(',', ".");
            if t.is_empty() {
                return None;
            }
            t.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

fn field<'a>(row: &'a Row, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| row.get(*k))
        .find(|v| !v.is_null())
}

fn id_field(row: &Row, keys: &[&str]) -> Option<String> {
    field(row, keys).and_then(value_as_id)
}

fn num_field(row: &Row, keys: &[&str]) -> Option<f64> {
    field(row, keys).and_then(value_as_f64)
}

fn text_field(row: &Row, keys: &[&str]) -> Option<String> {
    field(row, keys).and_then(|v| match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn table_rows<'a>(tables: &'a Row, name: &str) -> Result<Vec<&'a Value>, EngineError> {
    match tables.get(name) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.iter().collect()),
        Some(_) => Err(EngineError::InvalidTable {
            table: name.to_string(),
            message: "must be an array of row objects".to_string(),
        }),
    }
}

/// Runs `parse` over every object row of a table; non-object rows and rows
/// the parser rejects are counted as dropped.
fn parse_table<T>(
    tables: &Row,
    name: &str,
    report: &mut IngestReport,
    parse: impl Fn(&Row) -> Option<T>,
) -> Result<Vec<T>, EngineError> {
    let mut out = Vec::new();
    for v in table_rows(tables, name)? {
        match v.as_object().and_then(|row| parse(row)) {
            Some(item) => out.push(item),
            None => report.drop_row(name),
        }
    }
    Ok(out)
}

fn parse_named(row: &Row) -> Option<NamedRef> {
    let id = id_field(row, &["id"])?;
    let name = text_field(row, &["name", "title", "displayName"])
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| id.clone());
    Some(NamedRef { id, name })
}

fn parse_student(row: &Row) -> Option<Student> {
    let id = id_field(row, &["id", "studentId", "student_id"])?;
    let name = text_field(row, &["name", "fullName", "displayName"])
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| id.clone());
    Some(Student {
        id,
        name,
        class_id: id_field(row, &["classId", "class_id"]),
    })
}

fn parse_enrollment(row: &Row) -> Option<Enrollment> {
    Some(Enrollment {
        student_id: id_field(row, &["studentId", "student_id"])?,
        class_id: id_field(row, &["classId", "class_id"])?,
        term_id: id_field(row, &["termId", "term_id"]),
    })
}

fn parse_assignment(row: &Row) -> Option<TeachingAssignment> {
    Some(TeachingAssignment {
        teacher_id: id_field(row, &["teacherId", "teacher_id"])?,
        class_id: id_field(row, &["classId", "class_id"])?,
        subject_id: id_field(row, &["subjectId", "subject_id"])?,
        term_id: id_field(row, &["termId", "term_id"]),
    })
}

fn parse_presence(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "present" | "late" | "yes" | "true" | "p" | "+" | "1" => Some(true),
            "absent" | "excused" | "sick" | "no" | "false" | "a" | "n" | "-" | "0" => {
                Some(false)
            }
            _ => None,
        },
        _ => None,
    }
}

fn parse_attendance(row: &Row) -> Option<AttendanceRecord> {
    let present = field(row, &["present", "status"]).and_then(parse_presence)?;
    Some(AttendanceRecord {
        student_id: id_field(row, &["studentId", "student_id"])?,
        class_id: id_field(row, &["classId", "class_id"]),
        term_id: id_field(row, &["termId", "term_id"])?,
        present,
    })
}

/// Identifying keys are mandatory; the score fields are left for the
/// normalizer to judge.
fn parse_assessment(row: &Row) -> Option<RawAssessmentRecord> {
    Some(RawAssessmentRecord {
        student_id: id_field(row, &["studentId", "student_id"])?,
        subject_id: id_field(row, &["subjectId", "subject_id"])?,
        term_id: id_field(row, &["termId", "term_id"])?,
        class_id: id_field(row, &["classId", "class_id"]),
        work_type: text_field(row, &["workType", "work_type", "type", "category"])
            .unwrap_or_default(),
        percent: num_field(row, &["percent", "pct"]),
        score: num_field(row, &["score", "points"]),
        max_score: num_field(row, &["maxScore", "max_score", "outOf", "max"]),
    })
}

/// Weight entries come either as rows `{workType, weight}` or as an object
/// keyed by work-type label.
fn parse_weights(tables: &Row, report: &mut IngestReport) -> Result<WeightConfig, EngineError> {
    let mut weights = WeightConfig::default();
    let entries: Vec<(String, Option<f64>)> = match tables.get("weights") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(obj)) => obj
            .iter()
            .map(|(k, v)| (k.clone(), value_as_f64(v)))
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                let row = v.as_object();
                let label = row
                    .and_then(|r| text_field(r, &["workType", "work_type", "type", "category"]))
                    .unwrap_or_default();
                let weight = row.and_then(|r| num_field(r, &["weight", "value"]));
                (label, weight)
            })
            .collect(),
        Some(_) => {
            return Err(EngineError::InvalidTable {
                table: "weights".to_string(),
                message: "must be an array of {workType, weight} rows or an object".to_string(),
            })
        }
    };

    for (label, weight) in entries {
        let applied = match (WorkType::classify(&label), weight) {
            (Some(wt), Some(w)) => weights.set(wt, w),
            _ => false,
        };
        if !applied {
            report.weights_ignored += 1;
        }
    }
    Ok(weights)
}

fn parse_scale(tables: &Row) -> Result<ScaleThresholds, EngineError> {
    let raw = match tables.get("scale") {
        None | Some(Value::Null) => return Ok(ScaleThresholds::default()),
        Some(Value::Object(obj)) => obj,
        Some(_) => {
            return Err(EngineError::InvalidScale(
                "scale must be an object {excellent, good, satisfactory}".to_string(),
            ))
        }
    };
    let defaults = ScaleThresholds::default();
    let get = |keys: &[&str], fallback: f64| -> Result<f64, EngineError> {
        match field(raw, keys) {
            None => Ok(fallback),
            Some(v) => value_as_f64(v).ok_or_else(|| {
                EngineError::InvalidScale(format!("scale.{} must be a number", keys[0]))
            }),
        }
    };
    ScaleThresholds::new(
        get(&["excellent", "5"], defaults.grade_floor(5))?,
        get(&["good", "4"], defaults.grade_floor(4))?,
        get(&["satisfactory", "3"], defaults.grade_floor(3))?,
    )
}

/// Types a whole `tables` payload. Structural problems (a table that is not
/// an array, a malformed scale) fail the load; bad rows are only counted.
pub fn parse_tables(tables: &Value) -> Result<(RawTables, IngestReport), EngineError> {
    let Some(tables) = tables.as_object() else {
        return Err(EngineError::bad_params("tables must be an object"));
    };
    let mut report = IngestReport::default();

    let reference = ReferenceTables {
        students: parse_table(tables, "students", &mut report, parse_student)?,
        teachers: parse_table(tables, "teachers", &mut report, parse_named)?,
        classes: parse_table(tables, "classes", &mut report, parse_named)?,
        subjects: parse_table(tables, "subjects", &mut report, parse_named)?,
        terms: parse_table(tables, "terms", &mut report, parse_named)?,
        enrollments: parse_table(tables, "enrollments", &mut report, parse_enrollment)?,
        assignments: parse_table(tables, "assignments", &mut report, parse_assignment)?,
        attendance: parse_table(tables, "attendance", &mut report, parse_attendance)?,
    };
    let assessments = parse_table(tables, "assessments", &mut report, parse_assessment)?;
    let weights = parse_weights(tables, &mut report)?;
    let scale = parse_scale(tables)?;

    Ok((
        RawTables {
            reference,
            assessments,
            weights,
            scale,
        },
        report,
    ))
}
