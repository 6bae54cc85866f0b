use crate::aggregate::{
    AggregateContext, AggregateFilter, Cell, Dimension, Matrix, MatrixRow, RowKey,
};
use crate::error::EngineError;
use crate::model::AttendanceRecord;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AttendanceResult {
    Matrix { matrix: Matrix },
    Scalar { value: Cell, count: usize },
}

#[derive(Debug, Clone, Copy, Default)]
struct PresenceAcc {
    present: usize,
    count: usize,
}

impl PresenceAcc {
    fn add(&mut self, a: &AttendanceRecord) {
        self.count += 1;
        if a.present {
            self.present += 1;
        }
    }

    fn cell(&self) -> Cell {
        if self.count == 0 {
            Cell::NoData
        } else {
            Cell::Value(100.0 * (self.present as f64) / (self.count as f64))
        }
    }
}

fn matches(ctx: &AggregateContext<'_>, filter: &AggregateFilter, a: &AttendanceRecord) -> bool {
    if !filter.term.matches(&a.term_id) {
        return false;
    }
    if let Some(s) = &filter.student_id {
        if *s != a.student_id {
            return false;
        }
    }
    if let Some(c) = &filter.class_id {
        if a.class_id.as_deref() != Some(c.as_str()) {
            return false;
        }
    }
    if let Some(level) = filter.grade_level {
        let actual = a.class_id.as_deref().and_then(|c| ctx.grade_level_of(c));
        if actual != Some(level) {
            return false;
        }
    }
    true
}

fn row_key(
    ctx: &AggregateContext<'_>,
    dimension: Dimension,
    a: &AttendanceRecord,
) -> Option<RowKey> {
    match dimension {
        Dimension::Class => a.class_id.as_deref().map(|c| ctx.class_row(c)),
        Dimension::GradeLevel => a.class_id.as_deref().and_then(|c| ctx.grade_level_row(c)),
        Dimension::Student => Some(ctx.student_row(&a.student_id)),
        Dimension::Subject | Dimension::Teacher => None,
    }
}

/// Share of attendance rows marked present, as a percentage. Reads the raw
/// attendance table only; grades play no part.
///
/// Attendance rows carry no subject, so subject and teacher filters or
/// dimensions are rejected.
pub fn attendance_summary(
    ctx: &AggregateContext<'_>,
    filter: &AggregateFilter,
    group_by: Option<Dimension>,
) -> Result<AttendanceResult, EngineError> {
    if filter.subject_id.is_some() || filter.teacher_id.is_some() {
        return Err(EngineError::bad_params(
            "attendance cannot be filtered by subject or teacher",
        ));
    }
    if matches!(group_by, Some(Dimension::Subject) | Some(Dimension::Teacher)) {
        return Err(EngineError::bad_params(
            "attendance can be grouped by class, gradeLevel or student",
        ));
    }

    let rows: Vec<&AttendanceRecord> = ctx
        .reference
        .attendance
        .iter()
        .filter(|a| matches(ctx, filter, a))
        .collect();

    let Some(dimension) = group_by else {
        let mut acc = PresenceAcc::default();
        for a in &rows {
            acc.add(a);
        }
        return Ok(AttendanceResult::Scalar {
            value: acc.cell(),
            count: acc.count,
        });
    };

    // Terms that only appear in attendance get columns too.
    let seen = ctx
        .final_grades
        .iter()
        .map(|g| g.term_id.as_str())
        .chain(rows.iter().map(|a| a.term_id.as_str()));
    let layout = ctx.term_columns(&filter.term, seen);
    let width = layout.columns.len();

    let mut accs: BTreeMap<RowKey, Vec<PresenceAcc>> = BTreeMap::new();
    for a in &rows {
        let Some(key) = row_key(ctx, dimension, a) else {
            continue;
        };
        let row = accs
            .entry(key)
            .or_insert_with(|| vec![PresenceAcc::default(); width]);
        for slot in layout.slots(&a.term_id) {
            row[slot].add(a);
        }
    }

    let rows = accs
        .into_iter()
        .map(|(key, accs)| MatrixRow {
            key: key.key,
            label: key.label,
            cells: accs.iter().map(|a| a.cell()).collect(),
            counts: accs.iter().map(|a| a.count).collect(),
        })
        .collect();

    Ok(AttendanceResult::Matrix {
        matrix: Matrix {
            dimension,
            columns: layout.columns,
            rows,
        },
    })
}
