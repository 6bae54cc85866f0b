use crate::model::{
    FinalGradeRecord, RawAssessmentRecord, ScaleThresholds, WeightConfig, WorkType,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Why a raw row contributed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingKeys,
    NoScore,
    UnknownWorkType,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedScore {
    pub work_type: WorkType,
    /// Always within [0, 1].
    pub value: f64,
}

/// Turns one raw row into a unit-interval score.
///
/// A direct percent wins over `score / max_score`. Any value above 1 is read
/// as being on a 0-100 scale and divided by 100, so "85" and "0.85" both
/// mean 85%. Results are clamped into [0, 1].
pub fn normalize_score(rec: &RawAssessmentRecord) -> Result<NormalizedScore, SkipReason> {
    if rec.student_id.is_empty() || rec.subject_id.is_empty() || rec.term_id.is_empty() {
        return Err(SkipReason::MissingKeys);
    }

    let raw = match rec.percent.filter(|p| p.is_finite()) {
        Some(p) => Some(p),
        None => match (rec.score, rec.max_score) {
            (Some(s), Some(m)) if s.is_finite() && m.is_finite() && m != 0.0 => Some(s / m),
            _ => None,
        },
    };
    let Some(mut value) = raw else {
        return Err(SkipReason::NoScore);
    };
    if value > 1.0 {
        value /= 100.0;
    }

    let work_type = WorkType::classify(&rec.work_type).ok_or(SkipReason::UnknownWorkType)?;
    Ok(NormalizedScore {
        work_type,
        value: value.clamp(0.0, 1.0),
    })
}

/// Per-load counters for rows that were seen and rows that were dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Coverage {
    pub rows_in: usize,
    pub rows_used: usize,
    pub dropped_unparseable: usize,
    pub dropped_no_score: usize,
    pub dropped_unknown_work_type: usize,
}

impl Coverage {
    fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::MissingKeys => self.dropped_unparseable += 1,
            SkipReason::NoScore => self.dropped_no_score += 1,
            SkipReason::UnknownWorkType => self.dropped_unknown_work_type += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BucketSum {
    sum: f64,
    count: usize,
}

#[derive(Debug, Default)]
struct GroupAcc {
    class_id: Option<String>,
    buckets: BTreeMap<WorkType, BucketSum>,
}

/// Weighted mean of the per-bucket means, as a percentage.
///
/// Only buckets holding at least one score take part and the weights are
/// renormalized over them, so a missing bucket is not a phantom zero. If
/// every weight in play is zero the bucket means are averaged unweighted.
/// No buckets at all yields 0.
fn weighted_percent(buckets: &BTreeMap<WorkType, BucketSum>, weights: &WeightConfig) -> f64 {
    let mut sum = 0.0_f64;
    let mut denom = 0.0_f64;
    let mut sum_equal = 0.0_f64;
    let mut denom_equal = 0.0_f64;

    for (work_type, b) in buckets {
        if b.count == 0 {
            continue;
        }
        let mean = b.sum / (b.count as f64);
        let w = weights.weight(*work_type);
        if w > 0.0 {
            sum += mean * w;
            denom += w;
        }
        sum_equal += mean;
        denom_equal += 1.0;
    }

    let avg = if denom > 0.0 {
        sum / denom
    } else if denom_equal > 0.0 {
        sum_equal / denom_equal
    } else {
        0.0
    };
    (100.0 * avg).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Default)]
pub struct RollupOutput {
    pub final_grades: Vec<FinalGradeRecord>,
    pub coverage: Coverage,
}

/// Groups normalized scores by (student, subject, term) and produces one
/// final record per group, ordered by that key.
///
/// The class id comes from the first row of the group that names one.
pub fn rollup(
    records: &[RawAssessmentRecord],
    weights: &WeightConfig,
    scale: &ScaleThresholds,
) -> RollupOutput {
    let mut coverage = Coverage {
        rows_in: records.len(),
        ..Coverage::default()
    };
    let mut groups: BTreeMap<(String, String, String), GroupAcc> = BTreeMap::new();

    for rec in records {
        let norm = match normalize_score(rec) {
            Ok(v) => v,
            Err(reason) => {
                coverage.record_skip(reason);
                continue;
            }
        };
        coverage.rows_used += 1;

        let key = (
            rec.student_id.clone(),
            rec.subject_id.clone(),
            rec.term_id.clone(),
        );
        let group = groups.entry(key).or_default();
        if group.class_id.is_none() {
            group.class_id = rec.class_id.clone().filter(|c| !c.is_empty());
        }
        let bucket = group.buckets.entry(norm.work_type).or_default();
        bucket.sum += norm.value;
        bucket.count += 1;
    }

    let final_grades = groups
        .into_iter()
        .map(|((student_id, subject_id, term_id), group)| {
            let percent = weighted_percent(&group.buckets, weights);
            FinalGradeRecord {
                student_id,
                subject_id,
                term_id,
                class_id: group.class_id,
                percent,
                grade: scale.grade_for(percent),
            }
        })
        .collect();

    RollupOutput {
        final_grades,
        coverage,
    }
}
