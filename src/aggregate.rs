use crate::error::EngineError;
use crate::ingest::value_as_id;
use crate::model::{
    parse_grade_level, FinalGradeRecord, NamedRef, ReferenceTables, StatusMap, StudentStatus,
};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const ALL_TERMS_COLUMN: &str = "all";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TermSelector {
    /// Pools every term's records together.
    #[default]
    All,
    Term(String),
}

impl TermSelector {
    pub(crate) fn matches(&self, term_id: &str) -> bool {
        match self {
            TermSelector::All => true,
            TermSelector::Term(t) => t == term_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateFilter {
    pub term: TermSelector,
    pub class_id: Option<String>,
    pub subject_id: Option<String>,
    pub grade_level: Option<i64>,
    pub teacher_id: Option<String>,
    pub student_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    MeanGrade,
    /// Share of grades 4 and 5.
    QualityPercent,
    MeanPercent,
    /// Share of grades 3 and above.
    SuccessPercent,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::MeanGrade,
        Metric::QualityPercent,
        Metric::MeanPercent,
        Metric::SuccessPercent,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == s)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::MeanGrade => "meanGrade",
            Metric::QualityPercent => "qualityPercent",
            Metric::MeanPercent => "meanPercent",
            Metric::SuccessPercent => "successPercent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Dimension {
    Class,
    Subject,
    GradeLevel,
    Teacher,
    Student,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Class,
        Dimension::Subject,
        Dimension::GradeLevel,
        Dimension::Teacher,
        Dimension::Student,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == s)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Class => "class",
            Dimension::Subject => "subject",
            Dimension::GradeLevel => "gradeLevel",
            Dimension::Teacher => "teacher",
            Dimension::Student => "student",
        }
    }
}

/// A computed number, or nothing to compute from. Serialized as a JSON
/// number or `null`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    Value(f64),
    NoData,
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Value(v) => serializer.serialize_f64(*v),
            Cell::NoData => serializer.serialize_none(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub key: String,
    pub label: String,
    /// Set only on the column pooling every term.
    pub pooled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixRow {
    pub key: String,
    pub label: String,
    pub cells: Vec<Cell>,
    pub counts: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Matrix {
    pub dimension: Dimension,
    pub columns: Vec<Column>,
    pub rows: Vec<MatrixRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AggregateResult {
    Matrix { metric: Metric, matrix: Matrix },
    Scalar { metric: Metric, value: Cell, count: usize },
}

#[derive(Debug, Clone, Copy, Default)]
struct MetricAcc {
    count: usize,
    grade_sum: f64,
    percent_sum: f64,
    quality: usize,
    success: usize,
}

impl MetricAcc {
    fn add(&mut self, g: &FinalGradeRecord) {
        self.count += 1;
        self.grade_sum += g.grade as f64;
        self.percent_sum += g.percent;
        if g.grade >= 4 {
            self.quality += 1;
        }
        if g.grade >= 3 {
            self.success += 1;
        }
    }

    fn cell(&self, metric: Metric) -> Cell {
        if self.count == 0 {
            return Cell::NoData;
        }
        let n = self.count as f64;
        Cell::Value(match metric {
            Metric::MeanGrade => self.grade_sum / n,
            Metric::QualityPercent => 100.0 * (self.quality as f64) / n,
            Metric::MeanPercent => self.percent_sum / n,
            Metric::SuccessPercent => 100.0 * (self.success as f64) / n,
        })
    }
}

/// Row identity with its display order: position in the reference list, or
/// the grade level itself. Ids missing from the reference list sort last.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct RowKey {
    pub(crate) order: usize,
    pub(crate) key: String,
    pub(crate) label: String,
}

/// Read-only view over one computed snapshot.
#[derive(Debug, Clone, Copy)]
pub struct AggregateContext<'a> {
    pub final_grades: &'a [FinalGradeRecord],
    pub statuses: &'a StatusMap,
    pub reference: &'a ReferenceTables,
}

fn position(list: &[NamedRef], id: &str) -> Option<usize> {
    list.iter().position(|r| r.id == id)
}

impl<'a> AggregateContext<'a> {
    fn named_row(&self, list: &[NamedRef], id: &str) -> RowKey {
        match position(list, id) {
            Some(i) => RowKey {
                order: i,
                key: id.to_string(),
                label: list[i].name.clone(),
            },
            None => RowKey {
                order: usize::MAX,
                key: id.to_string(),
                label: id.to_string(),
            },
        }
    }

    pub(crate) fn grade_level_of(&self, class_id: &str) -> Option<i64> {
        self.reference
            .classes
            .iter()
            .find(|c| c.id == class_id)
            .and_then(|c| parse_grade_level(&c.name))
    }

    fn teachers_for(&self, g: &FinalGradeRecord) -> BTreeSet<&'a str> {
        let Some(class_id) = g.class_id.as_deref() else {
            return BTreeSet::new();
        };
        self.reference
            .assignments
            .iter()
            .filter(|a| a.covers(class_id, &g.subject_id, &g.term_id))
            .map(|a| a.teacher_id.as_str())
            .collect()
    }

    pub fn matches(&self, filter: &AggregateFilter, g: &FinalGradeRecord) -> bool {
        if !filter.term.matches(&g.term_id) {
            return false;
        }
        if let Some(s) = &filter.student_id {
            if *s != g.student_id {
                return false;
            }
        }
        if let Some(s) = &filter.subject_id {
            if *s != g.subject_id {
                return false;
            }
        }
        if let Some(c) = &filter.class_id {
            if g.class_id.as_deref() != Some(c.as_str()) {
                return false;
            }
        }
        if let Some(level) = filter.grade_level {
            let actual = g.class_id.as_deref().and_then(|c| self.grade_level_of(c));
            if actual != Some(level) {
                return false;
            }
        }
        if let Some(t) = &filter.teacher_id {
            if !self.teachers_for(g).contains(t.as_str()) {
                return false;
            }
        }
        true
    }

    pub fn filtered(&self, filter: &AggregateFilter) -> Vec<&'a FinalGradeRecord> {
        self.final_grades
            .iter()
            .filter(|g| self.matches(filter, g))
            .collect()
    }

    /// Rows a record belongs to. Usually one; a record taught by several
    /// teachers lands in each of their rows, and a record with no resolvable
    /// class has no class or grade-level row.
    pub(crate) fn row_keys(&self, dimension: Dimension, g: &FinalGradeRecord) -> Vec<RowKey> {
        let r = self.reference;
        match dimension {
            Dimension::Class => g
                .class_id
                .as_deref()
                .map(|c| vec![self.class_row(c)])
                .unwrap_or_default(),
            Dimension::Subject => vec![self.named_row(&r.subjects, &g.subject_id)],
            Dimension::GradeLevel => g
                .class_id
                .as_deref()
                .and_then(|c| self.grade_level_row(c))
                .map(|k| vec![k])
                .unwrap_or_default(),
            Dimension::Teacher => self
                .teachers_for(g)
                .into_iter()
                .map(|t| self.named_row(&r.teachers, t))
                .collect(),
            Dimension::Student => vec![self.student_row(&g.student_id)],
        }
    }

    pub(crate) fn class_row(&self, class_id: &str) -> RowKey {
        self.named_row(&self.reference.classes, class_id)
    }

    pub(crate) fn grade_level_row(&self, class_id: &str) -> Option<RowKey> {
        self.grade_level_of(class_id).map(|level| RowKey {
            order: usize::try_from(level).unwrap_or(usize::MAX),
            key: level.to_string(),
            label: level.to_string(),
        })
    }

    pub(crate) fn student_row(&self, student_id: &str) -> RowKey {
        let students = &self.reference.students;
        match students.iter().position(|s| s.id == student_id) {
            Some(i) => RowKey {
                order: i,
                key: student_id.to_string(),
                label: students[i].name.clone(),
            },
            None => RowKey {
                order: usize::MAX,
                key: student_id.to_string(),
                label: student_id.to_string(),
            },
        }
    }

    /// Whether `id` names a term in the reference list or in any loaded row.
    pub(crate) fn knows_term(&self, id: &str) -> bool {
        let r = self.reference;
        r.terms.iter().any(|t| t.id == id)
            || self.final_grades.iter().any(|g| g.term_id == id)
            || r.attendance.iter().any(|a| a.term_id == id)
    }

    fn knows_class(&self, id: &str) -> bool {
        let r = self.reference;
        r.classes.iter().any(|c| c.id == id)
            || r.students.iter().any(|s| s.class_id.as_deref() == Some(id))
            || self.final_grades.iter().any(|g| g.class_id.as_deref() == Some(id))
    }

    fn knows_subject(&self, id: &str) -> bool {
        self.reference.subjects.iter().any(|s| s.id == id)
            || self.final_grades.iter().any(|g| g.subject_id == id)
    }

    fn knows_teacher(&self, id: &str) -> bool {
        let r = self.reference;
        r.teachers.iter().any(|t| t.id == id) || r.assignments.iter().any(|a| a.teacher_id == id)
    }

    fn knows_student(&self, id: &str) -> bool {
        self.reference.students.iter().any(|s| s.id == id)
            || self.final_grades.iter().any(|g| g.student_id == id)
    }

    /// Term columns in reference order. Terms in `seen` that the reference
    /// list lacks follow in id order. "All terms" adds a trailing pooled
    /// column, addressed by position only so it never shadows a real term.
    pub(crate) fn term_columns<'t>(
        &self,
        term: &TermSelector,
        seen: impl IntoIterator<Item = &'t str>,
    ) -> TermColumns {
        let terms = &self.reference.terms;
        let mut columns: Vec<Column> = match term {
            TermSelector::Term(t) => vec![Column {
                key: t.clone(),
                label: position(terms, t)
                    .map(|i| terms[i].name.clone())
                    .unwrap_or_else(|| t.clone()),
                pooled: false,
            }],
            TermSelector::All => {
                let mut cols: Vec<Column> = terms
                    .iter()
                    .map(|t| Column {
                        key: t.id.clone(),
                        label: t.name.clone(),
                        pooled: false,
                    })
                    .collect();
                let extra: BTreeSet<&str> = seen
                    .into_iter()
                    .filter(|t| position(terms, t).is_none())
                    .collect();
                cols.extend(extra.into_iter().map(|t| Column {
                    key: t.to_string(),
                    label: t.to_string(),
                    pooled: false,
                }));
                cols
            }
        };

        let mut index = HashMap::new();
        for (i, c) in columns.iter().enumerate() {
            index.entry(c.key.clone()).or_insert(i);
        }
        let pooled = match term {
            TermSelector::All => {
                columns.push(Column {
                    key: ALL_TERMS_COLUMN.to_string(),
                    label: "All terms".to_string(),
                    pooled: true,
                });
                Some(columns.len() - 1)
            }
            TermSelector::Term(_) => None,
        };

        TermColumns {
            columns,
            index,
            pooled,
        }
    }
}

/// Matrix columns plus the lookup from a term id to its cell positions.
#[derive(Debug, Clone)]
pub(crate) struct TermColumns {
    pub(crate) columns: Vec<Column>,
    index: HashMap<String, usize>,
    pooled: Option<usize>,
}

impl TermColumns {
    /// Positions a row in `term_id` contributes to: its own column, if any,
    /// and the pooled column.
    pub(crate) fn slots(&self, term_id: &str) -> impl Iterator<Item = usize> + '_ {
        self.index.get(term_id).copied().into_iter().chain(self.pooled)
    }
}

/// Single entry point for every grade-based table, heatmap and scalar tile.
///
/// Without a dimension the whole filtered set is pooled into one value. With
/// one, rows follow the dimension and columns follow the terms.
pub fn query_aggregate(
    ctx: &AggregateContext<'_>,
    filter: &AggregateFilter,
    metric: Metric,
    group_by: Option<Dimension>,
) -> AggregateResult {
    let records = ctx.filtered(filter);

    let Some(dimension) = group_by else {
        let mut acc = MetricAcc::default();
        for g in &records {
            acc.add(g);
        }
        return AggregateResult::Scalar {
            metric,
            value: acc.cell(metric),
            count: acc.count,
        };
    };

    let layout = ctx.term_columns(
        &filter.term,
        ctx.final_grades.iter().map(|g| g.term_id.as_str()),
    );
    let width = layout.columns.len();

    let mut rows: BTreeMap<RowKey, Vec<MetricAcc>> = BTreeMap::new();
    for g in &records {
        for key in ctx.row_keys(dimension, g) {
            let accs = rows
                .entry(key)
                .or_insert_with(|| vec![MetricAcc::default(); width]);
            for slot in layout.slots(&g.term_id) {
                accs[slot].add(g);
            }
        }
    }

    let rows = rows
        .into_iter()
        .map(|(key, accs)| MatrixRow {
            key: key.key,
            label: key.label,
            cells: accs.iter().map(|a| a.cell(metric)).collect(),
            counts: accs.iter().map(|a| a.count).collect(),
        })
        .collect();

    AggregateResult::Matrix {
        metric,
        matrix: Matrix {
            dimension,
            columns: layout.columns,
            rows,
        },
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub excellent: usize,
    pub good: usize,
    pub satisfactory: usize,
    pub failing: usize,
    pub total: usize,
}

impl StatusCounts {
    fn add(&mut self, status: StudentStatus) {
        self.total += 1;
        match status {
            StudentStatus::Excellent => self.excellent += 1,
            StudentStatus::Good => self.good += 1,
            StudentStatus::Satisfactory => self.satisfactory += 1,
            StudentStatus::Failing => self.failing += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRow {
    pub key: String,
    pub label: String,
    pub counts: StatusCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDistribution {
    pub dimension: Option<Dimension>,
    pub rows: Vec<StatusRow>,
    pub total: StatusCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    pub student_id: String,
    pub term_id: String,
    pub status: StudentStatus,
}

/// Final records passing the filter, keyed by (student, term).
fn matching_by_student_term<'a>(
    ctx: &AggregateContext<'a>,
    filter: &AggregateFilter,
) -> BTreeMap<(&'a str, &'a str), Vec<&'a FinalGradeRecord>> {
    let mut out: BTreeMap<(&str, &str), Vec<&FinalGradeRecord>> = BTreeMap::new();
    for g in ctx.filtered(filter) {
        out.entry((g.student_id.as_str(), g.term_id.as_str()))
            .or_default()
            .push(g);
    }
    out
}

/// Statuses whose student/term has at least one final record passing the
/// filter. The status itself always reflects the whole term.
pub fn list_statuses(ctx: &AggregateContext<'_>, filter: &AggregateFilter) -> Vec<StatusEntry> {
    let matching = matching_by_student_term(ctx, filter);
    ctx.statuses
        .iter()
        .filter(|((s, t), _)| matching.contains_key(&(s.as_str(), t.as_str())))
        .map(|((s, t), status)| StatusEntry {
            student_id: s.clone(),
            term_id: t.clone(),
            status: *status,
        })
        .collect()
}

/// Counts students per status category. Each (student, term) counts once in
/// the total and once in every row it has a matching record in.
pub fn status_distribution(
    ctx: &AggregateContext<'_>,
    filter: &AggregateFilter,
    group_by: Option<Dimension>,
) -> StatusDistribution {
    let matching = matching_by_student_term(ctx, filter);
    let mut total = StatusCounts::default();
    let mut rows: BTreeMap<RowKey, StatusCounts> = BTreeMap::new();

    for ((student_id, term_id), status) in ctx.statuses {
        let Some(records) = matching.get(&(student_id.as_str(), term_id.as_str())) else {
            continue;
        };
        total.add(*status);
        let Some(dimension) = group_by else {
            continue;
        };
        let keys: BTreeSet<RowKey> = records
            .iter()
            .flat_map(|g| ctx.row_keys(dimension, g))
            .collect();
        for key in keys {
            rows.entry(key).or_default().add(*status);
        }
    }

    StatusDistribution {
        dimension: group_by,
        rows: rows
            .into_iter()
            .map(|(key, counts)| StatusRow {
                key: key.key,
                label: key.label,
                counts,
            })
            .collect(),
        total,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub terms: Vec<NamedRef>,
    pub classes: Vec<NamedRef>,
    pub subjects: Vec<NamedRef>,
    pub teachers: Vec<NamedRef>,
    pub grade_levels: Vec<i64>,
    pub metrics: Vec<&'static str>,
    pub dimensions: Vec<&'static str>,
    pub statuses: Vec<&'static str>,
}

pub fn filter_options(ctx: &AggregateContext<'_>) -> FilterOptions {
    let r = ctx.reference;
    let grade_levels: BTreeSet<i64> = r
        .classes
        .iter()
        .filter_map(|c| parse_grade_level(&c.name))
        .collect();
    FilterOptions {
        terms: r.terms.clone(),
        classes: r.classes.clone(),
        subjects: r.subjects.clone(),
        teachers: r.teachers.clone(),
        grade_levels: grade_levels.into_iter().collect(),
        metrics: Metric::ALL.iter().map(|m| m.as_str()).collect(),
        dimensions: Dimension::ALL.iter().map(|d| d.as_str()).collect(),
        statuses: StudentStatus::ALL.iter().map(|s| s.as_str()).collect(),
    }
}

fn optional_id(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    is_known: impl Fn(&str) -> bool,
) -> Result<Option<String>, EngineError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match value_as_id(v) {
            Some(id) if id.eq_ignore_ascii_case("ALL") && !is_known(&id) => Ok(None),
            Some(id) => Ok(Some(id)),
            None => Err(EngineError::bad_params(format!(
                "filter.{} must be a string or integer id",
                key
            ))),
        },
    }
}

/// Reads the `filter` object shared by every query method. Absent fields mean
/// no restriction, and so does the literal "ALL" unless the snapshot has an
/// id spelled exactly that way.
pub fn parse_aggregate_filter(
    raw: Option<&serde_json::Value>,
    ctx: &AggregateContext<'_>,
) -> Result<AggregateFilter, EngineError> {
    let Some(raw) = raw.filter(|v| !v.is_null()) else {
        return Ok(AggregateFilter::default());
    };
    let Some(obj) = raw.as_object() else {
        return Err(EngineError::bad_params("filter must be an object"));
    };

    let term = match optional_id(obj, "termId", |id| ctx.knows_term(id))? {
        Some(t) => TermSelector::Term(t),
        None => TermSelector::All,
    };

    let grade_level = match obj.get("gradeLevel") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => {
            let parsed = v
                .as_i64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse::<i64>().ok()));
            let Some(n) = parsed else {
                return Err(EngineError::bad_params("filter.gradeLevel must be an integer"));
            };
            Some(n)
        }
    };

    Ok(AggregateFilter {
        term,
        class_id: optional_id(obj, "classId", |id| ctx.knows_class(id))?,
        subject_id: optional_id(obj, "subjectId", |id| ctx.knows_subject(id))?,
        grade_level,
        teacher_id: optional_id(obj, "teacherId", |id| ctx.knows_teacher(id))?,
        student_id: optional_id(obj, "studentId", |id| ctx.knows_student(id))?,
    })
}
