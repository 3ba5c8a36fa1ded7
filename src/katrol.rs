use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

/// Fixed assessment slots. Periodic slots (`NH1`, `NH2`, ...) are discovered
/// from the data at session time; these two always exist as columns.
pub const MIDTERM_TAG: &str = "UTS";
pub const FINAL_EXAM_TAG: &str = "UAS";
pub const PERIODIC_TAG_PREFIX: &str = "NH";

/// Final-grade weight split: periodic mean / mid-term / final exam.
/// A missing component drops out and the remaining weights renormalize.
pub const PERIODIC_WEIGHT: f64 = 0.4;
pub const MIDTERM_WEIGHT: f64 = 0.3;
pub const FINAL_EXAM_WEIGHT: f64 = 0.3;

/// Half-up 2-decimal rounding used for stored and displayed values:
/// `Int(100*x + 0.5) / 100`
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "Tuntas")]
    Tuntas,
    #[serde(rename = "Belum Tuntas")]
    BelumTuntas,
    #[serde(rename = "Belum Diproses")]
    BelumDiproses,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Tuntas => "Tuntas",
            Status::BelumTuntas => "Belum Tuntas",
            Status::BelumDiproses => "Belum Diproses",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Tuntas" => Some(Status::Tuntas),
            "Belum Tuntas" => Some(Status::BelumTuntas),
            "Belum Diproses" => Some(Status::BelumDiproses),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KatrolError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl KatrolError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Per-(class, subject) curve settings. `kkm` is the minimum passing grade,
/// `max_curved` the ceiling a curved score may reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurveSettings {
    pub kkm: i64,
    pub max_curved: i64,
}

impl CurveSettings {
    pub fn validate(&self) -> Result<(), KatrolError> {
        if !(0..=100).contains(&self.kkm) || !(0..=100).contains(&self.max_curved) {
            return Err(
                KatrolError::new("invalid_settings", "kkm and maxCurved must be within 0..=100")
                    .with_details(json!({ "kkm": self.kkm, "maxCurved": self.max_curved })),
            );
        }
        if self.kkm > self.max_curved {
            return Err(
                KatrolError::new("invalid_settings", "kkm must not exceed maxCurved")
                    .with_details(json!({ "kkm": self.kkm, "maxCurved": self.max_curved })),
            );
        }
        Ok(())
    }
}

/// One roster entry. `nisn` is the stable national student identifier.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub nisn: String,
    pub name: String,
}

/// One raw score cell for a scope already narrowed to a single
/// (class, subject, semester, academic year). `score` is `None` for a slot
/// that exists but was never filled in.
#[derive(Debug, Clone)]
pub struct RawScoreRow {
    pub nisn: String,
    pub assessment_type: String,
    pub score: Option<f64>,
}

/// Post-grouping shape: one record per roster student with every known
/// assessment slot present, unscored slots as `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentScoreRecord {
    pub nisn: String,
    pub name: String,
    pub raw_scores: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurvingResult {
    pub nisn: String,
    pub student_name: String,
    pub raw_scores: BTreeMap<String, Option<f64>>,
    pub curved_scores: BTreeMap<String, Option<f64>>,
    pub periodic_mean_raw: Option<f64>,
    pub periodic_mean_curved: Option<f64>,
    pub final_raw: Option<f64>,
    pub final_curved: Option<f64>,
    pub status: Status,
    pub min_raw: Option<f64>,
    pub max_raw: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    pub results: Vec<CurvingResult>,
    /// Periodic tags that carried at least one score in this batch, in
    /// column order (`NH2` before `NH10`).
    pub periodic_tags: Vec<String>,
    pub warnings: Vec<String>,
}

/// Numeric index of a periodic tag: `NH3` -> 3. `UTS`/`UAS` and malformed
/// tags return `None`.
pub fn periodic_index(tag: &str) -> Option<u32> {
    tag.strip_prefix(PERIODIC_TAG_PREFIX)?
        .parse::<u32>()
        .ok()
        .filter(|n| *n >= 1)
}

pub fn is_known_tag(tag: &str) -> bool {
    tag == MIDTERM_TAG || tag == FINAL_EXAM_TAG || periodic_index(tag).is_some()
}

/// Periodic tags that appear with a non-null score anywhere in the batch,
/// ordered by numeric index. An all-null column is not a column.
pub fn discover_periodic_tags(rows: &[RawScoreRow]) -> Vec<String> {
    let mut tags: Vec<(u32, String)> = Vec::new();
    for row in rows {
        if row.score.is_none() {
            continue;
        }
        let Some(idx) = periodic_index(&row.assessment_type) else {
            continue;
        };
        if !tags.iter().any(|(_, t)| *t == row.assessment_type) {
            tags.push((idx, row.assessment_type.clone()));
        }
    }
    tags.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    tags.into_iter().map(|(_, t)| t).collect()
}

/// Reshape flat rows into one record per roster student, in roster order.
/// A student with no rows at all still yields a record with every slot
/// `None`; students are never dropped here.
pub fn group_scores(
    rows: &[RawScoreRow],
    roster: &[Student],
    periodic_tags: &[String],
) -> Vec<StudentScoreRecord> {
    let mut by_student: HashMap<&str, HashMap<&str, Option<f64>>> = HashMap::new();
    for row in rows {
        by_student
            .entry(row.nisn.as_str())
            .or_default()
            .insert(row.assessment_type.as_str(), row.score);
    }

    roster
        .iter()
        .map(|s| {
            let cells = by_student.get(s.nisn.as_str());
            let mut raw_scores: BTreeMap<String, Option<f64>> = BTreeMap::new();
            for tag in periodic_tags
                .iter()
                .map(String::as_str)
                .chain([MIDTERM_TAG, FINAL_EXAM_TAG])
            {
                let value = cells.and_then(|m| m.get(tag).copied()).flatten();
                raw_scores.insert(tag.to_string(), value);
            }
            StudentScoreRecord {
                nisn: s.nisn.clone(),
                name: s.name.clone(),
                raw_scores,
            }
        })
        .collect()
}

/// Curve one raw score. Scores at or above KKM pass through unchanged;
/// scores below are lifted toward KKM proportional to how close they already
/// are, capped at `max_curved`. Missing data is never fabricated.
///
/// The boost factor is capped at 1 so the transform stays monotonically
/// non-decreasing for every valid settings pair; an uncapped factor would
/// invert ranks whenever `max_curved > 2 * kkm`.
pub fn curve(raw: Option<f64>, settings: &CurveSettings) -> Option<f64> {
    let raw = raw?;
    let kkm = settings.kkm as f64;
    let max_curved = settings.max_curved as f64;
    if raw >= kkm || settings.kkm == 0 {
        return Some(raw);
    }
    let factor = ((max_curved - kkm) / kkm).min(1.0);
    Some((raw + (kkm - raw) * factor).min(max_curved))
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn weighted_final(
    periodic: Option<f64>,
    midterm: Option<f64>,
    final_exam: Option<f64>,
) -> Option<f64> {
    let mut sum = 0.0_f64;
    let mut weight = 0.0_f64;
    if let Some(v) = periodic {
        sum += v * PERIODIC_WEIGHT;
        weight += PERIODIC_WEIGHT;
    }
    if let Some(v) = midterm {
        sum += v * MIDTERM_WEIGHT;
        weight += MIDTERM_WEIGHT;
    }
    if let Some(v) = final_exam {
        sum += v * FINAL_EXAM_WEIGHT;
        weight += FINAL_EXAM_WEIGHT;
    }
    if weight > 0.0 {
        Some(sum / weight)
    } else {
        None
    }
}

pub fn classify(final_curved: Option<f64>, kkm: i64) -> Status {
    match final_curved {
        None => Status::BelumDiproses,
        Some(v) if v >= kkm as f64 => Status::Tuntas,
        Some(_) => Status::BelumTuntas,
    }
}

/// Curve every slot independently, average the periodic columns, and fold
/// periodic mean / UTS / UAS into the final grades. Means and finals are
/// computed at full precision; only the stored fields are rounded.
pub fn aggregate(
    record: &StudentScoreRecord,
    settings: &CurveSettings,
    periodic_tags: &[String],
) -> CurvingResult {
    let mut curved_exact: BTreeMap<String, Option<f64>> = BTreeMap::new();
    for (tag, raw) in &record.raw_scores {
        curved_exact.insert(tag.clone(), curve(*raw, settings));
    }

    let periodic_raw: Vec<f64> = periodic_tags
        .iter()
        .filter_map(|t| record.raw_scores.get(t).copied().flatten())
        .collect();
    let periodic_curved: Vec<f64> = periodic_tags
        .iter()
        .filter_map(|t| curved_exact.get(t).copied().flatten())
        .collect();

    let periodic_mean_raw = mean(&periodic_raw);
    let periodic_mean_curved = mean(&periodic_curved);

    let midterm_raw = record.raw_scores.get(MIDTERM_TAG).copied().flatten();
    let final_exam_raw = record.raw_scores.get(FINAL_EXAM_TAG).copied().flatten();
    let midterm_curved = curved_exact.get(MIDTERM_TAG).copied().flatten();
    let final_exam_curved = curved_exact.get(FINAL_EXAM_TAG).copied().flatten();

    let final_raw = weighted_final(periodic_mean_raw, midterm_raw, final_exam_raw);
    let final_curved = weighted_final(periodic_mean_curved, midterm_curved, final_exam_curved);

    let all_raw: Vec<f64> = record.raw_scores.values().copied().flatten().collect();
    let min_raw = all_raw.iter().copied().reduce(f64::min);
    let max_raw = all_raw.iter().copied().reduce(f64::max);

    let final_curved_rounded = final_curved.map(round_off_2_decimals);
    let status = classify(final_curved_rounded, settings.kkm);

    CurvingResult {
        nisn: record.nisn.clone(),
        student_name: record.name.clone(),
        raw_scores: record.raw_scores.clone(),
        curved_scores: curved_exact
            .iter()
            .map(|(k, v)| (k.clone(), v.map(round_off_2_decimals)))
            .collect(),
        periodic_mean_raw: periodic_mean_raw.map(round_off_2_decimals),
        periodic_mean_curved: periodic_mean_curved.map(round_off_2_decimals),
        final_raw: final_raw.map(round_off_2_decimals),
        final_curved: final_curved_rounded,
        status,
        min_raw,
        max_raw,
    }
}

/// Run one whole-batch curving session: validate settings, group, aggregate,
/// classify. Results come back sorted by (name, nisn). Deterministic: the
/// same input always produces the identical result list.
///
/// Inputs must be true raw scores. Feeding previously curved values back in
/// is a caller bug; the store layer reconstructs the raw baseline when
/// reprocessing (see `store::load_raw_baseline`).
pub fn run_session(
    rows: &[RawScoreRow],
    roster: &[Student],
    settings: &CurveSettings,
) -> Result<SessionOutcome, KatrolError> {
    settings.validate()?;

    let mut warnings: Vec<String> = Vec::new();
    if roster.is_empty() {
        warnings.push("no_active_students".to_string());
    }

    let periodic_tags = discover_periodic_tags(rows);
    let records = group_scores(rows, roster, &periodic_tags);
    let mut results: Vec<CurvingResult> = records
        .iter()
        .map(|r| aggregate(r, settings, &periodic_tags))
        .collect();
    results.sort_by(|a, b| {
        a.student_name
            .cmp(&b.student_name)
            .then_with(|| a.nisn.cmp(&b.nisn))
    });

    Ok(SessionOutcome {
        results,
        periodic_tags,
        warnings,
    })
}
