use crate::katrol::{CurveSettings, CurvingResult, RawScoreRow, Status, Student};
use anyhow::{anyhow, Context};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Identifies one curving scope. Every read and write in this module is
/// bounded by one scope; rows outside it are never touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeKey {
    pub class_id: String,
    pub subject: String,
    pub semester: i64,
    pub academic_year: String,
}

pub fn active_academic_year(conn: &Connection) -> anyhow::Result<Option<String>> {
    conn.query_row(
        "SELECT name FROM academic_years WHERE active = 1 ORDER BY name LIMIT 1",
        [],
        |r| r.get(0),
    )
    .optional()
    .context("failed to read active academic year")
}

/// Active students of a class, in roster order (name, then nisn).
pub fn load_roster(conn: &Connection, class_id: &str) -> anyhow::Result<Vec<Student>> {
    let mut stmt = conn
        .prepare(
            "SELECT nisn, name FROM students
             WHERE class_id = ? AND active = 1
             ORDER BY name, nisn",
        )
        .context("failed to prepare roster query")?;
    let roster = stmt
        .query_map([class_id], |r| {
            Ok(Student {
                nisn: r.get(0)?,
                name: r.get(1)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .context("failed to read roster")?;
    Ok(roster)
}

/// Raw score rows for one scope, straight from `nilai`.
pub fn load_raw_rows(conn: &Connection, scope: &ScopeKey) -> anyhow::Result<Vec<RawScoreRow>> {
    let mut stmt = conn
        .prepare(
            "SELECT nisn, assessment_type, score FROM nilai
             WHERE class_id = ? AND subject = ? AND semester = ? AND academic_year = ?
             ORDER BY nisn, assessment_type",
        )
        .context("failed to prepare raw score query")?;
    let rows = stmt
        .query_map(
            (
                &scope.class_id,
                &scope.subject,
                scope.semester,
                &scope.academic_year,
            ),
            |r| {
                Ok(RawScoreRow {
                    nisn: r.get(0)?,
                    assessment_type: r.get(1)?,
                    score: r.get(2)?,
                })
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .context("failed to read raw scores")?;
    Ok(rows)
}

/// The raw baseline a curving session must run from. `nilai` is the source
/// of truth; the `raw_scores` snapshots stored in `nilai_katrol` only fill
/// cells that have no `nilai` row (legacy imports). Curved columns are never
/// read here, so reprocessing after a settings change always starts from
/// true raw scores.
pub fn load_raw_baseline(conn: &Connection, scope: &ScopeKey) -> anyhow::Result<Vec<RawScoreRow>> {
    let mut rows = load_raw_rows(conn, scope)?;
    let mut seen: HashSet<(String, String)> = rows
        .iter()
        .map(|r| (r.nisn.clone(), r.assessment_type.clone()))
        .collect();

    let mut stmt = conn
        .prepare(
            "SELECT nisn, raw_scores FROM nilai_katrol
             WHERE class_id = ? AND subject = ? AND semester = ? AND academic_year = ?
             ORDER BY nisn",
        )
        .context("failed to prepare katrol snapshot query")?;
    let snapshots = stmt
        .query_map(
            (
                &scope.class_id,
                &scope.subject,
                scope.semester,
                &scope.academic_year,
            ),
            |r| {
                let nisn: String = r.get(0)?;
                let raw_scores: String = r.get(1)?;
                Ok((nisn, raw_scores))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .context("failed to read katrol snapshots")?;

    for (nisn, raw_scores) in snapshots {
        let cells: BTreeMap<String, Option<f64>> = serde_json::from_str(&raw_scores)
            .with_context(|| format!("corrupt raw_scores snapshot for student {}", nisn))?;
        for (tag, score) in cells {
            let key = (nisn.clone(), tag.clone());
            if seen.contains(&key) {
                continue;
            }
            seen.insert(key);
            rows.push(RawScoreRow {
                nisn: nisn.clone(),
                assessment_type: tag,
                score,
            });
        }
    }

    Ok(rows)
}

pub fn load_settings(
    conn: &Connection,
    class_id: &str,
    subject: &str,
) -> anyhow::Result<Option<CurveSettings>> {
    conn.query_row(
        "SELECT kkm, max_curved FROM nilai_settings WHERE class_id = ? AND subject = ?",
        (class_id, subject),
        |r| {
            Ok(CurveSettings {
                kkm: r.get(0)?,
                max_curved: r.get(1)?,
            })
        },
    )
    .optional()
    .context("failed to read curve settings")
}

pub fn upsert_settings(
    conn: &Connection,
    class_id: &str,
    subject: &str,
    settings: &CurveSettings,
) -> anyhow::Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO nilai_settings(class_id, subject, kkm, max_curved, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(class_id, subject) DO UPDATE SET
           kkm = excluded.kkm,
           max_curved = excluded.max_curved,
           updated_at = excluded.updated_at",
        (class_id, subject, settings.kkm, settings.max_curved, now),
    )
    .context("failed to upsert curve settings")?;
    Ok(())
}

/// Persist one session's results, one row per student, keyed on
/// (nisn, class, subject, semester, year). Re-running a scope overwrites the
/// prior rows and never accumulates duplicates. The settings snapshot is
/// stored alongside so later audits can see which settings produced which
/// curve.
pub fn upsert_results(
    conn: &Connection,
    scope: &ScopeKey,
    settings: &CurveSettings,
    results: &[CurvingResult],
) -> anyhow::Result<usize> {
    let now = Utc::now().to_rfc3339();
    for result in results {
        let row_id = Uuid::new_v4().to_string();
        let raw_scores =
            serde_json::to_string(&result.raw_scores).context("failed to encode raw scores")?;
        let curved_scores = serde_json::to_string(&result.curved_scores)
            .context("failed to encode curved scores")?;
        conn.execute(
            "INSERT INTO nilai_katrol(
                 id, nisn, student_name, class_id, subject, semester, academic_year,
                 raw_scores, curved_scores,
                 periodic_mean_raw, periodic_mean_curved, final_raw, final_curved,
                 status, min_raw, max_raw, kkm, max_curved, processed_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(nisn, class_id, subject, semester, academic_year) DO UPDATE SET
               student_name = excluded.student_name,
               raw_scores = excluded.raw_scores,
               curved_scores = excluded.curved_scores,
               periodic_mean_raw = excluded.periodic_mean_raw,
               periodic_mean_curved = excluded.periodic_mean_curved,
               final_raw = excluded.final_raw,
               final_curved = excluded.final_curved,
               status = excluded.status,
               min_raw = excluded.min_raw,
               max_raw = excluded.max_raw,
               kkm = excluded.kkm,
               max_curved = excluded.max_curved,
               processed_at = excluded.processed_at",
            rusqlite::params![
                row_id,
                result.nisn,
                result.student_name,
                scope.class_id,
                scope.subject,
                scope.semester,
                scope.academic_year,
                raw_scores,
                curved_scores,
                result.periodic_mean_raw,
                result.periodic_mean_curved,
                result.final_raw,
                result.final_curved,
                result.status.as_str(),
                result.min_raw,
                result.max_raw,
                settings.kkm,
                settings.max_curved,
                now,
            ],
        )
        .with_context(|| format!("failed to upsert katrol row for student {}", result.nisn))?;
    }
    Ok(results.len())
}

/// One persisted `nilai_katrol` row: the result plus the settings snapshot
/// it was produced under.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedResult {
    #[serde(flatten)]
    pub result: CurvingResult,
    pub settings: CurveSettings,
    pub processed_at: Option<String>,
}

/// Previously persisted results for one scope, ordered by (name, nisn),
/// including the settings snapshot used for each run.
pub fn load_results(conn: &Connection, scope: &ScopeKey) -> anyhow::Result<Vec<PersistedResult>> {
    let mut stmt = conn
        .prepare(
            "SELECT nisn, student_name, raw_scores, curved_scores,
                    periodic_mean_raw, periodic_mean_curved, final_raw, final_curved,
                    status, min_raw, max_raw, kkm, max_curved, processed_at
             FROM nilai_katrol
             WHERE class_id = ? AND subject = ? AND semester = ? AND academic_year = ?
             ORDER BY student_name, nisn",
        )
        .context("failed to prepare katrol results query")?;

    let rows = stmt
        .query_map(
            (
                &scope.class_id,
                &scope.subject,
                scope.semester,
                &scope.academic_year,
            ),
            |r| {
                let nisn: String = r.get(0)?;
                let student_name: String = r.get(1)?;
                let raw_scores: String = r.get(2)?;
                let curved_scores: String = r.get(3)?;
                let periodic_mean_raw: Option<f64> = r.get(4)?;
                let periodic_mean_curved: Option<f64> = r.get(5)?;
                let final_raw: Option<f64> = r.get(6)?;
                let final_curved: Option<f64> = r.get(7)?;
                let status: String = r.get(8)?;
                let min_raw: Option<f64> = r.get(9)?;
                let max_raw: Option<f64> = r.get(10)?;
                let kkm: i64 = r.get(11)?;
                let max_curved: i64 = r.get(12)?;
                let processed_at: Option<String> = r.get(13)?;
                Ok((
                    nisn,
                    student_name,
                    raw_scores,
                    curved_scores,
                    periodic_mean_raw,
                    periodic_mean_curved,
                    final_raw,
                    final_curved,
                    status,
                    min_raw,
                    max_raw,
                    kkm,
                    max_curved,
                    processed_at,
                ))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .context("failed to read katrol results")?;

    let mut out = Vec::with_capacity(rows.len());
    for (
        nisn,
        student_name,
        raw_scores,
        curved_scores,
        periodic_mean_raw,
        periodic_mean_curved,
        final_raw,
        final_curved,
        status,
        min_raw,
        max_raw,
        kkm,
        max_curved,
        processed_at,
    ) in rows
    {
        let raw_scores: BTreeMap<String, Option<f64>> = serde_json::from_str(&raw_scores)
            .with_context(|| format!("corrupt raw_scores for student {}", nisn))?;
        let curved_scores: BTreeMap<String, Option<f64>> = serde_json::from_str(&curved_scores)
            .with_context(|| format!("corrupt curved_scores for student {}", nisn))?;
        let status = Status::parse(&status)
            .ok_or_else(|| anyhow!("unknown status '{}' for student {}", status, nisn))?;
        out.push(PersistedResult {
            result: CurvingResult {
                nisn,
                student_name,
                raw_scores,
                curved_scores,
                periodic_mean_raw,
                periodic_mean_curved,
                final_raw,
                final_curved,
                status,
                min_raw,
                max_raw,
            },
            settings: CurveSettings { kkm, max_curved },
            processed_at,
        });
    }
    Ok(out)
}
