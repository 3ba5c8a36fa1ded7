use crate::katrol::{periodic_index, CurvingResult, FINAL_EXAM_TAG, MIDTERM_TAG};
use serde::Serialize;
use serde_json::json;

/// Column-ordered rows handed to the spreadsheet renderer. The renderer owns
/// file formatting; this side only fixes the column layout.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Periodic tags present in a result set, in column order. Used when the
/// tag list was not carried alongside (results re-read from storage).
pub fn periodic_tags_from_results(results: &[CurvingResult]) -> Vec<String> {
    let mut tags: Vec<(u32, String)> = Vec::new();
    for result in results {
        for tag in result.raw_scores.keys() {
            let Some(idx) = periodic_index(tag) else {
                continue;
            };
            if !tags.iter().any(|(_, t)| t == tag) {
                tags.push((idx, tag.clone()));
            }
        }
    }
    tags.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    tags.into_iter().map(|(_, t)| t).collect()
}

pub fn result_rows(results: &[CurvingResult], periodic_tags: &[String]) -> ExportTable {
    let mut headers: Vec<String> = vec![
        "No".to_string(),
        "NISN".to_string(),
        "Nama Siswa".to_string(),
    ];
    let all_tags: Vec<&str> = periodic_tags
        .iter()
        .map(String::as_str)
        .chain([MIDTERM_TAG, FINAL_EXAM_TAG])
        .collect();
    for tag in &all_tags {
        headers.push(tag.to_string());
        headers.push(format!("{} (Katrol)", tag));
    }
    headers.extend(
        [
            "Rata-rata NH",
            "Rata-rata NH (Katrol)",
            "Nilai Akhir",
            "Nilai Akhir (Katrol)",
            "Terendah",
            "Tertinggi",
            "Status",
        ]
        .map(str::to_string),
    );

    let rows = results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let mut cells: Vec<serde_json::Value> = vec![
                json!(i + 1),
                json!(result.nisn),
                json!(result.student_name),
            ];
            for tag in &all_tags {
                cells.push(json!(result.raw_scores.get(*tag).copied().flatten()));
                cells.push(json!(result.curved_scores.get(*tag).copied().flatten()));
            }
            cells.push(json!(result.periodic_mean_raw));
            cells.push(json!(result.periodic_mean_curved));
            cells.push(json!(result.final_raw));
            cells.push(json!(result.final_curved));
            cells.push(json!(result.min_raw));
            cells.push(json!(result.max_raw));
            cells.push(json!(result.status.as_str()));
            cells
        })
        .collect();

    ExportTable { headers, rows }
}
