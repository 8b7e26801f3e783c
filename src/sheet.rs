use std::path::Path;

use serde::Deserialize;

use crate::error::GradeError;
use crate::models::ScoreEdit;

#[derive(Deserialize)]
struct SheetRow {
    student_id: String,
    score: Option<f64>,
}

/// Read a `student_id,score` CSV; an empty score cell means "leave as is".
pub fn read_score_sheet(path: &Path) -> Result<Vec<ScoreEdit>, GradeError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|err| GradeError::Validation(format!("{}: {err}", path.display())))?;
    read_rows(reader)
}

fn read_rows<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Vec<ScoreEdit>, GradeError> {
    let mut edits = Vec::new();
    for (line, result) in reader.deserialize::<SheetRow>().enumerate() {
        let row = result
            .map_err(|err| GradeError::Validation(format!("score sheet row {}: {err}", line + 1)))?;
        edits.push(ScoreEdit {
            student_id: row.student_id,
            score: row.score,
        });
    }
    Ok(edits)
}

/// Parse a `STUDENT=SCORE` command-line pair.
pub fn parse_score_pair(raw: &str) -> Result<ScoreEdit, GradeError> {
    let (student, score) = raw
        .split_once('=')
        .ok_or_else(|| GradeError::Validation(format!("expected STUDENT=SCORE, got {raw:?}")))?;
    let score: f64 = score
        .trim()
        .parse()
        .map_err(|_| GradeError::Validation(format!("score in {raw:?} is not a number")))?;
    Ok(ScoreEdit::new(student.trim(), score))
}
