use crate::models::{GradebookSummary, Score, Student};
use crate::scale::GradingScale;
use crate::view::Gradebook;

pub fn summarize(gradebook: &Gradebook, scale: GradingScale) -> GradebookSummary {
    let scores: Vec<Score> = gradebook.scores().collect();
    let total: f64 = scores.iter().map(|score| score.value()).sum();

    GradebookSummary {
        enrolled: gradebook.rows.len(),
        scored: scores.len(),
        average: if scores.is_empty() {
            None
        } else {
            Some(total / scores.len() as f64)
        },
        passing: scores.iter().filter(|score| scale.is_passing(**score)).count(),
        highest: scores
            .iter()
            .copied()
            .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)),
        lowest: scores
            .iter()
            .copied()
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)),
    }
}

/// Scored students, best first; ties keep roster order.
pub fn rank_students(gradebook: &Gradebook) -> Vec<(&Student, Score)> {
    let mut ranked: Vec<(&Student, Score)> = gradebook
        .rows
        .iter()
        .filter_map(|row| row.score.map(|score| (&row.student, score)))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

/// Students on the roster who still have no score.
pub fn unscored(gradebook: &Gradebook) -> Vec<&Student> {
    gradebook
        .rows
        .iter()
        .filter(|row| row.score.is_none())
        .map(|row| &row.student)
        .collect()
}
