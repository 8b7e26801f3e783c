use std::fmt::Write;

use crate::scale::GradingScale;
use crate::summary;
use crate::view::Gradebook;

pub fn build_report(gradebook: &Gradebook, subject_name: Option<&str>, scale: GradingScale) -> String {
    let scope = &gradebook.scope;
    let stats = summary::summarize(gradebook, scale);

    let mut output = String::new();
    let subject_label = subject_name.unwrap_or(&scope.subject_id);

    let _ = writeln!(output, "# Gradebook Report");
    let _ = writeln!(
        output,
        "{} for course {} ({})",
        subject_label,
        scope.course_id,
        scope.period.label()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Enrolled: {}", stats.enrolled);
    let _ = writeln!(output, "- Scored: {}", stats.scored);

    match stats.average {
        Some(average) => {
            let _ = writeln!(output, "- Average: {:.2} on the {} scale", average, scale);
            let _ = writeln!(
                output,
                "- Passing (>= {}): {} of {}",
                scale.passing_threshold(),
                stats.passing,
                stats.scored
            );
        }
        None => {
            let _ = writeln!(output, "- No scores recorded yet.");
        }
    }
    if let (Some(high), Some(low)) = (stats.highest, stats.lowest) {
        let _ = writeln!(output, "- Range: {} to {}", low, high);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Scores");
    let ranked = summary::rank_students(gradebook);
    if ranked.is_empty() {
        let _ = writeln!(output, "No students have a score for this period.");
    } else {
        for (student, score) in ranked {
            let _ = writeln!(
                output,
                "- {} ({}): {}{}",
                student.full_name,
                student.id,
                score,
                if scale.is_passing(score) { "" } else { " (below passing)" }
            );
        }
    }

    let pending = summary::unscored(gradebook);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Pending");
    if pending.is_empty() {
        let _ = writeln!(output, "Every enrolled student has a score.");
    } else {
        for student in pending {
            let _ = writeln!(output, "- {} ({})", student.full_name, student.id);
        }
    }

    output
}
