//! Grade-record reconciliation.
//!
//! Every operation re-reads the backend for its exact scope before writing,
//! fans the per-record mutations out concurrently, and reports each record's
//! outcome instead of stopping at the first failure.

use std::collections::{HashMap, HashSet};

use futures::future::join_all;

use crate::backend::GradeBackend;
use crate::error::GradeError;
use crate::models::{
    GradeKey, GradeRecord, NewGradeRecord, RecordFilter, RecordId, RecordUpdate, Score, ScoreEdit,
    Scope, Student, StudentId, Teacher,
};
use crate::note;
use crate::scale::GradingScale;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAction {
    Created,
    /// Another client created the record first; counted as success.
    AlreadyPresent,
    Updated,
    Unchanged,
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub key: GradeKey,
    pub record_id: Option<RecordId>,
    pub action: RecordAction,
}

#[derive(Debug)]
pub struct RecordFailure {
    pub key: GradeKey,
    pub record_id: Option<RecordId>,
    pub error: GradeError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Complete,
    Partial,
    Failed,
}

/// Aggregate result of an operation that fans out over many records.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub succeeded: Vec<RecordOutcome>,
    pub failed: Vec<RecordFailure>,
}

pub type SubmitResult = BatchResult;

impl BatchResult {
    pub fn status(&self) -> BatchStatus {
        if self.failed.is_empty() {
            BatchStatus::Complete
        } else if self.succeeded.is_empty() {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status() == BatchStatus::Complete
    }

    pub fn count(&self, action: RecordAction) -> usize {
        self.succeeded
            .iter()
            .filter(|outcome| outcome.action == action)
            .count()
    }

    pub fn students_with(&self, action: RecordAction) -> Vec<&str> {
        self.succeeded
            .iter()
            .filter(|outcome| outcome.action == action)
            .map(|outcome| outcome.key.student_id.as_str())
            .collect()
    }

    pub fn failed_students(&self) -> Vec<&str> {
        self.failed
            .iter()
            .map(|failure| failure.key.student_id.as_str())
            .collect()
    }

    fn push(&mut self, result: Result<RecordOutcome, RecordFailure>) {
        match result {
            Ok(outcome) => self.succeeded.push(outcome),
            Err(failure) => self.failed.push(failure),
        }
    }
}

impl FromIterator<Result<RecordOutcome, RecordFailure>> for BatchResult {
    fn from_iter<I: IntoIterator<Item = Result<RecordOutcome, RecordFailure>>>(iter: I) -> Self {
        let mut batch = BatchResult::default();
        for result in iter {
            batch.push(result);
        }
        batch
    }
}

enum Planned {
    Create { key: GradeKey, score: Score },
    Update { record_id: RecordId, key: GradeKey, score: Score },
}

pub struct Reconciler<'a> {
    backend: &'a dyn GradeBackend,
    scale: GradingScale,
}

impl<'a> Reconciler<'a> {
    pub fn new(backend: &'a dyn GradeBackend, scale: GradingScale) -> Self {
        Self { backend, scale }
    }

    pub fn scale(&self) -> GradingScale {
        self.scale
    }

    /// Records for exactly this scope, whatever else the backend returns.
    pub async fn scope_records(&self, scope: &Scope) -> Result<Vec<GradeRecord>, GradeError> {
        let records = self
            .backend
            .list_grade_records(&RecordFilter::scope(scope))
            .await?;
        Ok(records
            .into_iter()
            .filter(|record| scope.contains(&record.key))
            .collect())
    }

    /// Give every roster student without a record an unscored one.
    pub async fn attach_subject(
        &self,
        scope: &Scope,
        teacher: &Teacher,
        roster: &[Student],
    ) -> Result<BatchResult, GradeError> {
        let existing = self.scope_records(scope).await?;
        let covered: HashSet<&str> = existing
            .iter()
            .map(|record| record.key.student_id.as_str())
            .collect();

        let mut seen = HashSet::new();
        let missing: Vec<&Student> = roster
            .iter()
            .filter(|student| !covered.contains(student.id.as_str()))
            .filter(|student| seen.insert(student.id.as_str()))
            .collect();

        tracing::debug!(
            scope = %scope,
            roster = roster.len(),
            existing = existing.len(),
            missing = missing.len(),
            "Attaching subject"
        );

        let note = note::teacher_note(teacher, &scope.period);
        let results = join_all(missing.into_iter().map(|student| {
            let record = NewGradeRecord {
                key: scope.key_for(&student.id),
                score: None,
                note: note.clone(),
            };
            self.create_unscored(record)
        }))
        .await;
        let batch: BatchResult = results.into_iter().collect();

        log_batch("attach", scope, &batch);
        Ok(batch)
    }

    /// Delete every record of this exact scope.
    pub async fn detach_subject(&self, scope: &Scope) -> Result<BatchResult, GradeError> {
        let records = self.scope_records(scope).await?;
        tracing::debug!(scope = %scope, records = records.len(), "Detaching subject");

        let results = join_all(records.into_iter().map(|record| async move {
            match self.backend.delete_grade_record(&record.id).await {
                Ok(()) => Ok(RecordOutcome {
                    key: record.key,
                    record_id: Some(record.id),
                    action: RecordAction::Deleted,
                }),
                Err(error) => {
                    tracing::warn!(record = %record.id, error = %error, "Delete failed");
                    Err(RecordFailure {
                        key: record.key,
                        record_id: Some(record.id),
                        error,
                    })
                }
            }
        }))
        .await;
        let batch: BatchResult = results.into_iter().collect();

        log_batch("detach", scope, &batch);
        Ok(batch)
    }

    /// Create or update scores so the scope matches `edits`.
    ///
    /// Edits are validated against the scale before anything is sent. An
    /// edit whose score the backend already holds, or that carries no score, is
    /// reported as unchanged and costs no mutation.
    pub async fn submit_scores(
        &self,
        scope: &Scope,
        teacher: &Teacher,
        edits: &[ScoreEdit],
    ) -> Result<SubmitResult, GradeError> {
        let validated = self.validate_edits(edits)?;
        let existing = self.scope_records(scope).await?;

        let mut by_student: HashMap<&str, &GradeRecord> = HashMap::new();
        for record in &existing {
            if by_student
                .insert(record.key.student_id.as_str(), record)
                .is_some()
            {
                tracing::warn!(
                    student = %record.key.student_id,
                    scope = %scope,
                    "Duplicate grade records for one student"
                );
            }
        }

        let mut batch = BatchResult::default();
        let mut plans = Vec::new();
        for (student_id, score) in validated {
            let key = scope.key_for(&student_id);
            match (by_student.get(student_id.as_str()), score) {
                (Some(record), Some(score))
                    if !self.backend.holds_score(record.score, score) =>
                {
                    plans.push(Planned::Update {
                        record_id: record.id.clone(),
                        key,
                        score,
                    });
                }
                (None, Some(score)) => plans.push(Planned::Create { key, score }),
                (record, _) => batch.succeeded.push(RecordOutcome {
                    key,
                    record_id: record.map(|r| r.id.clone()),
                    action: RecordAction::Unchanged,
                }),
            }
        }

        let note = note::teacher_note(teacher, &scope.period);
        let results = join_all(plans.into_iter().map(|plan| self.apply(plan, &note))).await;
        for result in results {
            batch.push(result);
        }

        log_batch("submit", scope, &batch);
        Ok(batch)
    }

    fn validate_edits(
        &self,
        edits: &[ScoreEdit],
    ) -> Result<Vec<(StudentId, Option<Score>)>, GradeError> {
        let mut seen = HashSet::new();
        let mut validated = Vec::with_capacity(edits.len());
        for edit in edits {
            let student_id = edit.student_id.trim();
            if student_id.is_empty() {
                return Err(GradeError::Validation("student id is required".to_string()));
            }
            if !seen.insert(student_id) {
                return Err(GradeError::Validation(format!(
                    "student {student_id} appears more than once"
                )));
            }
            let score = edit
                .score
                .map(|value| self.scale.validate(value))
                .transpose()
                .map_err(|err| match err {
                    GradeError::Validation(message) => {
                        GradeError::Validation(format!("student {student_id}: {message}"))
                    }
                    other => other,
                })?;
            validated.push((student_id.to_string(), score));
        }
        Ok(validated)
    }

    async fn create_unscored(
        &self,
        record: NewGradeRecord,
    ) -> Result<RecordOutcome, RecordFailure> {
        match self.backend.create_grade_record(&record).await {
            Ok(created) => Ok(RecordOutcome {
                key: record.key,
                record_id: Some(created.id),
                action: RecordAction::Created,
            }),
            Err(error @ GradeError::Domain { .. }) => {
                // A rejected create may just mean another session got there first.
                match self.backend.list_grade_records(&RecordFilter::key(&record.key)).await {
                    Ok(found) => match found.into_iter().find(|r| r.key == record.key) {
                        Some(present) => Ok(RecordOutcome {
                            key: record.key,
                            record_id: Some(present.id),
                            action: RecordAction::AlreadyPresent,
                        }),
                        None => Err(RecordFailure {
                            key: record.key,
                            record_id: None,
                            error,
                        }),
                    },
                    Err(_) => Err(RecordFailure {
                        key: record.key,
                        record_id: None,
                        error,
                    }),
                }
            }
            Err(error) => Err(RecordFailure {
                key: record.key,
                record_id: None,
                error,
            }),
        }
    }

    async fn apply(&self, plan: Planned, note: &str) -> Result<RecordOutcome, RecordFailure> {
        match plan {
            Planned::Update {
                record_id,
                key,
                score,
            } => {
                let update = RecordUpdate {
                    score: Some(score),
                    note: None,
                };
                match self.backend.update_grade_record(&record_id, &update).await {
                    Ok(_) => Ok(RecordOutcome {
                        key,
                        record_id: Some(record_id),
                        action: RecordAction::Updated,
                    }),
                    Err(error) => {
                        tracing::warn!(record = %record_id, error = %error, "Update failed");
                        Err(RecordFailure {
                            key,
                            record_id: Some(record_id),
                            error,
                        })
                    }
                }
            }
            Planned::Create { key, score } => {
                let record = NewGradeRecord {
                    key,
                    score: Some(score),
                    note: note.to_string(),
                };
                match self.backend.create_grade_record(&record).await {
                    Ok(created) => Ok(RecordOutcome {
                        key: record.key,
                        record_id: Some(created.id),
                        action: RecordAction::Created,
                    }),
                    Err(error) => {
                        tracing::warn!(student = %record.key.student_id, error = %error, "Create failed");
                        Err(RecordFailure {
                            key: record.key,
                            record_id: None,
                            error,
                        })
                    }
                }
            }
        }
    }
}

fn log_batch(operation: &'static str, scope: &Scope, batch: &BatchResult) {
    match batch.status() {
        BatchStatus::Complete => tracing::info!(
            operation,
            course = %scope.course_id,
            subject = %scope.subject_id,
            period = %scope.period,
            succeeded = batch.succeeded.len(),
            "Batch complete"
        ),
        status => tracing::warn!(
            operation,
            course = %scope.course_id,
            subject = %scope.subject_id,
            period = %scope.period,
            succeeded = batch.succeeded.len(),
            failed = batch.failed.len(),
            ?status,
            "Batch finished with failures"
        ),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::memory::MemoryBackend;

    fn teacher() -> Teacher {
        Teacher {
            id: "T1".to_string(),
            name: "Juan Lopez".to_string(),
        }
    }

    fn math(period: &str) -> Scope {
        Scope::new("C1", "MATH", period).unwrap()
    }

    async fn roster(backend: &MemoryBackend) -> Vec<Student> {
        backend.list_roster("C1").await.unwrap()
    }

    fn scored(backend: &MemoryBackend, scope: &Scope, student: &str) -> Option<f64> {
        backend
            .records()
            .into_iter()
            .find(|r| r.key == scope.key_for(student))
            .and_then(|r| r.score)
            .map(Score::value)
    }

    #[tokio::test]
    async fn attach_creates_one_unscored_record_per_student() {
        let backend = MemoryBackend::new().with_roster("C1", &["S1", "S2"]);
        let engine = Reconciler::new(&backend, GradingScale::Integer10);
        let scope = math("2025-1");

        let result = engine
            .attach_subject(&scope, &teacher(), &roster(&backend).await)
            .await
            .unwrap();

        assert!(result.is_complete());
        assert_eq!(result.count(RecordAction::Created), 2);
        let records = backend.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.score.is_none()));
        assert!(records
            .iter()
            .all(|r| r.note.starts_with("Teacher: Juan Lopez (T1)")));
    }

    #[tokio::test]
    async fn repeated_attach_never_duplicates() {
        let backend = MemoryBackend::new().with_roster("C1", &["S1", "S2", "S3"]);
        let engine = Reconciler::new(&backend, GradingScale::Integer10);
        let scope = math("2025-1");
        let students = roster(&backend).await;

        for _ in 0..3 {
            engine
                .attach_subject(&scope, &teacher(), &students)
                .await
                .unwrap();
            assert!(backend.records().len() <= students.len());
        }
        assert_eq!(backend.records().len(), 3);

        backend.reset_calls();
        let again = engine
            .attach_subject(&scope, &teacher(), &students)
            .await
            .unwrap();
        assert!(again.succeeded.is_empty());
        assert_eq!(backend.calls().mutations(), 0);
    }

    #[tokio::test]
    async fn attach_skips_duplicate_roster_entries_and_keeps_scores() {
        let backend = MemoryBackend::new().with_roster("C1", &["S1"]);
        let engine = Reconciler::new(&backend, GradingScale::Integer10);
        let scope = math("2025-1");
        engine
            .submit_scores(&scope, &teacher(), &[ScoreEdit::new("S1", 9.0)])
            .await
            .unwrap();

        let mut students = roster(&backend).await;
        students.push(Student {
            id: "S2".to_string(),
            full_name: "New".to_string(),
            document: "D2".to_string(),
        });
        students.push(students[1].clone());

        let result = engine
            .attach_subject(&scope, &teacher(), &students)
            .await
            .unwrap();
        assert_eq!(result.students_with(RecordAction::Created), vec!["S2"]);
        assert_eq!(scored(&backend, &scope, "S1"), Some(9.0));
        assert_eq!(backend.records().len(), 2);
    }

    #[tokio::test]
    async fn attach_treats_lost_race_as_success() {
        let backend = MemoryBackend::new().with_roster("C1", &["S1", "S2"]);
        backend.race_student("S2");
        let engine = Reconciler::new(&backend, GradingScale::Integer10);
        let scope = math("2025-1");

        let result = engine
            .attach_subject(&scope, &teacher(), &roster(&backend).await)
            .await
            .unwrap();

        assert!(result.is_complete());
        assert_eq!(result.students_with(RecordAction::AlreadyPresent), vec!["S2"]);
        assert_eq!(backend.records().len(), 2);
    }

    #[tokio::test]
    async fn attach_reports_individual_create_failures() {
        let backend = MemoryBackend::new().with_roster("C1", &["S1", "S2"]);
        backend.fail_student("S1");
        let engine = Reconciler::new(&backend, GradingScale::Integer10);

        let result = engine
            .attach_subject(&math("2025-1"), &teacher(), &roster(&backend).await)
            .await
            .unwrap();

        assert_eq!(result.status(), BatchStatus::Partial);
        assert_eq!(result.failed_students(), vec!["S1"]);
        assert_matches!(result.failed[0].error, GradeError::Domain { .. });
    }

    #[tokio::test]
    async fn submit_updates_changed_scores_only() {
        let backend = MemoryBackend::new().with_roster("C1", &["S1", "S2"]);
        let engine = Reconciler::new(&backend, GradingScale::Integer10);
        let scope = math("2025-1");
        engine
            .attach_subject(&scope, &teacher(), &roster(&backend).await)
            .await
            .unwrap();
        backend.reset_calls();

        let edits = [ScoreEdit::new("S1", 8.0), ScoreEdit::new("S2", 10.0)];
        let first = engine.submit_scores(&scope, &teacher(), &edits).await.unwrap();
        assert!(first.is_complete());
        assert_eq!(first.count(RecordAction::Updated), 2);
        assert_eq!(backend.calls().creates, 0);
        assert_eq!(scored(&backend, &scope, "S1"), Some(8.0));
        assert_eq!(scored(&backend, &scope, "S2"), Some(10.0));

        backend.reset_calls();
        let second = engine.submit_scores(&scope, &teacher(), &edits).await.unwrap();
        assert_eq!(second.count(RecordAction::Unchanged), 2);
        assert_eq!(backend.calls().mutations(), 0);
    }

    #[tokio::test]
    async fn submit_creates_missing_records_and_ignores_blank_edits() {
        let backend = MemoryBackend::new();
        let engine = Reconciler::new(&backend, GradingScale::Integer10);
        let scope = math("2025-1");

        let edits = [
            ScoreEdit::new("S1", 7.0),
            ScoreEdit {
                student_id: "S2".to_string(),
                score: None,
            },
        ];
        let result = engine.submit_scores(&scope, &teacher(), &edits).await.unwrap();

        assert_eq!(result.students_with(RecordAction::Created), vec!["S1"]);
        assert_eq!(result.students_with(RecordAction::Unchanged), vec!["S2"]);
        assert_eq!(backend.records().len(), 1);

        let listed = backend
            .list_grade_records(&RecordFilter::key(&scope.key_for("S1")))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].score.map(Score::value), Some(7.0));
        assert!(listed[0].note.contains("(T1)"));
    }

    #[tokio::test]
    async fn submit_reports_partial_failure_per_student() {
        let backend = MemoryBackend::new().with_roster("C1", &["A", "B"]);
        let engine = Reconciler::new(&backend, GradingScale::Integer10);
        let scope = math("2025-1");
        engine
            .attach_subject(&scope, &teacher(), &roster(&backend).await)
            .await
            .unwrap();
        backend.fail_student("B");

        let result = engine
            .submit_scores(
                &scope,
                &teacher(),
                &[ScoreEdit::new("A", 5.0), ScoreEdit::new("B", 9.0)],
            )
            .await
            .unwrap();

        assert_eq!(result.status(), BatchStatus::Partial);
        assert_eq!(result.students_with(RecordAction::Updated), vec!["A"]);
        assert_eq!(result.failed_students(), vec!["B"]);
        assert_eq!(scored(&backend, &scope, "B"), None);
    }

    #[tokio::test]
    async fn submit_reports_full_failure_when_nothing_lands() {
        let backend = MemoryBackend::new();
        backend.fail_student("A");
        let engine = Reconciler::new(&backend, GradingScale::Integer10);

        let result = engine
            .submit_scores(&math("2025-1"), &teacher(), &[ScoreEdit::new("A", 5.0)])
            .await
            .unwrap();
        assert_eq!(result.status(), BatchStatus::Failed);
    }

    #[tokio::test]
    async fn invalid_scores_never_reach_the_backend() {
        let backend = MemoryBackend::new();
        let engine = Reconciler::new(&backend, GradingScale::Integer10);
        let scope = math("2025-1");

        let out_of_range = engine
            .submit_scores(&scope, &teacher(), &[ScoreEdit::new("S1", 12.0)])
            .await;
        assert_matches!(out_of_range, Err(GradeError::Validation(_)));

        let duplicated = engine
            .submit_scores(
                &scope,
                &teacher(),
                &[ScoreEdit::new("S1", 2.0), ScoreEdit::new("S1", 3.0)],
            )
            .await;
        assert_matches!(duplicated, Err(GradeError::Validation(_)));

        assert_eq!(backend.calls().lists, 0);
        assert_eq!(backend.calls().mutations(), 0);
    }

    #[tokio::test]
    async fn continuous_scale_is_caller_policy() {
        let backend = MemoryBackend::new();
        let engine = Reconciler::new(&backend, GradingScale::Continuous5);
        let scope = math("2025-1");

        let result = engine
            .submit_scores(&scope, &teacher(), &[ScoreEdit::new("S1", 4.5)])
            .await
            .unwrap();
        assert!(result.is_complete());
        assert_eq!(scored(&backend, &scope, "S1"), Some(4.5));
    }

    #[tokio::test]
    async fn detach_only_touches_its_own_period() {
        let backend = MemoryBackend::new().with_roster("C1", &["S1", "S2"]);
        let engine = Reconciler::new(&backend, GradingScale::Integer10);
        let first = math("2025-1");
        let second = math("2025-2");
        let students = roster(&backend).await;
        engine.attach_subject(&first, &teacher(), &students).await.unwrap();
        engine.attach_subject(&second, &teacher(), &students).await.unwrap();
        engine
            .submit_scores(&second, &teacher(), &[ScoreEdit::new("S1", 6.0)])
            .await
            .unwrap();
        backend.reset_calls();

        let result = engine.detach_subject(&first).await.unwrap();

        assert!(result.is_complete());
        assert_eq!(result.count(RecordAction::Deleted), 2);
        assert!(backend
            .filters()
            .iter()
            .all(|filter| filter.period.as_ref() == Some(&first.period)));
        let remaining = backend.records();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|r| r.key.period == second.period));
        assert_eq!(scored(&backend, &second, "S1"), Some(6.0));
    }

    #[tokio::test]
    async fn detach_keeps_going_after_a_failed_delete() {
        let backend = MemoryBackend::new().with_roster("C1", &["S1", "S2", "S3"]);
        let engine = Reconciler::new(&backend, GradingScale::Integer10);
        let scope = math("2025-1");
        engine
            .attach_subject(&scope, &teacher(), &roster(&backend).await)
            .await
            .unwrap();
        backend.fail_student("S2");

        let result = engine.detach_subject(&scope).await.unwrap();

        assert_eq!(result.status(), BatchStatus::Partial);
        assert_eq!(result.count(RecordAction::Deleted), 2);
        assert_eq!(result.failed_students(), vec!["S2"]);
        assert_eq!(backend.records().len(), 1);
    }

    #[tokio::test]
    async fn transport_failure_on_read_is_retryable() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);
        let engine = Reconciler::new(&backend, GradingScale::Integer10);

        let err = engine.detach_subject(&math("2025-1")).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn attach_score_detach_scenario() {
        let backend = MemoryBackend::new().with_roster("C1", &["S1", "S2"]);
        let engine = Reconciler::new(&backend, GradingScale::Integer10);
        let scope = math("2025-1");
        let other = math("2025-2");
        backend.insert(NewGradeRecord {
            key: other.key_for("S1"),
            score: None,
            note: String::new(),
        });

        let attached = engine
            .attach_subject(&scope, &teacher(), &roster(&backend).await)
            .await
            .unwrap();
        assert_eq!(attached.count(RecordAction::Created), 2);

        let submitted = engine
            .submit_scores(
                &scope,
                &teacher(),
                &[ScoreEdit::new("S1", 8.0), ScoreEdit::new("S2", 10.0)],
            )
            .await
            .unwrap();
        assert_eq!(submitted.count(RecordAction::Updated), 2);

        let detached = engine.detach_subject(&scope).await.unwrap();
        assert_eq!(detached.count(RecordAction::Deleted), 2);
        assert!(engine.scope_records(&scope).await.unwrap().is_empty());
        assert_eq!(engine.scope_records(&other).await.unwrap().len(), 1);
    }
}
