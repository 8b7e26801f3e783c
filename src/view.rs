//! Read-side projections rebuilt from the backend.
//!
//! Nothing here patches a list fetched for another scope: every view is
//! loaded for one full `(course, subject, period)` tuple and thrown away
//! when a mutation touches that tuple.

use std::collections::{BTreeSet, HashMap};

use crate::backend::GradeBackend;
use crate::error::GradeError;
use crate::models::{
    CourseId, RecordFilter, RecordId, Score, Scope, Student, Subject, SubjectAssignment,
    SubjectId, Teacher,
};
use crate::note;
use crate::period::Period;

#[derive(Debug, Clone, PartialEq)]
pub struct GradebookRow {
    pub student: Student,
    pub record_id: Option<RecordId>,
    pub score: Option<Score>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gradebook {
    pub scope: Scope,
    pub rows: Vec<GradebookRow>,
}

impl Gradebook {
    pub fn scores(&self) -> impl Iterator<Item = Score> + '_ {
        self.rows.iter().filter_map(|row| row.score)
    }
}

/// Roster for the course joined with this scope's grade records.
pub async fn load_gradebook(
    backend: &dyn GradeBackend,
    scope: &Scope,
) -> Result<Gradebook, GradeError> {
    let roster = backend.list_roster(&scope.course_id).await?;
    let records = backend
        .list_grade_records(&RecordFilter::scope(scope))
        .await?;

    let mut by_student = HashMap::new();
    for record in records.into_iter().filter(|r| scope.contains(&r.key)) {
        by_student
            .entry(record.key.student_id.clone())
            .or_insert(record);
    }

    let mut rows: Vec<GradebookRow> = roster
        .into_iter()
        .map(|student| {
            let record = by_student.get(&student.id);
            GradebookRow {
                record_id: record.map(|r| r.id.clone()),
                score: record.and_then(|r| r.score),
                student,
            }
        })
        .collect();
    rows.sort_by(|a, b| a.student.full_name.cmp(&b.student.full_name));

    Ok(Gradebook {
        scope: scope.clone(),
        rows,
    })
}

/// Subjects that have grade records in a course for one period.
pub async fn subjects_in_course(
    backend: &dyn GradeBackend,
    course_id: &str,
    period: &Period,
) -> Result<Vec<SubjectId>, GradeError> {
    let filter = RecordFilter {
        course_id: Some(course_id.to_string()),
        period: Some(period.clone()),
        ..RecordFilter::default()
    };
    let records = backend.list_grade_records(&filter).await?;
    Ok(records
        .into_iter()
        .filter(|r| filter.matches(&r.key))
        .map(|r| r.key.subject_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect())
}

/// Periods in which a subject has grade records for a course.
pub async fn periods_with_records(
    backend: &dyn GradeBackend,
    course_id: &str,
    subject_id: &str,
) -> Result<Vec<Period>, GradeError> {
    let filter = RecordFilter {
        course_id: Some(course_id.to_string()),
        subject_id: Some(subject_id.to_string()),
        ..RecordFilter::default()
    };
    let records = backend.list_grade_records(&filter).await?;
    Ok(records
        .into_iter()
        .filter(|r| filter.matches(&r.key))
        .map(|r| r.key.period)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect())
}

pub async fn subjects_for_teacher(
    backend: &dyn GradeBackend,
    teacher_id: &str,
) -> Result<Vec<Subject>, GradeError> {
    let catalog = backend.list_subject_catalog().await?;
    Ok(catalog
        .into_iter()
        .filter(|subject| subject.is_taught_by(teacher_id))
        .collect())
}

/// Courses where the teacher's note appears on a record for the period.
pub async fn courses_for_teacher(
    backend: &dyn GradeBackend,
    teacher: &Teacher,
    period: &Period,
) -> Result<Vec<CourseId>, GradeError> {
    let filter = RecordFilter {
        period: Some(period.clone()),
        ..RecordFilter::default()
    };
    let records = backend.list_grade_records(&filter).await?;
    Ok(records
        .into_iter()
        .filter(|r| r.key.period == *period && note::names_teacher(&r.note, teacher))
        .map(|r| r.key.course_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect())
}

pub async fn find_teacher(
    backend: &dyn GradeBackend,
    teacher_id: &str,
) -> Result<Teacher, GradeError> {
    backend
        .list_teachers()
        .await?
        .into_iter()
        .find(|teacher| teacher.id == teacher_id)
        .ok_or_else(|| GradeError::Validation(format!("unknown teacher {teacher_id}")))
}

/// Check the subject exists and the teacher may teach it.
pub async fn resolve_assignment(
    backend: &dyn GradeBackend,
    scope: Scope,
    teacher_id: &str,
) -> Result<SubjectAssignment, GradeError> {
    let teacher = find_teacher(backend, teacher_id).await?;
    let subject = backend
        .list_subject_catalog()
        .await?
        .into_iter()
        .find(|subject| subject.id == scope.subject_id)
        .ok_or_else(|| GradeError::Validation(format!("unknown subject {}", scope.subject_id)))?;
    if !subject.is_taught_by(&teacher.id) {
        return Err(GradeError::Validation(format!(
            "teacher {} is not assigned to subject {}",
            teacher.name, subject.name
        )));
    }
    Ok(SubjectAssignment {
        scope,
        subject_name: subject.name,
        teacher,
    })
}

/// Gradebooks keyed by their full scope.
#[derive(Debug, Default)]
pub struct GradebookCache {
    entries: HashMap<Scope, Gradebook>,
}

impl GradebookCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_load(
        &mut self,
        backend: &dyn GradeBackend,
        scope: &Scope,
    ) -> Result<&Gradebook, GradeError> {
        if !self.entries.contains_key(scope) {
            let gradebook = load_gradebook(backend, scope).await?;
            self.entries.insert(scope.clone(), gradebook);
        }
        self.entries
            .get(scope)
            .ok_or_else(|| GradeError::Decode(format!("gradebook for {scope} vanished")))
    }

    /// Drop the entry for a scope a mutation just touched.
    pub fn invalidate(&mut self, scope: &Scope) {
        if self.entries.remove(scope).is_some() {
            tracing::debug!(scope = %scope, "Invalidated gradebook");
        }
    }

    /// Drop and reload in one step.
    pub async fn refresh(
        &mut self,
        backend: &dyn GradeBackend,
        scope: &Scope,
    ) -> Result<&Gradebook, GradeError> {
        self.invalidate(scope);
        self.get_or_load(backend, scope).await
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
