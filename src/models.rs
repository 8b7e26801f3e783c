use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GradeError;
use crate::period::Period;

pub type StudentId = String;
pub type SubjectId = String;
pub type CourseId = String;
pub type TeacherId = String;
pub type RecordId = String;

/// A numeric score already checked against a grading scale.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(f64);

impl Score {
    pub(crate) fn new_unchecked(value: f64) -> Self {
        Self(value)
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 {
            write!(f, "{:.0}", self.0)
        } else {
            write!(f, "{:.1}", self.0)
        }
    }
}

/// The `(course, subject, period)` triple every reconciliation works within.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub course_id: CourseId,
    pub subject_id: SubjectId,
    pub period: Period,
}

impl Scope {
    pub fn new(course_id: &str, subject_id: &str, period: &str) -> Result<Self, GradeError> {
        let course_id = course_id.trim();
        let subject_id = subject_id.trim();
        if course_id.is_empty() {
            return Err(GradeError::Validation("course id is required".to_string()));
        }
        if subject_id.is_empty() {
            return Err(GradeError::Validation("subject id is required".to_string()));
        }
        Ok(Self {
            course_id: course_id.to_string(),
            subject_id: subject_id.to_string(),
            period: Period::parse(period)?,
        })
    }

    pub fn key_for(&self, student_id: &str) -> GradeKey {
        GradeKey {
            student_id: student_id.to_string(),
            subject_id: self.subject_id.clone(),
            course_id: self.course_id.clone(),
            period: self.period.clone(),
        }
    }

    pub fn contains(&self, key: &GradeKey) -> bool {
        key.course_id == self.course_id
            && key.subject_id == self.subject_id
            && key.period == self.period
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "course {} / subject {} / period {}",
            self.course_id, self.subject_id, self.period
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GradeKey {
    pub student_id: StudentId,
    pub subject_id: SubjectId,
    pub course_id: CourseId,
    pub period: Period,
}

impl GradeKey {
    pub fn scope(&self) -> Scope {
        Scope {
            course_id: self.course_id.clone(),
            subject_id: self.subject_id.clone(),
            period: self.period.clone(),
        }
    }
}

impl fmt::Display for GradeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.student_id, self.subject_id, self.course_id, self.period
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeRecord {
    pub id: RecordId,
    pub key: GradeKey,
    pub score: Option<Score>,
    pub note: String,
}

/// A grade record that has not been persisted yet, so it has no id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGradeRecord {
    pub key: GradeKey,
    pub score: Option<Score>,
    pub note: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub score: Option<Score>,
    pub note: Option<String>,
}

/// Optional filters for listing grade records; `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub course_id: Option<CourseId>,
    pub subject_id: Option<SubjectId>,
    pub student_id: Option<StudentId>,
    pub period: Option<Period>,
}

impl RecordFilter {
    pub fn scope(scope: &Scope) -> Self {
        Self {
            course_id: Some(scope.course_id.clone()),
            subject_id: Some(scope.subject_id.clone()),
            student_id: None,
            period: Some(scope.period.clone()),
        }
    }

    pub fn key(key: &GradeKey) -> Self {
        Self {
            student_id: Some(key.student_id.clone()),
            ..Self::scope(&key.scope())
        }
    }

    pub fn matches(&self, key: &GradeKey) -> bool {
        self.course_id.as_ref().map_or(true, |v| *v == key.course_id)
            && self.subject_id.as_ref().map_or(true, |v| *v == key.subject_id)
            && self.student_id.as_ref().map_or(true, |v| *v == key.student_id)
            && self.period.as_ref().map_or(true, |v| *v == key.period)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    pub id: StudentId,
    pub full_name: String,
    pub document: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
    pub teacher_ids: Vec<TeacherId>,
}

impl Subject {
    pub fn is_taught_by(&self, teacher_id: &str) -> bool {
        self.teacher_ids.iter().any(|id| id == teacher_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Teacher {
    pub id: TeacherId,
    pub name: String,
}

/// "This subject is taught in this course, this period, by this teacher."
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectAssignment {
    pub scope: Scope,
    pub subject_name: String,
    pub teacher: Teacher,
}

/// One requested score change; `score: None` leaves the record alone.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreEdit {
    pub student_id: StudentId,
    pub score: Option<f64>,
}

impl ScoreEdit {
    pub fn new(student_id: impl Into<String>, score: f64) -> Self {
        Self {
            student_id: student_id.into(),
            score: Some(score),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradebookSummary {
    pub enrolled: usize,
    pub scored: usize,
    pub average: Option<f64>,
    pub passing: usize,
    pub highest: Option<Score>,
    pub lowest: Option<Score>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(student: &str, period: &str) -> GradeKey {
        Scope::new("C1", "MATH", period).unwrap().key_for(student)
    }

    #[test]
    fn scope_requires_every_component() {
        assert!(Scope::new("", "MATH", "2025-1").is_err());
        assert!(Scope::new("C1", " ", "2025-1").is_err());
        assert!(Scope::new("C1", "MATH", "").is_err());
    }

    #[test]
    fn filter_matches_only_its_period() {
        let scope = Scope::new("C1", "MATH", "2025-1").unwrap();
        let filter = RecordFilter::scope(&scope);
        assert!(filter.matches(&key("S1", "2025-1")));
        assert!(!filter.matches(&key("S1", "2025-2")));
        assert!(RecordFilter::default().matches(&key("S1", "2025-2")));
    }

    #[test]
    fn key_filter_pins_the_student() {
        let filter = RecordFilter::key(&key("S1", "2025-1"));
        assert!(filter.matches(&key("S1", "2025-1")));
        assert!(!filter.matches(&key("S2", "2025-1")));
    }

    #[test]
    fn scores_render_without_trailing_zeroes() {
        assert_eq!(Score::new_unchecked(8.0).to_string(), "8");
        assert_eq!(Score::new_unchecked(3.5).to_string(), "3.5");
    }
}
