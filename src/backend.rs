use async_trait::async_trait;

use crate::error::GradeError;
use crate::models::{
    GradeRecord, NewGradeRecord, RecordFilter, RecordUpdate, Score, Student, Subject, Teacher,
};

/// The query/mutation contract the engine consumes.
///
/// Implementations translate between the domain types and their wire or
/// storage format. A mutation the backend refuses must come back as
/// [`GradeError::Domain`], never as `Ok`.
#[async_trait]
pub trait GradeBackend: Send + Sync {
    async fn list_grade_records(&self, filter: &RecordFilter)
        -> Result<Vec<GradeRecord>, GradeError>;

    async fn create_grade_record(&self, record: &NewGradeRecord)
        -> Result<GradeRecord, GradeError>;

    async fn update_grade_record(
        &self,
        id: &str,
        update: &RecordUpdate,
    ) -> Result<GradeRecord, GradeError>;

    async fn delete_grade_record(&self, id: &str) -> Result<(), GradeError>;

    /// Students currently enrolled in the course.
    async fn list_roster(&self, course_id: &str) -> Result<Vec<Student>, GradeError>;

    async fn list_subject_catalog(&self) -> Result<Vec<Subject>, GradeError>;

    async fn list_teachers(&self) -> Result<Vec<Teacher>, GradeError>;

    /// Whether a record holding `stored` already persists `wanted`.
    ///
    /// Backends whose storage cannot tell "unset" from some score override
    /// this so that re-submitting that score costs no mutation.
    fn holds_score(&self, stored: Option<Score>, wanted: Score) -> bool {
        stored == Some(wanted)
    }
}
