//! In-process `GradeBackend` used by the test suites.
//!
//! Enforces the same unique grade key the real backends do and can be told
//! to fail mutations for chosen students, simulate a racing client, or drop
//! offline entirely.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::GradeBackend;
use crate::error::GradeError;
use crate::models::{
    GradeRecord, NewGradeRecord, RecordFilter, RecordUpdate, Student, Subject, Teacher,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl CallCounts {
    pub fn mutations(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

#[derive(Default)]
struct State {
    records: Vec<GradeRecord>,
    next_id: u64,
    rosters: HashMap<String, Vec<Student>>,
    subjects: Vec<Subject>,
    teachers: Vec<Teacher>,
    failing_students: HashSet<String>,
    racing_students: HashSet<String>,
    offline: bool,
    calls: CallCounts,
    filters: Vec<RecordFilter>,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roster(self, course_id: &str, students: &[&str]) -> Self {
        let roster = students
            .iter()
            .map(|id| Student {
                id: id.to_string(),
                full_name: format!("Student {id}"),
                document: format!("DOC-{id}"),
            })
            .collect();
        self.lock().rosters.insert(course_id.to_string(), roster);
        self
    }

    pub fn with_subject(self, id: &str, name: &str, teacher_ids: &[&str]) -> Self {
        self.lock().subjects.push(Subject {
            id: id.to_string(),
            name: name.to_string(),
            teacher_ids: teacher_ids.iter().map(|t| t.to_string()).collect(),
        });
        self
    }

    pub fn with_teacher(self, id: &str, name: &str) -> Self {
        self.lock().teachers.push(Teacher {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    /// Mutations touching this student's records answer `success: false`.
    pub fn fail_student(&self, student_id: &str) {
        self.lock().failing_students.insert(student_id.to_string());
    }

    /// The next create for this student loses a race: another client's
    /// record lands first and ours is rejected as a duplicate.
    pub fn race_student(&self, student_id: &str) {
        self.lock().racing_students.insert(student_id.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn insert(&self, record: NewGradeRecord) -> GradeRecord {
        let mut state = self.lock();
        Self::store(&mut state, record)
    }

    pub fn records(&self) -> Vec<GradeRecord> {
        self.lock().records.clone()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn reset_calls(&self) {
        let mut state = self.lock();
        state.calls = CallCounts::default();
        state.filters.clear();
    }

    /// Every filter passed to `list_grade_records` since the last reset.
    pub fn filters(&self) -> Vec<RecordFilter> {
        self.lock().filters.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory backend lock poisoned")
    }

    fn store(state: &mut State, record: NewGradeRecord) -> GradeRecord {
        state.next_id += 1;
        let stored = GradeRecord {
            id: format!("rec-{}", state.next_id),
            key: record.key,
            score: record.score,
            note: record.note,
        };
        state.records.push(stored.clone());
        stored
    }

    fn check_online(state: &State) -> Result<(), GradeError> {
        if state.offline {
            return Err(GradeError::Status {
                status: 503,
                body: "backend unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl GradeBackend for MemoryBackend {
    async fn list_grade_records(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<GradeRecord>, GradeError> {
        let mut state = self.lock();
        Self::check_online(&state)?;
        state.calls.lists += 1;
        state.filters.push(filter.clone());
        Ok(state
            .records
            .iter()
            .filter(|record| filter.matches(&record.key))
            .cloned()
            .collect())
    }

    async fn create_grade_record(
        &self,
        record: &NewGradeRecord,
    ) -> Result<GradeRecord, GradeError> {
        let mut state = self.lock();
        Self::check_online(&state)?;
        state.calls.creates += 1;
        let student = &record.key.student_id;

        if state.racing_students.remove(student) {
            Self::store(
                &mut state,
                NewGradeRecord {
                    key: record.key.clone(),
                    score: None,
                    note: "created by another session".to_string(),
                },
            );
        }
        if state.failing_students.contains(student) {
            return Err(GradeError::domain("createGradeRecord", "simulated failure"));
        }
        if state.records.iter().any(|existing| existing.key == record.key) {
            return Err(GradeError::domain(
                "createGradeRecord",
                format!("grade record {} already exists", record.key),
            ));
        }
        Ok(Self::store(&mut state, record.clone()))
    }

    async fn update_grade_record(
        &self,
        id: &str,
        update: &RecordUpdate,
    ) -> Result<GradeRecord, GradeError> {
        let mut state = self.lock();
        Self::check_online(&state)?;
        state.calls.updates += 1;
        let failing = state.failing_students.clone();
        let record = state
            .records
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or_else(|| GradeError::domain("updateGradeRecord", format!("no record {id}")))?;
        if failing.contains(&record.key.student_id) {
            return Err(GradeError::domain("updateGradeRecord", "simulated failure"));
        }
        if let Some(score) = update.score {
            record.score = Some(score);
        }
        if let Some(note) = &update.note {
            record.note = note.clone();
        }
        Ok(record.clone())
    }

    async fn delete_grade_record(&self, id: &str) -> Result<(), GradeError> {
        let mut state = self.lock();
        Self::check_online(&state)?;
        state.calls.deletes += 1;
        let position = state
            .records
            .iter()
            .position(|record| record.id == id)
            .ok_or_else(|| GradeError::domain("deleteGradeRecord", format!("no record {id}")))?;
        if state
            .failing_students
            .contains(&state.records[position].key.student_id)
        {
            return Err(GradeError::domain("deleteGradeRecord", "simulated failure"));
        }
        state.records.remove(position);
        Ok(())
    }

    async fn list_roster(&self, course_id: &str) -> Result<Vec<Student>, GradeError> {
        let state = self.lock();
        Self::check_online(&state)?;
        Ok(state.rosters.get(course_id).cloned().unwrap_or_default())
    }

    async fn list_subject_catalog(&self) -> Result<Vec<Subject>, GradeError> {
        let state = self.lock();
        Self::check_online(&state)?;
        Ok(state.subjects.clone())
    }

    async fn list_teachers(&self) -> Result<Vec<Teacher>, GradeError> {
        let state = self.lock();
        Self::check_online(&state)?;
        Ok(state.teachers.clone())
    }
}
