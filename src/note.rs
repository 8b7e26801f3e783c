//! The teacher annotation carried in a grade record's `note` field.
//!
//! The backend has no structured teacher column on grade records, so the
//! assigned teacher travels as `"Teacher: <name> (<id>) | Year: <year>"`.
//! Records written by the older web console carry the same shape with
//! `Profesor:` and `Año:`; both are read, only the first is written.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::Teacher;
use crate::period::Period;

static TEACHER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:Teacher|Profesor):\s*(?P<name>[^(|]+?)\s*\((?P<id>[^)]+)\)").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteTeacher {
    pub name: String,
    pub id: String,
}

pub fn teacher_note(teacher: &Teacher, period: &Period) -> String {
    match period.year() {
        Some(year) => format!("Teacher: {} ({}) | Year: {}", teacher.name, teacher.id, year),
        None => format!("Teacher: {} ({})", teacher.name, teacher.id),
    }
}

pub fn parse_teacher(note: &str) -> Option<NoteTeacher> {
    let captures = TEACHER_RE.captures(note)?;
    Some(NoteTeacher {
        name: captures["name"].trim().to_string(),
        id: captures["id"].trim().to_string(),
    })
}

pub fn names_teacher(note: &str, teacher: &Teacher) -> bool {
    parse_teacher(note).is_some_and(|found| found.id == teacher.id)
}
