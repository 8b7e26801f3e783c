//! Grade-record reconciliation for a school gradebook.
//!
//! The [`reconcile::Reconciler`] keeps a backend's grade records in step with
//! which students should hold a score for a `(course, subject, period)`
//! scope. Backends implement [`backend::GradeBackend`]; [`graphql`] talks to
//! the school's GraphQL service and [`db`] to a self-hosted Postgres schema.

pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod graphql;
pub mod models;
pub mod note;
pub mod period;
pub mod reconcile;
pub mod report;
pub mod scale;
pub mod sheet;
pub mod summary;
pub mod view;

#[cfg(test)]
mod memory;
