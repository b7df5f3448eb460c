//! Domain records flowing between the transform and load stages

use chrono::NaiveDate;
use std::path::PathBuf;

/// A person row destined for the `persons` relation.
///
/// Duplicates from the export are preserved here; deduplication happens in
/// the database after staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonRecord {
    pub person_id: String,
    /// Display name; the export can carry a missing name, which stays null.
    pub name: Option<String>,
}

/// Identity portion of a result: who competed in what, where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultIdentity {
    pub person_id: String,
    pub event_id: String,
    pub competition_id: Option<String>,
}

/// A fully joined row destined for the `results` relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub person_id: String,
    pub event_id: String,
    /// Null when the competition reference could not be resolved.
    pub competition_date: Option<NaiveDate>,
    pub value: Option<i32>,
}

/// Paths of the four extracted export files in the working directory.
#[derive(Debug, Clone)]
pub struct ExportFiles {
    pub competitions: PathBuf,
    pub results: PathBuf,
    pub attempts: PathBuf,
    pub persons: PathBuf,
}
