//! Streaming transform of the export files into the `results` relation
//!
//! The attempts file is by far the largest input, so the join never
//! materializes it: identity and competition lookups are built first, then
//! attempts stream through one record at a time and only the final
//! projected rows are collected.

use crate::error::Result;
use crate::models::{ExportFiles, ResultRecord};
use crate::parser::{self, field, TsvReader};
use csv::ByteRecord;
use tracing::{debug, info};

/// Join the attempts stream against result identities (inner) and
/// competitions (left), producing the final `results` projection.
pub fn build_results(files: &ExportFiles) -> Result<Vec<ResultRecord>> {
    let competitions = parser::read_competition_dates(&files.competitions)?;
    let identities = parser::read_result_identities(&files.results)?;
    info!(
        competitions = competitions.len(),
        results = identities.len(),
        "Built join lookups"
    );

    let mut reader = TsvReader::open(&files.attempts)?;
    let result_col = reader.column("result_id")?;
    let value_col = reader.column("value")?;

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    let mut record = ByteRecord::new();
    while reader.read_record(&mut record)? {
        let Some(result_id) = field(&record, result_col) else {
            continue;
        };

        // Inner join: an attempt without identity context is meaningless.
        let Some(identity) = identities.get(&result_id) else {
            dropped += 1;
            continue;
        };

        // Left join: a missing competition keeps the row, the date stays null.
        let competition_date = identity
            .competition_id
            .as_deref()
            .and_then(|id| competitions.get(id).copied());

        rows.push(ResultRecord {
            person_id: identity.person_id.clone(),
            event_id: identity.event_id.clone(),
            competition_date,
            value: field(&record, value_col).and_then(|v| v.trim().parse().ok()),
        });
    }

    if dropped > 0 {
        debug!(dropped, "Dropped attempts without a matching result row");
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::path::Path;

    fn write_export_files(
        dir: &Path,
        competitions: &str,
        results: &str,
        attempts: &str,
        persons: &str,
    ) -> ExportFiles {
        let files = ExportFiles {
            competitions: dir.join("competitions.tsv"),
            results: dir.join("results.tsv"),
            attempts: dir.join("attempts.tsv"),
            persons: dir.join("persons.tsv"),
        };
        std::fs::write(&files.competitions, competitions).unwrap();
        std::fs::write(&files.results, results).unwrap();
        std::fs::write(&files.attempts, attempts).unwrap();
        std::fs::write(&files.persons, persons).unwrap();
        files
    }

    #[test]
    fn test_joined_row_with_resolved_competition() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_export_files(
            dir.path(),
            "id\tyear\tmonth\tday\nc1\t2020\t5\t10\n",
            "id\tperson_id\tevent_id\tcompetition_id\nr1\t2015ABCD01\t333\tc1\n",
            "result_id\tvalue\nr1\t1234\n",
            "wca_id\tname\n2015ABCD01\tAlice\n",
        );

        let rows = build_results(&files).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0],
            ResultRecord {
                person_id: "2015ABCD01".to_string(),
                event_id: "333".to_string(),
                competition_date: NaiveDate::from_ymd_opt(2020, 5, 10),
                value: Some(1234),
            }
        );
    }

    #[test]
    fn test_dangling_attempt_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_export_files(
            dir.path(),
            "id\tyear\tmonth\tday\nc1\t2020\t5\t10\n",
            "id\tperson_id\tevent_id\tcompetition_id\nr1\t2015ABCD01\t333\tc1\n",
            "result_id\tvalue\nr1\t1234\nr2\t999\n",
            "wca_id\tname\n",
        );

        let rows = build_results(&files).unwrap();
        // r2 has no identity row and must not appear.
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, Some(1234));
    }

    #[test]
    fn test_missing_competition_keeps_row_with_null_date() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_export_files(
            dir.path(),
            "id\tyear\tmonth\tday\n",
            "id\tperson_id\tevent_id\tcompetition_id\nr3\tP1\t333\tcX\n",
            "result_id\tvalue\nr3\t777\n",
            "wca_id\tname\n",
        );

        let rows = build_results(&files).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].person_id, "P1");
        assert_eq!(rows[0].competition_date, None);
        assert_eq!(rows[0].value, Some(777));
    }

    #[test]
    fn test_null_competition_reference_keeps_row() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_export_files(
            dir.path(),
            "id\tyear\tmonth\tday\nc1\t2020\t5\t10\n",
            "id\tperson_id\tevent_id\tcompetition_id\nr1\tP1\t333\tNULL\n",
            "result_id\tvalue\nr1\t500\n",
            "wca_id\tname\n",
        );

        let rows = build_results(&files).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].competition_date, None);
    }

    #[test]
    fn test_multiple_attempts_per_result() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_export_files(
            dir.path(),
            "id\tyear\tmonth\tday\nc1\t2020\t5\t10\n",
            "id\tperson_id\tevent_id\tcompetition_id\nr1\tP1\t333\tc1\n",
            "result_id\tvalue\nr1\t1000\nr1\t1100\nr1\tNULL\n",
            "wca_id\tname\n",
        );

        let rows = build_results(&files).unwrap();
        // One output row per attempt, all resolved through the same identity.
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].value, Some(1000));
        assert_eq!(rows[1].value, Some(1100));
        assert_eq!(rows[2].value, None);
        assert!(rows.iter().all(|r| r.person_id == "P1"));
    }
}
