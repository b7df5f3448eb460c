//! Lossy TSV decoding for the export files
//!
//! The export files are tab-separated with a header row, use the literal
//! token `NULL` as missing-value sentinel, apply no quoting, and have been
//! known to contain invalid UTF-8. Records are therefore read as raw bytes
//! and each field decoded lossily, so a mangled name yields replacement
//! characters instead of failing the whole file.

use crate::error::{LoaderError, Result};
use crate::models::{PersonRecord, ResultIdentity};
use chrono::NaiveDate;
use csv::{ByteRecord, ReaderBuilder};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Missing-value sentinel used throughout the export.
pub const NULL_SENTINEL: &str = "NULL";

/// Tab-separated reader with header-name column lookup.
pub(crate) struct TsvReader<R: Read> {
    reader: csv::Reader<R>,
    columns: HashMap<String, usize>,
}

impl TsvReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            LoaderError::Transform(format!("cannot open {}: {e}", path.display()))
        })?;
        Self::from_reader(BufReader::new(file))
    }
}

impl<R: Read> TsvReader<R> {
    pub fn from_reader(input: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .quoting(false)
            .flexible(true)
            .from_reader(input);

        let columns = reader
            .byte_headers()?
            .iter()
            .enumerate()
            .map(|(index, name)| (String::from_utf8_lossy(name).trim().to_string(), index))
            .collect();

        Ok(TsvReader { reader, columns })
    }

    /// Index of a named column; the export schema is addressed by header
    /// name, never by position.
    pub fn column(&self, name: &str) -> Result<usize> {
        self.columns.get(name).copied().ok_or_else(|| {
            LoaderError::Transform(format!("missing column '{name}' in export file"))
        })
    }

    pub fn read_record(&mut self, record: &mut ByteRecord) -> Result<bool> {
        Ok(self.reader.read_byte_record(record)?)
    }
}

/// Decode one field lossily, mapping the `NULL` sentinel to `None`.
pub(crate) fn field(record: &ByteRecord, index: usize) -> Option<String> {
    let raw = record.get(index)?;
    let text = String::from_utf8_lossy(raw);
    if text == NULL_SENTINEL {
        None
    } else {
        Some(text.into_owned())
    }
}

/// Competition id to calendar date, assembled from the year/month/day
/// integer columns. Rows whose fields do not form a valid date are left
/// out; the join surfaces them as a null competition date.
pub fn read_competition_dates(path: &Path) -> Result<HashMap<String, NaiveDate>> {
    let mut reader = TsvReader::open(path)?;
    let id_col = reader.column("id")?;
    let year_col = reader.column("year")?;
    let month_col = reader.column("month")?;
    let day_col = reader.column("day")?;

    let mut dates = HashMap::new();
    let mut record = ByteRecord::new();
    while reader.read_record(&mut record)? {
        let Some(competition_id) = field(&record, id_col) else {
            continue;
        };
        if let Some(date) = assemble_date(
            field(&record, year_col),
            field(&record, month_col),
            field(&record, day_col),
        ) {
            dates.insert(competition_id, date);
        }
    }

    Ok(dates)
}

pub(crate) fn assemble_date(
    year: Option<String>,
    month: Option<String>,
    day: Option<String>,
) -> Option<NaiveDate> {
    let year: i32 = year?.trim().parse().ok()?;
    let month: u32 = month?.trim().parse().ok()?;
    let day: u32 = day?.trim().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Result id to identity row (person, event, competition reference).
pub fn read_result_identities(path: &Path) -> Result<HashMap<String, ResultIdentity>> {
    let mut reader = TsvReader::open(path)?;
    let id_col = reader.column("id")?;
    let person_col = reader.column("person_id")?;
    let event_col = reader.column("event_id")?;
    let competition_col = reader.column("competition_id")?;

    let mut identities = HashMap::new();
    let mut record = ByteRecord::new();
    while reader.read_record(&mut record)? {
        let (Some(result_id), Some(person_id), Some(event_id)) = (
            field(&record, id_col),
            field(&record, person_col),
            field(&record, event_col),
        ) else {
            continue;
        };
        identities.insert(
            result_id,
            ResultIdentity {
                person_id,
                event_id,
                competition_id: field(&record, competition_col),
            },
        );
    }

    Ok(identities)
}

/// Person rows, duplicates included; deduplication happens in the store.
pub fn read_persons(path: &Path) -> Result<Vec<PersonRecord>> {
    let mut reader = TsvReader::open(path)?;
    let id_col = reader.column("wca_id")?;
    let name_col = reader.column("name")?;

    let mut persons = Vec::new();
    let mut record = ByteRecord::new();
    while reader.read_record(&mut record)? {
        let Some(person_id) = field(&record, id_col) else {
            continue;
        };
        persons.push(PersonRecord {
            person_id,
            name: field(&record, name_col),
        });
    }

    Ok(persons)
}
