//! Export download and extraction
//!
//! Retrieves the compressed results export over HTTP and unpacks the four
//! tabular files the pipeline consumes into the working directory.

use crate::config::LoaderConfig;
use crate::error::{LoaderError, Result};
use crate::models::ExportFiles;
use cdp_common::checksum::{compute_buffer_checksum, ChecksumAlgorithm};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// File names expected inside the export archive.
pub const COMPETITIONS_FILE: &str = "WCA_export_competitions.tsv";
pub const RESULTS_FILE: &str = "WCA_export_results.tsv";
pub const ATTEMPTS_FILE: &str = "WCA_export_result_attempts.tsv";
pub const PERSONS_FILE: &str = "WCA_export_persons.tsv";

/// All four, in extraction order.
pub const EXPORT_FILES: [&str; 4] = [COMPETITIONS_FILE, RESULTS_FILE, ATTEMPTS_FILE, PERSONS_FILE];

impl ExportFiles {
    /// Expected file paths under a working directory.
    pub fn under(dir: &Path) -> Self {
        ExportFiles {
            competitions: dir.join(COMPETITIONS_FILE),
            results: dir.join(RESULTS_FILE),
            attempts: dir.join(ATTEMPTS_FILE),
            persons: dir.join(PERSONS_FILE),
        }
    }
}

/// HTTP client for the results export endpoint
pub struct ExportDownloader {
    client: reqwest::Client,
    export_url: String,
    data_dir: PathBuf,
}

impl ExportDownloader {
    /// Create a new downloader from the loader configuration.
    pub fn new(config: &LoaderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent("cdp-loader/0.1")
            .build()?;

        Ok(ExportDownloader {
            client,
            export_url: config.export_url.clone(),
            data_dir: config.data_dir.clone(),
        })
    }

    /// Download the export archive and extract the four expected files.
    pub async fn fetch(&self) -> Result<ExportFiles> {
        info!(url = %self.export_url, "Downloading results export");

        let response = self.client.get(&self.export_url).send().await?;
        if !response.status().is_success() {
            return Err(LoaderError::Retrieval(format!(
                "export endpoint returned {}",
                response.status()
            )));
        }

        let archive = response.bytes().await?;
        info!(
            bytes = archive.len(),
            sha256 = %compute_buffer_checksum(&archive, ChecksumAlgorithm::Sha256),
            "Export downloaded"
        );

        self.extract(&archive)
    }

    /// Unpack the expected files from the archive into the working
    /// directory. Archive members may carry a path prefix, so matching is
    /// on the file name suffix.
    pub fn extract(&self, archive: &[u8]) -> Result<ExportFiles> {
        std::fs::create_dir_all(&self.data_dir)?;

        let mut zip = zip::ZipArchive::new(Cursor::new(archive))
            .map_err(|e| LoaderError::Retrieval(format!("invalid export archive: {e}")))?;
        let members: Vec<String> = zip.file_names().map(str::to_string).collect();

        for expected in EXPORT_FILES {
            let Some(member) = members.iter().find(|name| name.ends_with(expected)) else {
                return Err(LoaderError::MissingFile(expected.to_string()));
            };

            let mut file = zip
                .by_name(member)
                .map_err(|e| LoaderError::Retrieval(format!("cannot read {member}: {e}")))?;
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)?;

            std::fs::write(self.data_dir.join(expected), &contents)?;
            debug!(file = expected, bytes = contents.len(), "Extracted export file");
        }

        info!(dir = %self.data_dir.display(), "Extraction complete");

        Ok(ExportFiles::under(&self.data_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, LoaderConfig};
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn archive_with(members: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in members {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn test_config(data_dir: &Path) -> LoaderConfig {
        LoaderConfig {
            database: DatabaseConfig {
                host: "localhost".to_string(),
                database: "results".to_string(),
                user: "loader".to_string(),
                password: "secret".to_string(),
                port: 5432,
                max_connections: 5,
            },
            export_url: "http://localhost/export".to_string(),
            data_dir: data_dir.to_path_buf(),
            http_timeout_secs: 30,
            connect_attempts: 1,
            connect_retry_delay_secs: 1,
            skip_if_loaded: false,
        }
    }

    fn full_archive() -> Vec<u8> {
        archive_with(&[
            ("export/WCA_export_competitions.tsv", "id\tyear\tmonth\tday\n"),
            (
                "export/WCA_export_results.tsv",
                "id\tperson_id\tevent_id\tcompetition_id\n",
            ),
            ("export/WCA_export_result_attempts.tsv", "result_id\tvalue\n"),
            ("export/WCA_export_persons.tsv", "wca_id\tname\n"),
        ])
    }

    #[test]
    fn test_extract_writes_all_four_files() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ExportDownloader::new(&test_config(dir.path())).unwrap();

        let files = downloader.extract(&full_archive()).unwrap();

        assert!(files.competitions.exists());
        assert!(files.results.exists());
        assert!(files.attempts.exists());
        assert!(files.persons.exists());
    }

    #[test]
    fn test_extract_missing_member() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ExportDownloader::new(&test_config(dir.path())).unwrap();

        let archive = archive_with(&[(
            "export/WCA_export_competitions.tsv",
            "id\tyear\tmonth\tday\n",
        )]);
        let err = downloader.extract(&archive).unwrap_err();

        assert!(matches!(err, LoaderError::MissingFile(name) if name == RESULTS_FILE));
    }

    #[test]
    fn test_extract_rejects_garbage_archive() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ExportDownloader::new(&test_config(dir.path())).unwrap();

        let err = downloader.extract(b"not a zip file").unwrap_err();
        assert!(matches!(err, LoaderError::Retrieval(_)));
    }
}
