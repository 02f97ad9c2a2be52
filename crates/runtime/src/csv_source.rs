//! Client records from a CSV file.
//!
//! The header row names the columns; names are matched case-insensitively
//! and surrounding whitespace is ignored. Rows that cannot be decoded (bad
//! UTF-8, for instance) become unreadable records and are skipped with a
//! warning at load, like any other malformed record.

use std::path::{Path, PathBuf};

use booker::queue::{ClientDataSource, RawRecord};
use booker::{CoreError, Result};
use csv::{ReaderBuilder, Trim};
use tracing::debug;

use crate::error::SourceError;

/// [`ClientDataSource`] reading a CSV file with a header row.
#[derive(Debug, Clone)]
pub struct CsvClientSource {
	path: PathBuf,
	delimiter: u8,
}

impl CsvClientSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			delimiter: b',',
		}
	}

	/// Uses `delimiter` instead of a comma.
	pub fn delimiter(mut self, delimiter: u8) -> Self {
		self.delimiter = delimiter;
		self
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn read(&self) -> std::result::Result<Vec<RawRecord>, SourceError> {
		let mut reader = ReaderBuilder::new()
			.delimiter(self.delimiter)
			.trim(Trim::All)
			.flexible(true)
			.from_path(&self.path)
			.map_err(|source| SourceError::Open {
				path: self.path.clone(),
				source,
			})?;

		let headers: Vec<String> = reader
			.headers()
			.map_err(|source| SourceError::Header {
				path: self.path.clone(),
				source,
			})?
			.iter()
			.map(|name| name.trim().trim_start_matches('\u{feff}').to_ascii_lowercase())
			.collect();
		if headers.iter().all(String::is_empty) {
			return Err(SourceError::NoHeader { path: self.path.clone() });
		}

		let mut records = Vec::new();
		for (index, row) in reader.records().enumerate() {
			let number = index + 1;
			let row = match row {
				Ok(row) => row,
				Err(err) => {
					records.push(RawRecord::unreadable(number, err.to_string()));
					continue;
				}
			};
			if row.iter().all(|value| value.is_empty()) {
				continue;
			}
			let mut record = RawRecord::new(number);
			for (name, value) in headers.iter().zip(row.iter()) {
				if !name.is_empty() {
					record.insert(name, value);
				}
			}
			records.push(record);
		}
		debug!(target = "booker.csv", path = %self.path.display(), records = records.len(), "client file read");
		Ok(records)
	}
}

impl ClientDataSource for CsvClientSource {
	fn describe(&self) -> String {
		self.path.display().to_string()
	}

	fn records(&self) -> Result<Vec<RawRecord>> {
		self.read().map_err(CoreError::from)
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use booker::ClientQueue;
	use tempfile::NamedTempFile;

	use super::*;

	fn csv_file(contents: &[u8]) -> NamedTempFile {
		let mut file = NamedTempFile::new().unwrap();
		file.write_all(contents).unwrap();
		file.flush().unwrap();
		file
	}

	#[test]
	fn reads_records_with_normalized_headers() {
		let file = csv_file(
			b"\xef\xbb\xbfFirst_Name , Last_Name,email,passport_number,visa_type,application_center\n\
			  Ana, Silva ,ana@example.com,P1,Tourism,Bissau\n\
			  \n\
			  Rui,Costa,rui@example.com,P2,Work,Bissau\n",
		);
		let records = CsvClientSource::new(file.path()).records().unwrap();
		assert_eq!(records.len(), 2);
		assert_eq!(records[0].get("first_name"), Some("Ana"));
		assert_eq!(records[0].get("last_name"), Some("Silva"));
		assert_eq!(records[1].record, 2);
		assert_eq!(records[1].get("first_name"), Some("Rui"));
	}

	#[test]
	fn short_rows_and_bad_bytes_become_warnings_at_load() {
		let mut contents = b"first_name,last_name,email,passport_number,visa_type,application_center\n".to_vec();
		contents.extend_from_slice(b"Ana,Silva,ana@example.com,P1,Tourism,Bissau\n");
		contents.extend_from_slice(b"Rui,Costa\n");
		contents.extend_from_slice(b"Eva,\xff\xfe,eva@example.com,P3,Tourism,Bissau\n");
		let file = csv_file(&contents);

		let queue = ClientQueue::load(&CsvClientSource::new(file.path()), 10).unwrap();
		assert_eq!(queue.len(), 1);
		assert_eq!(queue.warnings().len(), 2);
		assert_eq!(queue.warnings()[0].record, 2);
		assert_eq!(queue.warnings()[1].record, 3);
	}

	#[test]
	fn semicolon_delimiter() {
		let file = csv_file(b"first_name;email\nAna;ana@example.com\n");
		let records = CsvClientSource::new(file.path()).delimiter(b';').records().unwrap();
		assert_eq!(records[0].get("email"), Some("ana@example.com"));
	}

	#[test]
	fn missing_file_is_a_source_error() {
		let err = CsvClientSource::new("/definitely/not/here.csv").records().unwrap_err();
		assert!(matches!(err, CoreError::Source(msg) if msg.contains("not/here.csv")));
	}

	#[test]
	fn empty_file_has_no_header() {
		let file = csv_file(b"");
		assert!(matches!(CsvClientSource::new(file.path()).records(), Err(CoreError::Source(msg)) if msg.contains("no header")));
	}
}
