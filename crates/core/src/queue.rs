//! Client loading and ordering.
//!
//! [`ClientQueue::load`] turns raw source records into validated [`Client`]s.
//! Record-level problems (missing fields, duplicate ids, bad priority) are
//! downgraded to [`LoadWarning`]s and the record is skipped; only a source
//! that cannot be read at all fails the load.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use booker_protocol::{AppointmentCategory, Client, ClientId, ClientProfile};
use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};

/// Columns every record must carry.
pub const REQUIRED_FIELDS: &[&str] = &["first_name", "last_name", "email", "passport_number", "visa_type", "application_center"];

const DATE_LAYOUTS: &[&str] = &["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y", "%d.%m.%Y", "%Y/%m/%d"];

/// One record as read from a source, keyed by lower-cased column name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
	/// 1-based position in the source, for diagnostics.
	pub record: usize,
	pub fields: BTreeMap<String, String>,
	/// Set by sources that could not decode the record.
	pub problem: Option<String>,
}

impl RawRecord {
	pub fn new(record: usize) -> Self {
		Self {
			record,
			fields: BTreeMap::new(),
			problem: None,
		}
	}

	/// A record the source could not decode; it is skipped with a warning.
	pub fn unreadable(record: usize, problem: impl Into<String>) -> Self {
		Self {
			problem: Some(problem.into()),
			..Self::new(record)
		}
	}

	pub fn with(mut self, key: &str, value: &str) -> Self {
		self.insert(key, value);
		self
	}

	pub fn insert(&mut self, key: &str, value: &str) {
		self.fields.insert(key.trim().to_ascii_lowercase(), value.to_string());
	}

	/// Trimmed value, `None` when absent or blank.
	pub fn get(&self, key: &str) -> Option<&str> {
		self.fields.get(key).map(|value| value.trim()).filter(|value| !value.is_empty())
	}
}

/// Where client records come from.
pub trait ClientDataSource: Send + Sync {
	/// Short description for logs, e.g. a file path.
	fn describe(&self) -> String;

	/// Reads every record. An error here is fatal for the run.
	fn records(&self) -> Result<Vec<RawRecord>>;
}

/// In-memory source.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
	records: Vec<RawRecord>,
}

impl VecSource {
	pub fn new(records: Vec<RawRecord>) -> Self {
		Self { records }
	}
}

impl ClientDataSource for VecSource {
	fn describe(&self) -> String {
		format!("memory ({} records)", self.records.len())
	}

	fn records(&self) -> Result<Vec<RawRecord>> {
		Ok(self.records.clone())
	}
}

/// A record that was skipped during load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadWarning {
	pub record: usize,
	pub message: String,
}

impl fmt::Display for LoadWarning {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "record {}: {}", self.record, self.message)
	}
}

impl From<CoreError> for LoadWarning {
	fn from(err: CoreError) -> Self {
		match err {
			CoreError::InvalidClientData { record, message } => LoadWarning { record, message },
			other => LoadWarning {
				record: 0,
				message: other.to_string(),
			},
		}
	}
}

/// Ordered, deduplicated clients for one run.
#[derive(Debug, Clone, Default)]
pub struct ClientQueue {
	clients: Vec<Arc<Client>>,
	warnings: Vec<LoadWarning>,
}

impl ClientQueue {
	/// Loads clients from `source`, keeping at most `max_clients`.
	///
	/// Order is source order, or ascending priority when any record has one
	/// (stable; records without a priority go last).
	pub fn load(source: &dyn ClientDataSource, max_clients: usize) -> Result<Self> {
		let records = source.records()?;
		debug!(target = "booker.queue", source = %source.describe(), records = records.len(), "loading clients");

		let mut seen = HashSet::new();
		let mut clients = Vec::new();
		let mut warnings = Vec::new();
		for record in &records {
			match parse_record(record) {
				Ok(client) if !seen.insert(client.id.clone()) => {
					warnings.push(LoadWarning {
						record: record.record,
						message: format!("duplicate client id {}", client.id),
					});
				}
				Ok(client) => clients.push(client),
				Err(err) => warnings.push(LoadWarning::from(err)),
			}
		}
		for warning in &warnings {
			warn!(target = "booker.queue", record = warning.record, message = %warning.message, "skipping client record");
		}

		if clients.iter().any(|client| client.priority.is_some()) {
			clients.sort_by_key(|client| client.priority.unwrap_or(i32::MAX));
		}
		if clients.len() > max_clients {
			info!(target = "booker.queue", loaded = clients.len(), max_clients, "truncating client list");
			clients.truncate(max_clients);
		}

		Ok(Self {
			clients: clients.into_iter().map(Arc::new).collect(),
			warnings,
		})
	}

	pub fn from_clients(clients: Vec<Client>) -> Self {
		Self {
			clients: clients.into_iter().map(Arc::new).collect(),
			warnings: Vec::new(),
		}
	}

	pub fn clients(&self) -> &[Arc<Client>] {
		&self.clients
	}

	pub fn warnings(&self) -> &[LoadWarning] {
		&self.warnings
	}

	pub fn len(&self) -> usize {
		self.clients.len()
	}

	pub fn is_empty(&self) -> bool {
		self.clients.is_empty()
	}
}

fn parse_record(raw: &RawRecord) -> Result<Client> {
	let invalid = |message: String| CoreError::InvalidClientData {
		record: raw.record,
		message,
	};

	if let Some(problem) = &raw.problem {
		return Err(invalid(problem.clone()));
	}
	let missing: Vec<&str> = REQUIRED_FIELDS.iter().copied().filter(|field| raw.get(field).is_none()).collect();
	if !missing.is_empty() {
		return Err(invalid(format!("missing required field(s): {}", missing.join(", "))));
	}
	let required = |field: &str| raw.get(field).unwrap_or_default().to_string();
	let optional = |field: &str| raw.get(field).map(str::to_string);

	let email = required("email");
	if !email.contains('@') {
		return Err(invalid(format!("malformed email {email:?}")));
	}
	let id = raw.get("id").map(str::to_string).unwrap_or_else(|| email.to_ascii_lowercase());
	let priority = match raw.get("priority") {
		Some(value) => Some(value.parse::<i32>().map_err(|_| invalid(format!("priority {value:?} is not an integer")))?),
		None => None,
	};

	Ok(Client {
		id: ClientId::new(id),
		profile: ClientProfile {
			first_name: required("first_name"),
			last_name: required("last_name"),
			email,
			password: optional("password"),
			date_of_birth: raw.get("date_of_birth").map(normalize_date),
			mobile_country_code: optional("mobile_country_code"),
			mobile_number: optional("mobile_number"),
			passport_number: required("passport_number"),
			passport_expiry: raw.get("passport_expiry").map(normalize_date),
			gender: optional("gender"),
			nationality: optional("current_nationality").or_else(|| optional("nationality")),
		},
		category: AppointmentCategory {
			visa_type: required("visa_type"),
			application_center: required("application_center"),
			service_center: optional("service_center"),
			trip_reason: optional("trip_reason"),
		},
		priority,
	})
}

/// Rewrites a date to `DD/MM/YYYY` when it parses in a known layout.
pub fn normalize_date(value: &str) -> String {
	DATE_LAYOUTS
		.iter()
		.find_map(|layout| NaiveDate::parse_from_str(value, layout).ok())
		.map(|date| date.format("%d/%m/%Y").to_string())
		.unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn valid(record: usize, email: &str) -> RawRecord {
		RawRecord::new(record)
			.with("first_name", "Ana")
			.with("last_name", "Silva")
			.with("email", email)
			.with("passport_number", "P123")
			.with("visa_type", "Tourism")
			.with("application_center", "Lisbon")
	}

	#[test]
	fn one_malformed_record_yields_one_warning() {
		let source = VecSource::new(vec![
			valid(1, "a@example.com"),
			valid(2, "b@example.com").with("passport_number", "  "),
			valid(3, "c@example.com"),
			valid(4, "d@example.com"),
		]);
		let queue = ClientQueue::load(&source, 10).unwrap();
		assert_eq!(queue.len(), 3);
		assert_eq!(queue.warnings().len(), 1);
		assert_eq!(queue.warnings()[0].record, 2);
		assert!(queue.warnings()[0].message.contains("passport_number"));
	}

	#[test]
	fn id_defaults_to_lowercased_email_and_duplicates_are_skipped() {
		let source = VecSource::new(vec![valid(1, "Ana@Example.com"), valid(2, "ana@example.com")]);
		let queue = ClientQueue::load(&source, 10).unwrap();
		assert_eq!(queue.len(), 1);
		assert_eq!(queue.clients()[0].id.as_str(), "ana@example.com");
		assert!(queue.warnings()[0].message.contains("duplicate"));
	}

	#[test]
	fn priority_sort_is_stable_and_truncates_after() {
		let source = VecSource::new(vec![
			valid(1, "a@x.io"),
			valid(2, "b@x.io").with("priority", "2"),
			valid(3, "c@x.io").with("priority", "1"),
			valid(4, "d@x.io").with("priority", "2"),
		]);
		let queue = ClientQueue::load(&source, 3).unwrap();
		let ids: Vec<&str> = queue.clients().iter().map(|c| c.id.as_str()).collect();
		assert_eq!(ids, ["c@x.io", "b@x.io", "d@x.io"]);
	}

	#[test]
	fn source_order_kept_without_priorities() {
		let source = VecSource::new(vec![valid(1, "z@x.io"), valid(2, "a@x.io")]);
		let queue = ClientQueue::load(&source, 5).unwrap();
		assert_eq!(queue.clients()[0].id.as_str(), "z@x.io");
	}

	#[test]
	fn undecodable_record_is_a_warning() {
		let source = VecSource::new(vec![valid(1, "a@x.io"), RawRecord::unreadable(2, "invalid UTF-8")]);
		let queue = ClientQueue::load(&source, 5).unwrap();
		assert_eq!(queue.len(), 1);
		assert_eq!(queue.warnings()[0].to_string(), "record 2: invalid UTF-8");
	}

	#[test]
	fn bad_priority_is_a_warning() {
		let source = VecSource::new(vec![valid(1, "a@x.io").with("priority", "high")]);
		let queue = ClientQueue::load(&source, 5).unwrap();
		assert!(queue.is_empty());
		assert_eq!(queue.warnings().len(), 1);
	}

	#[test]
	fn dates_are_normalized_when_parseable() {
		assert_eq!(normalize_date("1990-04-07"), "07/04/1990");
		assert_eq!(normalize_date("07.04.1990"), "07/04/1990");
		assert_eq!(normalize_date("07/04/1990"), "07/04/1990");
		assert_eq!(normalize_date("April 7th"), "April 7th");
	}

	#[test]
	fn explicit_id_column_wins() {
		let source = VecSource::new(vec![valid(1, "a@x.io").with("id", "client-7").with("current_nationality", "Angolan")]);
		let queue = ClientQueue::load(&source, 5).unwrap();
		let client = &queue.clients()[0];
		assert_eq!(client.id.as_str(), "client-7");
		assert_eq!(client.profile.nationality.as_deref(), Some("Angolan"));
	}

	struct Broken;

	impl ClientDataSource for Broken {
		fn describe(&self) -> String {
			"broken".into()
		}

		fn records(&self) -> Result<Vec<RawRecord>> {
			Err(CoreError::Source("unreadable".into()))
		}
	}

	#[test]
	fn unreadable_source_fails_the_load() {
		assert!(matches!(ClientQueue::load(&Broken, 5), Err(CoreError::Source(_))));
	}
}
