//! Client records consumed by the scheduler.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a client within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ClientId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Applicant details the portal form asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientProfile {
	pub first_name: String,
	pub last_name: String,
	pub email: String,
	/// Portal account password, when the client books with their own account.
	#[serde(default, skip_serializing)]
	pub password: Option<String>,
	/// `DD/MM/YYYY` when the source value could be parsed.
	#[serde(default)]
	pub date_of_birth: Option<String>,
	#[serde(default)]
	pub mobile_country_code: Option<String>,
	#[serde(default)]
	pub mobile_number: Option<String>,
	pub passport_number: String,
	/// `DD/MM/YYYY` when the source value could be parsed.
	#[serde(default)]
	pub passport_expiry: Option<String>,
	#[serde(default)]
	pub gender: Option<String>,
	#[serde(default)]
	pub nationality: Option<String>,
}

/// Appointment the client wants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentCategory {
	pub visa_type: String,
	pub application_center: String,
	#[serde(default)]
	pub service_center: Option<String>,
	#[serde(default)]
	pub trip_reason: Option<String>,
}

/// One booking task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
	pub id: ClientId,
	pub profile: ClientProfile,
	pub category: AppointmentCategory,
	/// Ordering hint; lower values are scheduled first.
	#[serde(default)]
	pub priority: Option<i32>,
}

impl Client {
	/// Returns `"first last"` for logs and reports.
	pub fn display_name(&self) -> String {
		format!("{} {}", self.profile.first_name, self.profile.last_name).trim().to_string()
	}

	/// Looks up a form field by its source column name.
	///
	/// Used by data-driven portal flows to template step values.
	pub fn field(&self, name: &str) -> Option<&str> {
		let p = &self.profile;
		let c = &self.category;
		match name {
			"id" => Some(self.id.as_str()),
			"first_name" => Some(&p.first_name),
			"last_name" => Some(&p.last_name),
			"email" => Some(&p.email),
			"password" => p.password.as_deref(),
			"date_of_birth" => p.date_of_birth.as_deref(),
			"mobile_country_code" => p.mobile_country_code.as_deref(),
			"mobile_number" => p.mobile_number.as_deref(),
			"passport_number" => Some(&p.passport_number),
			"passport_expiry" => p.passport_expiry.as_deref(),
			"gender" => p.gender.as_deref(),
			"current_nationality" | "nationality" => p.nationality.as_deref(),
			"visa_type" => Some(&c.visa_type),
			"application_center" => Some(&c.application_center),
			"service_center" => c.service_center.as_deref(),
			"trip_reason" => c.trip_reason.as_deref(),
			_ => None,
		}
	}
}
