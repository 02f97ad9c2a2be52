//! Portal flow definitions.
//!
//! A flow file describes a portal as data: where to log in, which steps to
//! run to prepare a session, book, and keep the session alive, which page
//! phrases mean what, and where the confirmation reference is shown.
//!
//! ```json
//! {
//!   "loginUrl": "https://portal.example/login",
//!   "prepare": [
//!     { "type": "fill", "selectors": ["input[type='email']"], "value": "{env:PORTAL_USER}" },
//!     { "type": "click", "selectors": ["button[type='submit']"] }
//!   ],
//!   "book": [
//!     { "type": "select", "selectors": ["mat-select[formcontrolname='centre']"], "option": "{application_center}" },
//!     { "type": "check_slots", "poll_ms": 10000, "max_wait_ms": 120000 }
//!   ]
//! }
//! ```
//!
//! String values may reference client fields as `{field}` and environment
//! variables as `{env:NAME}`. Both are checked when the flow is loaded.

use std::path::Path;

use booker::Client;
use serde::{Deserialize, Serialize};

use super::classify::PageMarkers;
use crate::error::FlowError;

/// Client fields usable as `{field}` placeholders.
pub const TEMPLATE_FIELDS: &[&str] = &[
	"id",
	"first_name",
	"last_name",
	"full_name",
	"email",
	"password",
	"date_of_birth",
	"mobile_country_code",
	"mobile_number",
	"passport_number",
	"passport_expiry",
	"gender",
	"nationality",
	"current_nationality",
	"visa_type",
	"application_center",
	"service_center",
	"trip_reason",
];

const DEFAULT_WAIT_MS: u64 = 30_000;

/// One flow step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
	/// Load a URL, then check the page like [`Step::CheckPage`].
	Goto { url: String },
	Click {
		selectors: Vec<String>,
		#[serde(default)]
		optional: bool,
	},
	/// Skipped when the value renders empty.
	Fill {
		selectors: Vec<String>,
		value: String,
		#[serde(default)]
		human: bool,
		#[serde(default)]
		optional: bool,
	},
	/// Skipped when the option renders empty.
	Select {
		selectors: Vec<String>,
		option: String,
		#[serde(default)]
		optional: bool,
	},
	WaitFor {
		selectors: Vec<String>,
		#[serde(default = "default_wait_ms")]
		timeout_ms: u64,
		#[serde(default)]
		optional: bool,
	},
	/// Random pause in `[min_ms, max_ms]`.
	Pause { min_ms: u64, max_ms: u64 },
	/// Classify the page, treating no-slot markers as terminal. With a
	/// non-zero `max_wait_ms` the page is reloaded every `poll_ms` until slots
	/// show up or the wait runs out; `url`, when set, is loaded instead of the
	/// current page.
	CheckSlots {
		#[serde(default)]
		poll_ms: u64,
		#[serde(default)]
		max_wait_ms: u64,
		#[serde(default)]
		url: Option<String>,
	},
	/// Classify the page, ignoring no-slot markers.
	CheckPage,
}

fn default_wait_ms() -> u64 {
	DEFAULT_WAIT_MS
}

impl Step {
	pub fn kind(&self) -> &'static str {
		match self {
			Step::Goto { .. } => "goto",
			Step::Click { .. } => "click",
			Step::Fill { .. } => "fill",
			Step::Select { .. } => "select",
			Step::WaitFor { .. } => "wait_for",
			Step::Pause { .. } => "pause",
			Step::CheckSlots { .. } => "check_slots",
			Step::CheckPage => "check_page",
		}
	}

	fn selectors(&self) -> Option<&[String]> {
		match self {
			Step::Click { selectors, .. } | Step::Fill { selectors, .. } | Step::Select { selectors, .. } | Step::WaitFor { selectors, .. } => {
				Some(selectors)
			}
			_ => None,
		}
	}

	fn template(&self) -> Option<&str> {
		match self {
			Step::Goto { url } => Some(url),
			Step::CheckSlots { url, .. } => url.as_deref(),
			Step::Fill { value, .. } => Some(value),
			Step::Select { option, .. } => Some(option),
			_ => None,
		}
	}
}

/// How long to wait for an interstitial challenge to pass on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChallengeWait {
	pub timeout_ms: u64,
	pub poll_ms: u64,
}

impl Default for ChallengeWait {
	fn default() -> Self {
		Self {
			timeout_ms: 45_000,
			poll_ms: 3_000,
		}
	}
}

/// Where the booking reference is read from after the last booking step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Confirmation {
	/// Elements whose text may carry the reference, tried in order.
	pub selectors: Vec<String>,
	/// The reference is the first match of this pattern in a selector's text.
	pub pattern: String,
	/// Reported when the submission went through but no reference was found.
	pub fallback: String,
}

impl Default for Confirmation {
	fn default() -> Self {
		Self {
			selectors: [".booking-reference", "[class*='reference']", "[class*='confirmation']", "[class*='booking-id']"]
				.iter()
				.map(|s| s.to_string())
				.collect(),
			pattern: "[A-Z0-9]{6,20}".into(),
			fallback: "SUBMITTED".into(),
		}
	}
}

/// A portal described as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FlowDefinition {
	#[serde(default)]
	pub name: Option<String>,
	pub login_url: String,
	/// Loaded at the start of `book`, when set.
	#[serde(default)]
	pub booking_url: Option<String>,
	#[serde(default)]
	pub prepare: Vec<Step>,
	pub book: Vec<Step>,
	#[serde(default = "default_heartbeat")]
	pub heartbeat: Vec<Step>,
	#[serde(default)]
	pub markers: PageMarkers,
	#[serde(default)]
	pub challenge_wait: ChallengeWait,
	#[serde(default)]
	pub confirmation: Confirmation,
}

fn default_heartbeat() -> Vec<Step> {
	vec![Step::CheckPage]
}

impl FlowDefinition {
	pub fn from_json(json: &str) -> Result<Self, FlowError> {
		let flow: Self = serde_json::from_str(json)?;
		flow.validate()?;
		Ok(flow)
	}

	pub fn load_file(path: &Path) -> Result<Self, FlowError> {
		let json = std::fs::read_to_string(path).map_err(|source| FlowError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_json(&json)
	}

	pub fn display_name(&self) -> &str {
		self.name.as_deref().unwrap_or(&self.login_url)
	}

	/// Checks selectors, pauses, and placeholders in every phase.
	pub fn validate(&self) -> Result<(), FlowError> {
		if self.login_url.trim().is_empty() {
			return Err(FlowError::Invalid("loginUrl is empty".into()));
		}
		if self.book.is_empty() {
			return Err(FlowError::Invalid("book has no steps".into()));
		}
		if self.challenge_wait.poll_ms == 0 {
			return Err(FlowError::Invalid("challengeWait.pollMs must be positive".into()));
		}
		for (phase, steps) in [("prepare", &self.prepare), ("book", &self.book), ("heartbeat", &self.heartbeat)] {
			for (step, item) in steps.iter().enumerate() {
				let invalid = |message: String| FlowError::Step { phase, step, message };
				if item.selectors().is_some_and(|selectors| selectors.iter().all(|s| s.trim().is_empty())) {
					return Err(invalid(format!("{} needs at least one selector", item.kind())));
				}
				if let Step::Pause { min_ms, max_ms } = item {
					if min_ms > max_ms {
						return Err(invalid(format!("pause min_ms {min_ms} exceeds max_ms {max_ms}")));
					}
				}
				if let Step::CheckSlots { poll_ms: 0, max_wait_ms, .. } = item {
					if *max_wait_ms > 0 {
						return Err(invalid("check_slots with max_wait_ms needs a positive poll_ms".into()));
					}
				}
				if let Some(template) = item.template() {
					render(template, |name| if is_known(name) { Ok(String::new()) } else { Err(format!("unknown placeholder {{{name}}}")) })
						.map_err(invalid)?;
				}
			}
		}
		Ok(())
	}
}

fn is_known(name: &str) -> bool {
	match name.strip_prefix("env:") {
		Some(var) => !var.is_empty(),
		None => TEMPLATE_FIELDS.contains(&name),
	}
}

/// Expands `{name}` placeholders through `resolve`.
pub fn render(template: &str, mut resolve: impl FnMut(&str) -> Result<String, String>) -> Result<String, String> {
	let mut out = String::with_capacity(template.len());
	let mut rest = template;
	while let Some(open) = rest.find('{') {
		out.push_str(&rest[..open]);
		let after = &rest[open + 1..];
		let close = after.find('}').ok_or_else(|| format!("unterminated placeholder in {template:?}"))?;
		out.push_str(&resolve(after[..close].trim())?);
		rest = &after[close + 1..];
	}
	out.push_str(rest);
	Ok(out)
}

/// Renders `template` for `client`. Missing optional fields and unset
/// environment variables render empty.
pub fn render_for(template: &str, client: Option<&Client>) -> String {
	render(template, |name| Ok(field_value(name, client).unwrap_or_default())).unwrap_or_else(|_| template.to_string())
}

fn field_value(name: &str, client: Option<&Client>) -> Option<String> {
	if let Some(var) = name.strip_prefix("env:") {
		return std::env::var(var).ok();
	}
	let client = client?;
	match name {
		"full_name" => Some(client.display_name()),
		"mobile_country_code" => client.field(name).map(dial_code),
		_ => client.field(name).map(str::to_string),
	}
}

fn dial_code(code: &str) -> String {
	let code = code.trim();
	if code.is_empty() || code.starts_with('+') { code.to_string() } else { format!("+{code}") }
}

#[cfg(test)]
mod tests {
	use booker::{AppointmentCategory, ClientId, ClientProfile};

	use super::*;

	fn client() -> Client {
		Client {
			id: ClientId::new("ana@example.com"),
			profile: ClientProfile {
				first_name: "Ana".into(),
				last_name: "Silva".into(),
				email: "ana@example.com".into(),
				passport_number: "P123".into(),
				mobile_country_code: Some("245".into()),
				..Default::default()
			},
			category: AppointmentCategory {
				visa_type: "Tourism".into(),
				application_center: "Bissau".into(),
				..Default::default()
			},
			priority: None,
		}
	}

	#[test]
	fn parses_minimal_flow_with_defaults() {
		let flow = FlowDefinition::from_json(r#"{"loginUrl": "https://p.example/login", "book": [{"type": "check_slots"}]}"#).unwrap();
		assert_eq!(flow.heartbeat, vec![Step::CheckPage]);
		assert_eq!(flow.challenge_wait, ChallengeWait::default());
		assert_eq!(flow.confirmation.fallback, "SUBMITTED");
		assert_eq!(flow.display_name(), "https://p.example/login");
	}

	#[test]
	fn step_defaults_apply() {
		let flow = FlowDefinition::from_json(
			r##"{"loginUrl": "u", "book": [{"type": "wait_for", "selectors": ["#slot"]}, {"type": "fill", "selectors": ["#a"], "value": "x"}]}"##,
		)
		.unwrap();
		assert_eq!(
			flow.book[0],
			Step::WaitFor {
				selectors: vec!["#slot".into()],
				timeout_ms: 30_000,
				optional: false
			}
		);
		assert!(matches!(&flow.book[1], Step::Fill { human: false, optional: false, .. }));
	}

	#[test]
	fn unknown_placeholder_is_rejected_with_its_position() {
		let err = FlowDefinition::from_json(
			r##"{"loginUrl": "u", "book": [{"type": "check_page"}, {"type": "fill", "selectors": ["#a"], "value": "{shoe_size}"}]}"##,
		)
		.unwrap_err();
		match err {
			FlowError::Step { phase, step, message } => {
				assert_eq!(phase, "book");
				assert_eq!(step, 1);
				assert!(message.contains("shoe_size"));
			}
			other => panic!("unexpected error {other:?}"),
		}
	}

	#[test]
	fn inverted_pause_and_empty_selectors_are_rejected() {
		assert!(FlowDefinition::from_json(r#"{"loginUrl": "u", "book": [{"type": "pause", "min_ms": 900, "max_ms": 100}]}"#).is_err());
		assert!(FlowDefinition::from_json(r#"{"loginUrl": "u", "book": [{"type": "click", "selectors": []}]}"#).is_err());
		assert!(FlowDefinition::from_json(r#"{"loginUrl": "u", "book": []}"#).is_err());
		assert!(FlowDefinition::from_json(r#"{"loginUrl": "u", "book": [{"type": "teleport"}]}"#).is_err());
	}

	#[test]
	fn slot_monitoring_options() {
		let flow = FlowDefinition::from_json(
			r#"{"loginUrl": "u", "book": [{"type": "check_slots"}, {"type": "check_slots", "poll_ms": 500, "max_wait_ms": 5000, "url": "https://p.example/{visa_type}"}]}"#,
		)
		.unwrap();
		assert_eq!(
			flow.book[0],
			Step::CheckSlots {
				poll_ms: 0,
				max_wait_ms: 0,
				url: None
			}
		);
		assert!(matches!(&flow.book[1], Step::CheckSlots { poll_ms: 500, max_wait_ms: 5000, url: Some(_) }));

		assert!(FlowDefinition::from_json(r#"{"loginUrl": "u", "book": [{"type": "check_slots", "max_wait_ms": 5000}]}"#).is_err());
		assert!(FlowDefinition::from_json(r#"{"loginUrl": "u", "book": [{"type": "check_slots", "poll_ms": 5, "url": "{hat}"}]}"#).is_err());
	}

	#[test]
	fn renders_client_fields() {
		let client = client();
		assert_eq!(render_for("{first_name} {last_name} <{email}>", Some(&client)), "Ana Silva <ana@example.com>");
		assert_eq!(render_for("{mobile_country_code}", Some(&client)), "+245");
		assert_eq!(render_for("{trip_reason}", Some(&client)), "");
		assert_eq!(render_for("centre: {application_center}", None), "centre: ");
	}

	#[test]
	fn unterminated_placeholder_is_an_error() {
		assert!(render("{first_name", |_| Ok(String::new())).is_err());
		assert_eq!(render("plain", |_| Err("unused".into())).unwrap(), "plain");
	}
}
