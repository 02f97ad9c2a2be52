//! Browser interactions sent to a driver and the outcomes it reports back.

use serde::{Deserialize, Serialize};

/// One page interaction.
///
/// Selector lists are tried in order and the first visible match is used, so
/// a flow can list fallbacks for portals that rename their form controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
	Click {
		selectors: Vec<String>,
	},
	Fill {
		selectors: Vec<String>,
		value: String,
		/// Type character by character with randomized delays.
		#[serde(default)]
		human: bool,
	},
	Select {
		selectors: Vec<String>,
		option: String,
	},
	WaitFor {
		selectors: Vec<String>,
		timeout_ms: u64,
	},
	ReadText {
		selectors: Vec<String>,
	},
	PageSource,
	CurrentUrl,
	Evaluate {
		script: String,
	},
}

impl Action {
	/// Short name used in logs.
	pub fn name(&self) -> &'static str {
		match self {
			Action::Click { .. } => "click",
			Action::Fill { .. } => "fill",
			Action::Select { .. } => "select",
			Action::WaitFor { .. } => "wait_for",
			Action::ReadText { .. } => "read_text",
			Action::PageSource => "page_source",
			Action::CurrentUrl => "current_url",
			Action::Evaluate { .. } => "evaluate",
		}
	}
}

/// Result of an [`Action`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractOutcome {
	/// The action ran and produced no value.
	Done,
	/// The action produced text (page source, element text, URL, script value).
	Text { value: String },
	/// None of the selectors matched a visible element.
	NotFound,
}

impl InteractOutcome {
	pub fn text(&self) -> Option<&str> {
		match self {
			InteractOutcome::Text { value } => Some(value),
			_ => None,
		}
	}
}
