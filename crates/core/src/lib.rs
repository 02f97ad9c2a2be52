//! Scheduling and session-orchestration engine for timed appointment booking.
//!
//! The engine decides, for a queue of clients, in what order and with what
//! concurrency browser sessions are driven through a portal's booking flow:
//!
//! * [`queue`] loads and orders clients from a [`queue::ClientDataSource`]
//! * [`warmer`] opens and pre-authenticates sessions ahead of the window and
//!   keeps them alive until they are claimed
//! * [`executor`] drives one session through the booking flow to an
//!   [`AttemptResult`]
//! * [`retry`] decides whether a failure is retried and after what backoff
//! * [`scheduler`] times warmup and dispatch against the opening instant and
//!   aggregates a [`RunSummary`]
//!
//! The browser and the portal are collaborators behind the [`driver`] and
//! [`portal`] traits; [`sim`] provides in-memory versions of both.

pub mod clock;
pub mod driver;
pub mod error;
pub mod executor;
pub mod plan;
pub mod portal;
pub mod queue;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod sim;
pub mod warmer;

pub use booker_protocol::{
	AbandonReason, Action, AppointmentCategory, AttemptResult, Client, ClientId, ClientProfile, ClientReport, DispatchKind, FailureReason,
	InteractOutcome, OutcomeCounts, RetryableReason, RunSummary, TerminalReason,
};
pub use driver::{BrowserDriver, DriverError, DriverHandle};
pub use error::{CoreError, Result};
pub use plan::{ColdDispatchPolicy, ConcurrencyMode, RunPlan};
pub use portal::PortalAdapter;
pub use queue::{ClientDataSource, ClientQueue};
pub use report::Reporter;
pub use scheduler::{ConcurrencyScheduler, SchedulerState};
pub use session::Session;
