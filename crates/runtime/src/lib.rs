//! Concrete collaborators for the booking engine.
//!
//! * [`rpc::RpcDriver`]: [`booker::BrowserDriver`] backed by an external
//!   browser driver daemon speaking JSON-RPC over HTTP
//! * [`portal::FlowPortal`]: [`booker::PortalAdapter`] that runs a portal
//!   flow described in a JSON file
//! * [`csv_source::CsvClientSource`]: client records from a CSV file
//! * [`results::ResultsFileReporter`]: writes each run summary to a
//!   timestamped JSON file

pub mod csv_source;
pub mod error;
pub mod portal;
pub mod results;
pub mod rpc;

pub use csv_source::CsvClientSource;
pub use error::{FlowError, SourceError};
pub use portal::FlowPortal;
pub use results::ResultsFileReporter;
pub use rpc::RpcDriver;
