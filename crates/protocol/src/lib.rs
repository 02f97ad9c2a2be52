//! Data types for the booking engine.
//!
//! This crate contains the serde-serializable types exchanged between the
//! scheduler, its browser/portal collaborators and the reporters. These types
//! represent the "data layer": client records, per-attempt outcomes, run
//! summaries and the browser actions sent to a driver.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization, display and classification
//! * Closed: Failure reasons are exhaustive enums, never free-form strings
//! * Stable: Changes only when the report or driver wire format changes
//!
//! Scheduling behavior is built on top of these types in `booker-core`.

pub mod action;
pub mod client;
pub mod outcome;
pub mod summary;

pub use action::*;
pub use client::*;
pub use outcome::*;
pub use summary::*;
