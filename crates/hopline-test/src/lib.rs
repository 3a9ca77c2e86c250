//! Hopline Test - shared test utilities.
//!
//! Mock package hosts, process pools, engines and bridge views that record
//! what the orchestrator asks of them, plus fixtures and a harness that
//! wires them into an [`InstanceOrchestrator`](hopline_instance::InstanceOrchestrator).
//!
//! ```toml
//! [dev-dependencies]
//! hopline-test.workspace = true
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
