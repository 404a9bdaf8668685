//! Demo driver for the saga persistence layer.
//!
//! Stands in for a message-handling pipeline: each scenario opens units of
//! work, drives the persister the way a saga handler would, and checks the
//! outcome against the store.

pub mod error;
pub mod scenarios;
pub mod telemetry;

pub use error::DemoError;
pub use scenarios::{OrderSagaData, ScenarioReport, run_all};
