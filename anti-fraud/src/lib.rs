//! Anti-fraud validation service
//!
//! Consumes `transaction-created`, decides a verdict with a pure rule and
//! publishes it on `transaction-validated`, keyed by the transaction id.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod coordinator;
pub mod decision;
pub mod error;

pub use config::Config;
pub use coordinator::ValidationCoordinator;
pub use decision::{FraudRule, ThresholdRule};
pub use error::{Error, Result};
