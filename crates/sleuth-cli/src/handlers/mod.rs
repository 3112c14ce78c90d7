//! Command handlers - extracted from main.rs for testability
//!
//! Each handler module contains:
//! - The execution logic for a CLI command
//! - Pure helper functions
//! - Tests

pub mod check_config;
pub mod compare;
pub mod mail;
pub mod reconcile;
pub mod run;
pub mod tally;

pub use check_config::execute_check_config;
pub use compare::execute_compare;
pub use mail::execute_mail;
pub use reconcile::execute_reconcile;
pub use run::execute_run;
pub use tally::execute_tally;
