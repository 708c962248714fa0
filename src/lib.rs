#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod agents;
pub mod config;
pub mod confirmation;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod workflow;

pub use config::Config;
pub use error::{GreenlightError, Result};
