//! Cycle-accurate simulator for [`silica_ir`] designs.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]
#![deny(unused_crate_dependencies)]
#![deny(
    clippy::arithmetic_side_effects,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::string_slice
)]

#[cfg(test)]
use criterion as _;

mod elaborate;
mod error;
mod simulator;
mod state;

pub use error::{ElaborationError, SimulationError};
pub use simulator::Simulator;
