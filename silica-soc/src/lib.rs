//! Single-cycle RV32IMA + Sv32 + M/S-mode reference SoC, built on the
//! silica IR and simulator and driven through the [`Machine`] harness.

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
use silica_soc as _;

pub mod consts;
pub mod core;
pub mod devices;
mod error;
pub mod machine;

#[cfg(any(test, feature = "test-helpers"))]
pub mod asm;

pub use error::MachineError;
pub use machine::{Machine, MachineParams};
