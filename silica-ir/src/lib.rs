//! Typed intermediate representation for synchronous digital logic.
//!
//! Designs are built once through [`ModuleBuilder`], checked eagerly, and
//! immutable afterwards; simulation state belongs to whichever engine
//! consumes them.

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

mod design;
mod error;
mod expr;
mod module;

pub use design::{Design, ModuleId};
pub use error::BuildError;
pub use expr::{
    mask, sign_extend, BinOp, Expr, ExprId, MemoryId, Op, SignalId, Value, Width, MAX_WIDTH,
};
pub use module::{
    Assign, Connection, Instance, Memory, Module, ModuleBuilder, Operand, ProcId, Process, Sig,
    Signal, SignalKind, WritePort,
};
