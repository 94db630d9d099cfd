//! Build-time validation errors.

use crate::expr::Width;

/// Errors raised while constructing a module or wiring a design.
///
/// Construction is eager: the builder rejects the offending call instead of
/// deferring to a later validation pass, so the error always points at the
/// exact declaration that broke the rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum BuildError {
    /// A signal or memory name was declared twice within one module.
    #[error("name `{0}` is already defined in this module")]
    DuplicateName(String),

    /// A signal name was referenced but never declared.
    #[error("unknown signal `{0}`")]
    UnknownSignal(String),

    /// A net, output port or register already has a driver.
    #[error("`{0}` already has a driver")]
    DuplicateDriver(String),

    /// A declared width is outside `1..=MAX_WIDTH`.
    #[error("width {width} of `{name}` is outside 1..=64")]
    WidthOutOfRange {
        /// Declaration the width belongs to.
        name: String,
        /// The rejected width.
        width: u64,
    },

    /// A port binding's widths disagree; bindings never extend or truncate.
    #[error(
        "width mismatch binding port `{port}` of instance `{instance}`: \
         port is {port_width} bits, bound signal is {signal_width}"
    )]
    BindWidthMismatch {
        /// Instance being wired.
        instance: String,
        /// Child port name.
        port: String,
        /// Width declared on the child port.
        port_width: Width,
        /// Width of the parent-side signal.
        signal_width: Width,
    },

    /// A bit or bit-range index exceeds the source expression's width.
    #[error("bits {hi}..{lo} are out of bounds for a {width}-bit expression")]
    SliceOutOfRange {
        /// High bit index (inclusive).
        hi: Width,
        /// Low bit index (inclusive).
        lo: Width,
        /// Width of the sliced expression.
        width: Width,
    },

    /// A mux selector must be exactly one bit wide.
    #[error("mux selector is {0} bits wide, expected 1")]
    MuxSelectorWidth(Width),

    /// Sign extension cannot narrow.
    #[error("sign extension from {from} to {to} bits would narrow")]
    SignExtendNarrows {
        /// Source width.
        from: Width,
        /// Requested width.
        to: Width,
    },

    /// Concatenation of zero parts has no width.
    #[error("empty concatenation")]
    EmptyConcat,

    /// Replication count must be at least one.
    #[error("replication count of zero")]
    ZeroRepeat,

    /// The named signal cannot be the target of this construct.
    #[error("`{name}` is not a {expected}")]
    WrongSignalKind {
        /// Offending signal.
        name: String,
        /// What the construct required, e.g. "register".
        expected: &'static str,
    },

    /// A memory depth of zero cells is unrepresentable.
    #[error("memory `{0}` has zero depth")]
    ZeroDepth(String),

    /// An instance referenced a module id not present in the design.
    #[error("instance `{0}` references a module that is not in the design")]
    UnknownModule(String),

    /// An instance bound a port name the child module does not declare.
    #[error("module `{module}` has no port `{port}`")]
    UnknownPort {
        /// Child module name.
        module: String,
        /// The missing port.
        port: String,
    },

    /// An instance left a child input port unbound.
    #[error("input port `{port}` of instance `{instance}` is unbound")]
    UnboundPort {
        /// Instance being wired.
        instance: String,
        /// The unbound child input.
        port: String,
    },

    /// Output ports must be bound to a plain, undriven wire on the parent side.
    #[error(
        "output port `{port}` of instance `{instance}` must be bound to an undriven wire"
    )]
    OutputBindNotWire {
        /// Instance being wired.
        instance: String,
        /// Child output port.
        port: String,
    },

    /// A net or output port ended up with no driver at `build()`.
    #[error("`{0}` has no driver")]
    UndrivenSignal(String),
}
