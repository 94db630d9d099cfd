//! SoC-level error type.

/// Errors surfaced by the [`Machine`](crate::Machine) harness.
///
/// Architectural faults (illegal instructions, page faults, environment
/// calls) are guest events delivered through the trap protocol and never
/// appear here.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MachineError {
    /// Constructing the core IR failed.
    #[error("failed to build the core: {0}")]
    Build(#[from] silica_ir::BuildError),

    /// Flattening or scheduling the design failed.
    #[error("failed to elaborate the design: {0}")]
    Elaborate(#[from] silica_sim::ElaborationError),

    /// A poke/peek against the elaborated design failed.
    #[error(transparent)]
    Simulation(#[from] silica_sim::SimulationError),
}
