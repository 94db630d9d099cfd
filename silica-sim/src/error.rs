//! Simulator error types.

/// Errors detected while flattening and scheduling a design.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ElaborationError {
    /// The combinational graph contains a cycle that does not cross a
    /// register or memory boundary, so no settle order exists.
    #[error("combinational cycle through `{signal}`")]
    CombinationalCycle {
        /// Hierarchical path of one signal on the cycle.
        signal: String,
    },

    /// An instance referenced a module id missing from the design.
    #[error("instance `{0}` references a module that is not in the design")]
    MissingModule(String),

    /// Two drivers resolved onto one flattened node. The builder prevents
    /// this within a module; it can only arise from a corrupted design.
    #[error("`{signal}` is driven more than once after flattening")]
    DuplicateDriver {
        /// Hierarchical path of the multiply-driven signal.
        signal: String,
    },
}

/// Errors surfaced by the runtime `poke`/`peek` contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum SimulationError {
    /// The named signal does not exist in the flattened design.
    #[error("no such signal `{0}`")]
    NoSuchSignal(String),

    /// Only top-level input ports may be poked.
    #[error("`{0}` is not a top-level input")]
    NotAnInput(String),

    /// The named memory does not exist in the flattened design.
    #[error("no such memory `{0}`")]
    NoSuchMemory(String),
}
