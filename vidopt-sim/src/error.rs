//! Errors raised while describing simulations.

/// Invalid simulation setup.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Invalid simulated media: {reason}")]
    InvalidMedia { reason: String },

    #[error("Unknown scenario: {name}")]
    UnknownScenario { name: String },
}

pub type SimulationResult<T> = Result<T, SimulationError>;
