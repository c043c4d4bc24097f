//! Error types for the capture device registry and pool manager.

use thiserror::Error;

/// Errors raised while turning a construction recipe into a live device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstantiationError {
    /// No constructor is registered under the recipe's implementation tag.
    #[error("Unknown device implementation: {0}")]
    UnknownImplementation(String),

    /// The recipe supplies a different number of arguments than the constructor declares.
    #[error("Argument count mismatch for {implementation}: expected {expected}, got {actual}")]
    ArityMismatch {
        implementation: String,
        expected: usize,
        actual: usize,
    },

    /// An argument does not have the kind the constructor declares at that position.
    #[error("Argument {index} for {implementation} has kind {actual}, expected {expected}")]
    ArgumentType {
        implementation: String,
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },

    /// The constructed value does not satisfy the capture device surface.
    #[error("Constructed device failed capability check: {0}")]
    CapabilityCheck(String),

    /// The constructor itself rejected its arguments.
    #[error("Device constructor failed: {0}")]
    Construction(String),
}

/// Errors surfaced by the registry, descriptor factory and pool manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// A device or descriptor with this name already exists.
    #[error("Name already in use: {0}")]
    DuplicateName(String),

    /// A recipe could not be instantiated.
    #[error("Instantiation failed: {0}")]
    Instantiation(#[from] InstantiationError),

    /// Unknown device, descriptor, alias or pool.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Every member of the pool is locked. Routine tuner exhaustion.
    #[error("No available capture device in pool {0}")]
    NoAvailableDevice(String),

    /// Internal bookkeeping disagrees with device state.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl CaptureError {
    /// Returns true for outcomes that are expected during normal operation.
    ///
    /// Callers should not log these as faults.
    pub fn is_routine(&self) -> bool {
        matches!(self, CaptureError::NoAvailableDevice(_))
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
