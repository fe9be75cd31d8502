//! Collection of all error types.
//!
//! All errors derive [`thiserror::Error`], making them composable when allowed
//! and compatible with application code using [`anyhow`][anyhow].
//!
//! [anyhow]: https://crates.io/crates/anyhow

use thiserror::Error;

/// Returned when an operation requiring a specific number of parameters
/// encounters an array of the wrong length.
#[derive(Debug, Error)]
#[error("expected {expected} {what}, but got {got}")]
pub struct LengthError {
    pub what: &'static str,
    pub expected: usize,
    pub got: usize,
}

impl LengthError {
    pub(crate) fn check(what: &'static str, expected: usize, got: usize)
        -> Result<(), Self>
    {
        (expected == got).then_some(())
            .ok_or(Self { what, expected, got })
    }
}

/// Returned from functions in [`hilbert`][crate::hilbert].
#[derive(Debug, Error)]
pub enum StateError {
    /// Returned when a state is built from no components.
    #[error("a superposition needs at least one component")]
    Empty,

    /// Returned when a motional level does not fit in the truncated space.
    #[error("motional level {0} is outside the truncation of {1} levels")]
    Truncated(usize, usize),

    /// Returned when the same basis state appears twice in a superposition.
    #[error("basis state {0} appears more than once in a superposition")]
    Duplicate(String),

    /// Returned when parsing an internal state label other than `g` or `e`.
    #[error("unknown internal state '{0}'; expected 'g' or 'e'")]
    BadInternal(char),
}

/// Returned from operations on a [`PulseSequence`][crate::sequence::PulseSequence].
#[derive(Debug, Error)]
pub enum SequenceError {
    /// Returned when constructing a sequence with no pulses.
    #[error("you must have at least one colour in the sequence")]
    NoColours,

    /// Returned when parsing a colour label other than `c`, `r`, or `b`.
    #[error("unknown colour '{0}'; expected 'c', 'r', or 'b'")]
    BadColour(char),

    /// Returned when a target state is required but none was configured.
    #[error("a target state must be set to compute distances or optimise")]
    NoTarget,

    /// Returned when phases are omitted outside of fixed-phase mode.
    #[error("phases must be supplied when not in fixed-phase mode")]
    NoPhases,

    /// Returned when tracing with no angles given and none previously used.
    #[error("no angles given and none have been evaluated yet")]
    NoAngles,

    /// Returned when a phase vector fits neither of the accepted layouts.
    #[error("there are {targets} elements of the target, but got {got} phases")]
    PhaseCount { targets: usize, got: usize },

    /// [`LengthError`]
    #[error("length error: {0}")]
    Length(#[from] LengthError),

    /// [`StateError`]
    #[error("state error: {0}")]
    State(#[from] StateError),
}

pub type SeqResult<T> = Result<T, SequenceError>;

impl SequenceError {
    pub(crate) fn check_phases(targets: usize, got: usize) -> SeqResult<()> {
        (got + 1 == targets || got == targets).then_some(())
            .ok_or(Self::PhaseCount { targets, got })
    }
}
