// Error taxonomy for the optimizer.

use thiserror::Error;

use crate::player::PlayerId;

/// Structural problems with the caller's input, detected before any solve.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("candidate pool is empty")]
    EmptyPool,

    #[error("player id {0} appears more than once in the candidate pool")]
    DuplicateId(PlayerId),

    #[error("player {id} has a non-finite score")]
    NonFiniteScore { id: PlayerId },

    #[error("prior squad must contain exactly {expected} players, got {found}")]
    PriorSquadSize { expected: usize, found: usize },

    #[error("prior squad lists player id {0} more than once")]
    DuplicatePriorId(PlayerId),

    #[error("prior squad player id {0} is not in the candidate pool")]
    UnknownPriorId(PlayerId),

    #[error("transfer count {count} is out of range (0..={max})")]
    TransferCountOutOfRange { count: usize, max: usize },

    #[error("locked player '{0}' does not match any candidate")]
    UnknownLockedName(String),
}

/// Outcome of a failed optimization call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizeError {
    /// Budget, quotas, club caps, locks or the transfer delta admit no squad.
    #[error("no squad satisfies the constraints: {reason}")]
    Infeasible { reason: String },

    /// Input was rejected before the solver ran.
    #[error("malformed input: {0}")]
    MalformedInput(#[from] InputError),

    /// The solver stopped without an optimal or feasible answer (including
    /// hitting the solve-time bound).
    #[error("solver inconclusive: {0}")]
    SolverInconclusive(String),

    /// The squad admits no 11-player lineup under the formation rule.
    #[error("no starting eleven satisfies the formation rule {rule}")]
    NoValidLineup { rule: String },
}

impl OptimizeError {
    pub fn infeasible(reason: impl Into<String>) -> Self {
        OptimizeError::Infeasible {
            reason: reason.into(),
        }
    }

    /// Whether callers should surface this as "no solution found" rather than
    /// a validation error.
    pub fn is_no_solution(&self) -> bool {
        !matches!(self, OptimizeError::MalformedInput(_))
    }
}
