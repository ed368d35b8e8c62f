use thiserror::Error;

/// Coarse classification of a rejected ledger operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    Validation,
    StateConflict,
    NotFound,
}

/// Every way a ledger operation can be refused. All of them are raised before
/// the first write, so a rejected call leaves the ledger untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("not authorized")]
    NotAuthorized,
    #[error("invalid bet limits")]
    InvalidBetLimits,
    #[error("no outcomes provided")]
    NoOutcomesProvided,
    #[error("pool closes in the past")]
    ClosesInPast,
    #[error("invalid pool id")]
    InvalidPoolId,
    #[error("pool does not exist")]
    PoolDoesNotExist,
    #[error("pool not open")]
    PoolNotOpen,
    #[error("pool closed")]
    PoolClosed,
    #[error("bet too low")]
    BetTooLow,
    #[error("bet too high")]
    BetTooHigh,
    #[error("invalid bet amount")]
    InvalidBetAmount,
    #[error("already placed bet")]
    AlreadyPlacedBet,
    #[error("invalid outcome")]
    InvalidOutcome,
    #[error("pool total would overflow")]
    AmountOverflow,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::NotAuthorized => ErrorKind::Authorization,
            LedgerError::InvalidBetLimits
            | LedgerError::NoOutcomesProvided
            | LedgerError::ClosesInPast
            | LedgerError::InvalidPoolId
            | LedgerError::BetTooLow
            | LedgerError::BetTooHigh
            | LedgerError::InvalidBetAmount
            | LedgerError::InvalidOutcome
            | LedgerError::AmountOverflow => ErrorKind::Validation,
            LedgerError::PoolNotOpen | LedgerError::PoolClosed | LedgerError::AlreadyPlacedBet => {
                ErrorKind::StateConflict
            }
            LedgerError::PoolDoesNotExist => ErrorKind::NotFound,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// `require!`-style guard: bail out with `err` unless `cond` holds.
macro_rules! require {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            return Err($err);
        }
    };
}

pub(crate) use require;
