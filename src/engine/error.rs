use ulid::Ulid;

use crate::model::{format_hhmm, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The slot overlaps something that already holds the time.
    /// `staff_id` is the member checked (`None` for roster-less vendors or "any").
    Conflict {
        staff_id: Option<Ulid>,
        span: Span,
        holder: Option<Ulid>,
    },
    /// The lock ran out before it was confirmed.
    Expired(Ulid),
    /// Schedule data could not be loaded (unknown vendor, staff or service).
    Resolution(String),
    /// Malformed input; never reaches the reservation store.
    Validation(String),
    /// The store could not be reached.
    Transport(String),
    /// A store call did not complete in time.
    Timeout(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

/// What the caller should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Availability could not be determined; offer an explicit retry.
    Retry,
    /// The chosen slot is gone; discard it, re-fetch, and let the user choose again.
    Reselect,
    /// The input must be corrected before the step can advance.
    FixInput,
}

impl EngineError {
    pub fn recovery(&self) -> Recovery {
        match self {
            EngineError::Conflict { .. } | EngineError::Expired(_) => Recovery::Reselect,
            EngineError::Validation(_) | EngineError::LimitExceeded(_) => Recovery::FixInput,
            EngineError::NotFound(_)
            | EngineError::AlreadyExists(_)
            | EngineError::Resolution(_)
            | EngineError::Transport(_)
            | EngineError::Timeout(_)
            | EngineError::WalError(_) => Recovery::Retry,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict { staff_id, span, holder } => {
                write!(
                    f,
                    "slot {}-{} is no longer available",
                    format_hhmm(span.start),
                    format_hhmm(span.end)
                )?;
                if let Some(staff) = staff_id {
                    write!(f, " for staff {staff}")?;
                }
                if let Some(holder) = holder {
                    write!(f, " (held by {holder})")?;
                }
                Ok(())
            }
            EngineError::Expired(id) => write!(f, "lock expired: {id}"),
            EngineError::Resolution(msg) => write!(f, "could not load schedule data: {msg}"),
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::Transport(msg) => write!(f, "store unreachable: {msg}"),
            EngineError::Timeout(op) => write!(f, "{op} timed out"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
