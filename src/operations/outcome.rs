//! Operation results
//!
//! A rejected operation is a normal result, not an error: it never
//! triggers failover and its transaction still commits (nothing changed).

use thiserror::Error;

/// Expected, domain-level refusal of a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("book {0} does not exist")]
    BookNotFound(String),

    #[error("loan rejected: no copies available")]
    NoCopiesAvailable,

    #[error("no open loan for book {0}")]
    NoOpenLoan(String),

    #[error("no active loan for book {0}")]
    NoActiveLoan(String),

    #[error("renewal rejected: max renewals reached")]
    MaxRenewalsReached,

    /// Availability check answered negatively.
    #[error("NO")]
    NotAvailable,
}

/// Result of one business operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(String),
    Rejected(Rejection),
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    /// Reply text for the caller.
    pub fn message(&self) -> String {
        match self {
            Outcome::Completed(message) => message.clone(),
            Outcome::Rejected(rejection) => rejection.to_string(),
        }
    }
}

impl From<Rejection> for Outcome {
    fn from(rejection: Rejection) -> Self {
        Outcome::Rejected(rejection)
    }
}
