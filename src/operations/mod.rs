//! Business operations
//!
//! The four domain operations of the lending desk, each a bounded unit of
//! work against one endpoint.
//!
//! # Principles
//!
//! 1. An operation never opens, commits or rolls back a transaction
//! 2. Mutual exclusion comes from row locks, not in-process locks
//! 3. A mutation and its replication event share one transaction
//! 4. Rejections are results; only storage failures are errors

mod library;
mod outcome;

pub use library::{
    availability, loan, renew, return_book, LOAN_PERIOD_DAYS, RENEWAL_EXTENSION_DAYS,
};
pub use outcome::{Outcome, Rejection};

use crate::store::{Session, StorageResult};

/// A business operation not yet bound to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Loan {
        code: String,
        site: String,
        user_id: i32,
    },
    Return {
        code: String,
        site: String,
    },
    Renewal {
        code: String,
        site: String,
    },
    Availability {
        code: String,
    },
}

impl Operation {
    /// Whether the operation changes data (and therefore replicates).
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Operation::Availability { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Loan { .. } => "loan",
            Operation::Return { .. } => "return",
            Operation::Renewal { .. } => "renewal",
            Operation::Availability { .. } => "availability",
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Operation::Loan { code, .. }
            | Operation::Return { code, .. }
            | Operation::Renewal { code, .. }
            | Operation::Availability { code } => code,
        }
    }

    /// Run against `session`, queueing for `record_to` when it is set.
    pub async fn apply(
        &self,
        session: &mut dyn Session,
        record_to: Option<&str>,
    ) -> StorageResult<Outcome> {
        match self {
            Operation::Loan {
                code,
                site,
                user_id,
            } => loan(session, code, site, *user_id, record_to).await,
            Operation::Return { code, site } => return_book(session, code, site, record_to).await,
            Operation::Renewal { code, site } => renew(session, code, site, record_to).await,
            Operation::Availability { code } => availability(session, code).await,
        }
    }
}
