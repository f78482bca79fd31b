//! Loan, return, renewal and availability
//!
//! Each function runs inside a transaction the caller opened on one
//! endpoint and does not commit. `record_to` names the endpoint a
//! replication event is queued for; `None` is used when replaying an event,
//! so replays never re-enqueue.

use chrono::{Duration, Local, NaiveDate};

use super::outcome::{Outcome, Rejection};
use crate::replication::{queue, LoanPayload, RenewalPayload, ReplicationPayload, ReturnPayload};
use crate::store::{NewLoan, Session, StorageResult};

pub const LOAN_PERIOD_DAYS: i64 = 14;
pub const RENEWAL_EXTENSION_DAYS: i32 = 7;

fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub async fn loan(
    session: &mut dyn Session,
    code: &str,
    site: &str,
    user_id: i32,
    record_to: Option<&str>,
) -> StorageResult<Outcome> {
    let Some(book) = session.lock_book(code).await? else {
        return Ok(Rejection::BookNotFound(code.to_string()).into());
    };
    if book.copies_available <= 0 {
        return Ok(Rejection::NoCopiesAvailable.into());
    }

    session.adjust_copies(book.id, -1, site).await?;

    let start_date = today();
    let due_date = start_date + Duration::days(LOAN_PERIOD_DAYS);
    let loan_id = session
        .insert_loan(&NewLoan {
            book_id: book.id,
            user_id,
            site: site.to_string(),
            start_date,
            due_date,
        })
        .await?;

    if let Some(target_db) = record_to {
        let payload = ReplicationPayload::Loan(LoanPayload {
            book_code: code.to_string(),
            site: site.to_string(),
            user_id,
            loan_id,
            due_date,
        });
        queue::enqueue(session, target_db, code, &payload).await?;
    }

    Ok(Outcome::Completed(format!("loan confirmed, due date: {}", due_date)))
}

/// Close the oldest open loan of the book.
pub async fn return_book(
    session: &mut dyn Session,
    code: &str,
    site: &str,
    record_to: Option<&str>,
) -> StorageResult<Outcome> {
    let Some(open) = session.lock_open_loan(code).await? else {
        return missing_loan(session, code, Rejection::NoOpenLoan(code.to_string())).await;
    };

    session.close_loan(open.id, today()).await?;
    session.adjust_copies(open.book_id, 1, site).await?;

    if let Some(target_db) = record_to {
        let payload = ReplicationPayload::Return(ReturnPayload {
            book_code: code.to_string(),
            site: site.to_string(),
            loan_id: open.id,
        });
        queue::enqueue(session, target_db, code, &payload).await?;
    }

    Ok(Outcome::Completed("return registered".to_string()))
}

/// Extend the oldest open loan of the book by one renewal period.
pub async fn renew(
    session: &mut dyn Session,
    code: &str,
    site: &str,
    record_to: Option<&str>,
) -> StorageResult<Outcome> {
    let Some(open) = session.lock_open_loan(code).await? else {
        return missing_loan(session, code, Rejection::NoActiveLoan(code.to_string())).await;
    };
    if open.renewals_used >= open.renewals_allowed {
        return Ok(Rejection::MaxRenewalsReached.into());
    }

    session.extend_loan(open.id, RENEWAL_EXTENSION_DAYS).await?;
    session.touch_book(open.book_id, site).await?;

    if let Some(target_db) = record_to {
        let payload = ReplicationPayload::Renewal(RenewalPayload {
            book_code: code.to_string(),
            site: site.to_string(),
            loan_id: open.id,
        });
        queue::enqueue(session, target_db, code, &payload).await?;
    }

    Ok(Outcome::Completed(format!(
        "renewal accepted, due date extended by {} days",
        RENEWAL_EXTENSION_DAYS
    )))
}

/// Read-only: `SI` when at least one copy is on the shelf.
pub async fn availability(session: &mut dyn Session, code: &str) -> StorageResult<Outcome> {
    let Some(book) = session.find_book(code).await? else {
        return Ok(Rejection::BookNotFound(code.to_string()).into());
    };
    if book.copies_available > 0 {
        Ok(Outcome::Completed("SI".to_string()))
    } else {
        Ok(Rejection::NotAvailable.into())
    }
}

/// Distinguish an unknown book from a book without an open loan.
async fn missing_loan(
    session: &mut dyn Session,
    code: &str,
    rejection: Rejection,
) -> StorageResult<Outcome> {
    match session.find_book(code).await? {
        Some(_) => Ok(rejection.into()),
        None => Ok(Rejection::BookNotFound(code.to_string()).into()),
    }
}
