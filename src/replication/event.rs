//! Replication event types
//!
//! Queue rows carry their payload as JSON. Each operation type has its own
//! payload struct; rows are decoded into [`ReplicationPayload`] before any
//! field is read, so a malformed row fails as a whole.
//!
//! JSON keys and stored labels are shared with the legacy producer:
//! `codigo`, `sede`, `usuarioId`, `prestamoId`, `fechaFin`; states
//! `PENDIENTE` / `APLICADO`.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::operations::Operation;
use crate::store::{QueuedEvent, StorageError, StorageResult};

/// Site assumed when a payload does not name one.
pub const DEFAULT_SITE: &str = "SEDE1";

fn default_site() -> String {
    DEFAULT_SITE.to_string()
}

fn default_user_id() -> i32 {
    1
}

/// Mutation kinds that are replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Loan,
    Return,
    Renewal,
}

impl OperationType {
    /// Label stored in `replication_queue.operation_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Loan => "PRESTAMO",
            OperationType::Return => "DEVOLVER",
            OperationType::Renewal => "RENOVAR",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "PRESTAMO" => Some(OperationType::Loan),
            "DEVOLVER" => Some(OperationType::Return),
            "RENOVAR" => Some(OperationType::Renewal),
            _ => None,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Queue row lifecycle: PENDING -> APPLIED, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Pending,
    Applied,
}

impl EventState {
    pub fn as_sql(&self) -> &'static str {
        match self {
            EventState::Pending => "PENDIENTE",
            EventState::Applied => "APLICADO",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanPayload {
    #[serde(rename = "codigo", default)]
    pub book_code: String,
    #[serde(rename = "sede", default = "default_site")]
    pub site: String,
    #[serde(rename = "usuarioId", default = "default_user_id")]
    pub user_id: i32,
    #[serde(rename = "prestamoId")]
    pub loan_id: i64,
    /// Due date on the producing endpoint. Informational: a replay
    /// computes its own dates.
    #[serde(rename = "fechaFin")]
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnPayload {
    #[serde(rename = "codigo", default)]
    pub book_code: String,
    #[serde(rename = "sede", default = "default_site")]
    pub site: String,
    #[serde(rename = "prestamoId")]
    pub loan_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalPayload {
    #[serde(rename = "codigo", default)]
    pub book_code: String,
    #[serde(rename = "sede", default = "default_site")]
    pub site: String,
    #[serde(rename = "prestamoId")]
    pub loan_id: i64,
}

/// Typed payload, one variant per [`OperationType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationPayload {
    Loan(LoanPayload),
    Return(ReturnPayload),
    Renewal(RenewalPayload),
}

impl ReplicationPayload {
    pub fn operation_type(&self) -> OperationType {
        match self {
            ReplicationPayload::Loan(_) => OperationType::Loan,
            ReplicationPayload::Return(_) => OperationType::Return,
            ReplicationPayload::Renewal(_) => OperationType::Renewal,
        }
    }

    pub fn site(&self) -> &str {
        match self {
            ReplicationPayload::Loan(p) => &p.site,
            ReplicationPayload::Return(p) => &p.site,
            ReplicationPayload::Renewal(p) => &p.site,
        }
    }

    pub fn encode(&self) -> StorageResult<Value> {
        let value = match self {
            ReplicationPayload::Loan(p) => serde_json::to_value(p)?,
            ReplicationPayload::Return(p) => serde_json::to_value(p)?,
            ReplicationPayload::Renewal(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    pub fn decode(operation_type: OperationType, payload: &Value) -> StorageResult<Self> {
        let decoded = match operation_type {
            OperationType::Loan => ReplicationPayload::Loan(LoanPayload::deserialize(payload)?),
            OperationType::Return => {
                ReplicationPayload::Return(ReturnPayload::deserialize(payload)?)
            }
            OperationType::Renewal => {
                ReplicationPayload::Renewal(RenewalPayload::deserialize(payload)?)
            }
        };
        Ok(decoded)
    }
}

/// A decoded PENDING queue row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationEvent {
    pub id: i64,
    pub book_code: String,
    pub target_db: String,
    pub payload: ReplicationPayload,
}

impl ReplicationEvent {
    pub fn decode(row: &QueuedEvent) -> StorageResult<Self> {
        let operation_type = OperationType::parse(&row.operation_type).ok_or_else(|| {
            StorageError::serialization(format!(
                "event {}: unsupported operation type {}",
                row.id, row.operation_type
            ))
        })?;
        let payload = ReplicationPayload::decode(operation_type, &row.payload).map_err(|e| {
            StorageError::serialization(format!("event {}: {}", row.id, e.message))
        })?;
        Ok(Self {
            id: row.id,
            book_code: row.book_code.clone(),
            target_db: row.target_db.clone(),
            payload,
        })
    }

    pub fn operation_type(&self) -> OperationType {
        self.payload.operation_type()
    }

    /// The business operation that reproduces this event on another
    /// endpoint. The row's book code is authoritative.
    pub fn replay(&self) -> Operation {
        let code = self.book_code.clone();
        let site = self.payload.site().to_string();
        match &self.payload {
            ReplicationPayload::Loan(p) => Operation::Loan {
                code,
                site,
                user_id: p.user_id,
            },
            ReplicationPayload::Return(_) => Operation::Return { code, site },
            ReplicationPayload::Renewal(_) => Operation::Renewal { code, site },
        }
    }
}
