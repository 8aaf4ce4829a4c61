use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Backend-assigned identifier of a message request.
///
/// The backend may emit ids as JSON integers or strings; both deserialize
/// into the same opaque string so `42` and `"42"` name the same request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        RequestId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId(s)
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId(n.to_string())
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Int(i64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Int(n) => RequestId(n.to_string()),
            RawId::Text(s) => RequestId(s),
        })
    }
}

/// Status of a request as the backend reports it at fetch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Sent,
    Failed,
    /// Any status string this client does not know. Never dispatched.
    #[serde(other)]
    Other,
}

/// A unit of work enqueued by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRequest {
    pub id: RequestId,
    pub phone_number: String,
    pub body: String,
    pub status: RequestStatus,
}

impl MessageRequest {
    pub fn pending(id: impl Into<RequestId>, phone_number: &str, body: &str) -> Self {
        MessageRequest {
            id: id.into(),
            phone_number: phone_number.to_string(),
            body: body.to_string(),
            status: RequestStatus::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

/// Terminal outcome of a dispatch, as recorded locally and pushed upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Sent,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Sent => "sent",
            Outcome::Failed => "failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the delivery ledger. Keyed by the originating request id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: RequestId,
    pub phone_number: String,
    pub body: String,
    pub outcome: Outcome,
    pub sent_at: DateTime<Utc>,
    /// Native send invocations it took to reach `outcome`.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
}

fn default_attempts() -> u32 {
    1
}

impl LedgerEntry {
    pub fn from_request(request: &MessageRequest, outcome: Outcome, attempts: u32) -> Self {
        LedgerEntry {
            id: request.id.clone(),
            phone_number: request.phone_number.clone(),
            body: request.body.clone(),
            outcome,
            sent_at: Utc::now(),
            attempts,
        }
    }
}

/// How a dispatch cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    FetchFailed,
    Unreachable,
    AlreadyRunning,
}

/// Counters produced by one dispatch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub status: CycleStatus,
    pub sent: usize,
    pub failed: usize,
    /// Pending requests not dispatched because the ledger already had them
    /// or they appeared twice in the same fetch.
    pub skipped: usize,
    /// Status pushes re-issued for requests the ledger already settled.
    pub reconciled: usize,
    /// Requests left for a later cycle after connectivity dropped.
    pub deferred: usize,
}

impl CycleReport {
    pub fn empty(status: CycleStatus) -> Self {
        CycleReport {
            status,
            sent: 0,
            failed: 0,
            skipped: 0,
            reconciled: 0,
            deferred: 0,
        }
    }

    pub fn dispatched(&self) -> usize {
        self.sent + self.failed
    }
}
