//! The ticket record and its state machine.
//!
//! A ticket is the unit of coordination: one ticket per request for
//! exclusive access to a `(server_uuid, scope, id)` resource. Tickets are
//! serialized as JSON and stored verbatim in `waitlist-store`; this module
//! owns the encoding and the validation of creation parameters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WaitlistError;

/// Bucket name tickets are stored under.
pub const BUCKET: &str = "tickets";

/// Ticket lifecycle status.
///
/// `Expired` and `Finished` are terminal: no transition leads out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Queued,
    Active,
    Expired,
    Finished,
}

impl TicketStatus {
    /// Whether this status is terminal (`expired` or `finished`).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Expired | Self::Finished)
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// A ticket record, as persisted in `waitlist-store`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub uuid: Uuid,
    pub server_uuid: String,
    pub scope: String,
    pub id: String,
    pub status: TicketStatus,
    pub action: String,
    #[serde(default)]
    pub extra: serde_json::Value,
    #[serde(with = "rfc3339_nanos")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "rfc3339_nanos")]
    pub updated_at: DateTime<Utc>,
    #[serde(with = "rfc3339_nanos")]
    pub expires_at: DateTime<Utc>,
    pub req_id: String,
}

/// `DateTime<Utc>` serialized as RFC 3339 with a fixed nine-digit fractional
/// second, unlike chrono's default serde impl which trims trailing zero
/// digits (or omits the fraction entirely). The `(created_at, uuid)` queue
/// order is enforced via lexicographic string comparison in both
/// `MemoryBackend` and `PostgresBackend`'s `ORDER BY value->>'created_at'`,
/// which only matches chronological order if every timestamp has the same
/// width.
mod rfc3339_nanos {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

impl Ticket {
    /// Serialize to the JSON document stored by `waitlist-store`.
    ///
    /// # Errors
    ///
    /// Returns [`WaitlistError::Internal`] if serialization fails (it
    /// shouldn't — every field is a plain serde type).
    pub fn to_value(&self) -> Result<serde_json::Value, WaitlistError> {
        serde_json::to_value(self).map_err(|e| WaitlistError::Internal {
            reason: format!("ticket serialization failed: {e}"),
        })
    }

    /// Deserialize a stored JSON document back into a [`Ticket`].
    ///
    /// # Errors
    ///
    /// Returns [`WaitlistError::Internal`] if the stored document is not a
    /// well-formed ticket — this indicates store corruption or a schema
    /// change, not a caller mistake.
    pub fn from_value(value: serde_json::Value) -> Result<Self, WaitlistError> {
        serde_json::from_value(value).map_err(|e| WaitlistError::Internal {
            reason: format!("ticket deserialization failed: {e}"),
        })
    }
}

/// Inputs to [`crate::queue::QueueManager::create`].
#[derive(Debug, Clone)]
pub struct CreateParams {
    pub server_uuid: String,
    pub scope: String,
    pub id: String,
    /// Raw ISO-8601 expiry timestamp as received over the wire.
    pub expires_at: String,
    pub action: Option<String>,
    pub extra: Option<serde_json::Value>,
    pub req_id: String,
}

impl CreateParams {
    /// Validate and build a fresh [`Ticket`] with a new `uuid`, `status =
    /// queued`, and `created_at = updated_at = now`.
    ///
    /// # Errors
    ///
    /// Returns [`WaitlistError::InvalidArgument`] if `expires_at` does not
    /// parse, is not strictly in the future, or `scope`/`id` is empty.
    pub fn into_ticket(self) -> Result<Ticket, WaitlistError> {
        if self.scope.trim().is_empty() {
            return Err(WaitlistError::InvalidArgument {
                reason: "scope must not be empty".to_owned(),
            });
        }
        if self.id.trim().is_empty() {
            return Err(WaitlistError::InvalidArgument {
                reason: "id must not be empty".to_owned(),
            });
        }

        let expires_at = DateTime::parse_from_rfc3339(&self.expires_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| WaitlistError::InvalidArgument {
                reason: format!("invalid expires_at '{}': {e}", self.expires_at),
            })?;

        let now = Utc::now();
        if expires_at <= now {
            return Err(WaitlistError::InvalidArgument {
                reason: "expires_at must be strictly in the future".to_owned(),
            });
        }

        Ok(Ticket {
            uuid: Uuid::new_v4(),
            server_uuid: self.server_uuid,
            scope: self.scope,
            id: self.id,
            status: TicketStatus::Queued,
            action: self.action.unwrap_or_default(),
            extra: self.extra.unwrap_or(serde_json::Value::Null),
            created_at: now,
            updated_at: now,
            expires_at,
            req_id: self.req_id,
        })
    }
}
