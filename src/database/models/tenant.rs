use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tenant record as supplied by the system-of-record.
///
/// The manager never persists these; the embedding application resolves
/// API keys to tenants and hands the result over. Secrets stay with the
/// caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub connection_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Tenant {
    pub fn new(id: impl Into<String>, connection_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            connection_url: connection_url.into(),
            created_at: None,
        }
    }
}
