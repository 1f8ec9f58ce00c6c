use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded change notification. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Option<i64>,
    pub kind: String,
    pub object_id: String,
    pub application: String,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}
