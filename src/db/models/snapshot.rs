use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One deduplicated text state of an object. `text_content` is NULL when
/// the capture decision withheld the body; the hash is always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: Option<i64>,
    pub object_id: String,
    pub text_hash: String,
    pub text_content: Option<String>,
    pub captured_at: DateTime<Utc>,
}
