use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current-state row for one observed object. `first_seen` never changes
/// after insert; `last_seen` only advances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub object_id: String,
    pub role: String,
    pub application: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub text_capable: bool,
}
