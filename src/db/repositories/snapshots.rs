use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::db::helpers::parse_datetime;
use crate::db::models::SnapshotRecord;
use crate::db::{hash_text, Database};
use crate::privacy::CaptureDecision;
use crate::tree::AccessibleObjectRef;

pub struct SnapshotRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SnapshotRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a snapshot unless an identical (object, hash) pair already
    /// exists. Returns whether a row was actually inserted, which is what
    /// callers use to decide whether the content genuinely changed.
    pub fn record(
        &self,
        object_id: &str,
        text_hash: &str,
        text_content: Option<&str>,
        captured_at: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO snapshots (object_id, text_hash, text_content, captured_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    object_id,
                    text_hash,
                    text_content,
                    captured_at.to_rfc3339(),
                ],
            )
            .context("failed to insert snapshot")?;
        Ok(changed > 0)
    }

    pub fn for_object(&self, object_id: &str) -> Result<Vec<SnapshotRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, object_id, text_hash, text_content, captured_at
             FROM snapshots
             WHERE object_id = ?1
             ORDER BY id ASC",
        )?;

        let mut rows = stmt.query(params![object_id])?;
        let mut snapshots = Vec::new();
        while let Some(row) = rows.next()? {
            snapshots.push(SnapshotRecord {
                id: row.get(0)?,
                object_id: row.get(1)?,
                text_hash: row.get(2)?,
                text_content: row.get(3)?,
                captured_at: parse_datetime(&row.get::<_, String>(4)?, "captured_at")?,
            });
        }
        Ok(snapshots)
    }
}

impl Database {
    /// Record the current text of an object, deduplicated by content hash.
    /// Empty text hashes to the fixed empty-string digest and is still
    /// recorded, so "became empty" transitions are visible. Under
    /// `MetadataOnly` the body column stays NULL.
    pub async fn record_snapshot(
        &self,
        object: &AccessibleObjectRef,
        text: &str,
        decision: CaptureDecision,
        captured_at: DateTime<Utc>,
    ) -> Result<bool> {
        let object_id = object.object_id();
        let text_hash = hash_text(text);
        let body = match decision {
            CaptureDecision::Observe => Some(text.to_string()),
            _ => None,
        };
        self.execute(move |conn| {
            SnapshotRepository::new(conn).record(&object_id, &text_hash, body.as_deref(), captured_at)
        })
        .await
    }

    pub async fn snapshots_for_object(&self, object_id: &str) -> Result<Vec<SnapshotRecord>> {
        let object_id = object_id.to_string();
        self.execute(move |conn| SnapshotRepository::new(conn).for_object(&object_id))
            .await
    }
}
