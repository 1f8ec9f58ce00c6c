use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::db::helpers::parse_datetime;
use crate::db::models::EventRecord;
use crate::db::Database;
use crate::tree::{AccessibleObjectRef, EventKind};

pub struct EventRepository<'a> {
    conn: &'a Connection,
}

impl<'a> EventRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Events are a full history: every call inserts. Returns the generated
    /// row id.
    pub fn record(
        &self,
        kind: &str,
        object_id: &str,
        application: &str,
        detail: Option<&str>,
        occurred_at: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO events (kind, object_id, application, detail, occurred_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    kind,
                    object_id,
                    application,
                    detail,
                    occurred_at.to_rfc3339(),
                ],
            )
            .context("failed to insert event")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn for_object(&self, object_id: &str) -> Result<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, object_id, application, detail, occurred_at
             FROM events
             WHERE object_id = ?1
             ORDER BY id ASC",
        )?;

        let mut rows = stmt.query(params![object_id])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(EventRecord {
                id: row.get(0)?,
                kind: row.get(1)?,
                object_id: row.get(2)?,
                application: row.get(3)?,
                detail: row.get(4)?,
                occurred_at: parse_datetime(&row.get::<_, String>(5)?, "occurred_at")?,
            });
        }
        Ok(events)
    }
}

impl Database {
    pub async fn record_event(
        &self,
        kind: EventKind,
        object: &AccessibleObjectRef,
        detail: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<i64> {
        let object_id = object.object_id();
        let application = object.application.clone();
        self.execute(move |conn| {
            EventRepository::new(conn).record(
                kind.as_str(),
                &object_id,
                &application,
                detail.as_deref(),
                occurred_at,
            )
        })
        .await
    }

    pub async fn events_for_object(&self, object_id: &str) -> Result<Vec<EventRecord>> {
        let object_id = object_id.to_string();
        self.execute(move |conn| EventRepository::new(conn).for_object(&object_id))
            .await
    }
}
