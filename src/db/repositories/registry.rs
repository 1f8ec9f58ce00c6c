use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::helpers::parse_datetime;
use crate::db::models::RegistryRecord;
use crate::db::Database;
use crate::tree::AccessibleObjectRef;

pub struct RegistryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> RegistryRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert on first sight; afterwards only `last_seen` and `text_capable`
    /// move. `last_seen` is clamped with MAX so it never goes backwards even
    /// if a caller's clock does.
    pub fn upsert(
        &self,
        object: &AccessibleObjectRef,
        text_capable: bool,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO object_registry
                 (object_id, role, application, first_seen, last_seen, text_capable)
                 VALUES (?1, ?2, ?3, ?4, ?4, ?5)
                 ON CONFLICT(object_id) DO UPDATE SET
                     last_seen = MAX(object_registry.last_seen, excluded.last_seen),
                     text_capable = excluded.text_capable",
                params![
                    object.object_id(),
                    object.role,
                    object.application,
                    seen_at.to_rfc3339(),
                    text_capable,
                ],
            )
            .context("failed to upsert registry entry")?;
        Ok(())
    }

    pub fn get(&self, object_id: &str) -> Result<Option<RegistryRecord>> {
        self.conn
            .query_row(
                "SELECT object_id, role, application, first_seen, last_seen, text_capable
                 FROM object_registry WHERE object_id = ?1",
                params![object_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, bool>(5)?,
                    ))
                },
            )
            .optional()
            .context("failed to query registry entry")?
            .map(|(object_id, role, application, first_seen, last_seen, text_capable)| {
                Ok(RegistryRecord {
                    object_id,
                    role,
                    application,
                    first_seen: parse_datetime(&first_seen, "first_seen")?,
                    last_seen: parse_datetime(&last_seen, "last_seen")?,
                    text_capable,
                })
            })
            .transpose()
    }
}

impl Database {
    pub async fn upsert_registry(
        &self,
        object: &AccessibleObjectRef,
        text_capable: bool,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        let object = object.clone();
        self.execute(move |conn| RegistryRepository::new(conn).upsert(&object, text_capable, seen_at))
            .await
    }

    pub async fn registry_entry(&self, object_id: &str) -> Result<Option<RegistryRecord>> {
        let object_id = object_id.to_string();
        self.execute(move |conn| RegistryRepository::new(conn).get(&object_id))
            .await
    }
}
