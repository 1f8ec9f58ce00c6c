//! Live change subscription, expressed as a message-passing boundary: a
//! listener task normalizes bus notifications onto a bounded queue, and a
//! consumer task drains the queue into the store. Transport delivery is
//! never blocked on datastore latency; when the consumer falls behind,
//! messages are dropped with a counted warning and the next periodic
//! rescan recovers anything missed.
//!
//! No ordering is guaranteed between a walker-discovered snapshot and a
//! near-simultaneous live event for the same object; both are idempotent
//! against the store's dedup rule, so the worst case is a duplicate event
//! row.

use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use atspi::events::object::{ChildrenChangedEvent, ObjectEvents, StateChangedEvent, TextChangedEvent};
use atspi::{AccessibilityConnection, Event, State};
use chrono::Utc;
use futures::StreamExt;
use log::{debug, error, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::persist_change;
use crate::config::RunConfig;
use crate::db::Database;
use crate::privacy;
use crate::tree::atspi::{AtspiNode, AtspiTree};
use crate::tree::{AccessibleObjectRef, ChangeMessage, EventKind, TreeNode};

const QUEUE_CAPACITY: usize = 256;

/// Handle to a live subscription. Dropping it without calling
/// [`SubscriptionHandle::shutdown`] leaves the tasks to be torn down with
/// the runtime; shutdown is idempotent and safe before any event arrived.
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    listener: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<()>>,
    disconnected: watch::Receiver<bool>,
    connection: Arc<AccessibilityConnection>,
}

impl SubscriptionHandle {
    /// Receiver that flips to `true` if the bus connection is lost.
    pub fn disconnect_signal(&self) -> watch::Receiver<bool> {
        self.disconnected.clone()
    }

    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.listener.take() {
            if let Err(err) = handle.await {
                error!("listener task failed to join: {err}");
            }
        }
        if let Some(handle) = self.consumer.take() {
            if let Err(err) = handle.await {
                error!("consumer task failed to join: {err}");
            }
        }
        // Best effort; the registry may already be gone on a dead bus.
        let _ = self
            .connection
            .deregister_event::<TextChangedEvent>()
            .await;
        let _ = self
            .connection
            .deregister_event::<StateChangedEvent>()
            .await;
        let _ = self
            .connection
            .deregister_event::<ChildrenChangedEvent>()
            .await;
    }
}

/// Register for text, focus, and child-structure notifications and start
/// the listener/consumer pair. Returns immediately after registration.
pub async fn subscribe(
    tree: &AtspiTree,
    config: &RunConfig,
    db: &Database,
) -> Result<SubscriptionHandle> {
    let connection = Arc::clone(tree.connection());

    connection
        .register_event::<TextChangedEvent>()
        .await
        .context("failed to register text-changed listener")?;
    connection
        .register_event::<StateChangedEvent>()
        .await
        .context("failed to register state-changed listener")?;
    connection
        .register_event::<ChildrenChangedEvent>()
        .await
        .context("failed to register children-changed listener")?;

    let (tx, mut rx) = mpsc::channel::<ChangeMessage>(QUEUE_CAPACITY);
    let (disconnected_tx, disconnected_rx) = watch::channel(false);
    let cancel = CancellationToken::new();

    let listener = {
        let connection = Arc::clone(&connection);
        let config = config.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let stream = connection.event_stream();
            tokio::pin!(stream);
            let mut dropped: u64 = 0;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = stream.next() => match next {
                        Some(Ok(event)) => {
                            let Some(message) = normalize_event(&connection, &config, event).await else {
                                continue;
                            };
                            match tx.try_send(message) {
                                Ok(()) => {}
                                Err(TrySendError::Full(_)) => {
                                    dropped += 1;
                                    if dropped == 1 || dropped % 100 == 0 {
                                        warn!("change queue full; {dropped} messages dropped so far");
                                    }
                                }
                                Err(TrySendError::Closed(_)) => break,
                            }
                        }
                        Some(Err(err)) => {
                            debug!("undecodable bus event: {err}");
                        }
                        None => {
                            warn!("accessibility event stream ended");
                            let _ = disconnected_tx.send(true);
                            break;
                        }
                    }
                }
            }
        })
    };

    let consumer = {
        let db = db.clone();
        let config = config.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = rx.recv() => match message {
                        Some(message) => {
                            if let Err(err) = persist_change(&db, &config, message).await {
                                warn!("failed to persist live change: {err:#}");
                            }
                        }
                        None => break,
                    }
                }
            }
        })
    };

    Ok(SubscriptionHandle {
        cancel,
        listener: Some(listener),
        consumer: Some(consumer),
        disconnected: disconnected_rx,
        connection,
    })
}

/// Convert one bus event into the normalized message shape, resolving the
/// source object's application, role, and (for text changes) current text.
/// Events from filtered applications or unresolvable sources are dropped
/// here, before they reach the queue.
async fn normalize_event(
    connection: &AccessibilityConnection,
    config: &RunConfig,
    event: Event,
) -> Option<ChangeMessage> {
    let (kind, item, detail, read_text) = match event {
        Event::Object(ObjectEvents::TextChanged(ev)) => {
            let detail = serde_json::json!({
                "operation": operation_label(&ev.operation),
                "start": ev.start_pos,
                "length": ev.length,
            })
            .to_string();
            (EventKind::TextChanged, ev.item, Some(detail), true)
        }
        Event::Object(ObjectEvents::StateChanged(ev)) if ev.state == State::Focused => {
            let detail = if ev.enabled { "gained" } else { "lost" };
            (
                EventKind::FocusChanged,
                ev.item,
                Some(detail.to_string()),
                false,
            )
        }
        Event::Object(ObjectEvents::ChildrenChanged(ev)) => {
            let detail = serde_json::json!({
                "operation": operation_label(&ev.operation),
                "index": ev.index_in_parent,
            })
            .to_string();
            (EventKind::ChildrenChanged, ev.item, Some(detail), false)
        }
        _ => return None,
    };

    let node = AtspiNode::from_parts(
        connection.connection(),
        item.name.to_string(),
        item.path.to_string(),
    );

    let application = match node.application_name().await {
        Ok(name) => name,
        Err(err) => {
            debug!("event source application unresolvable: {err:#}");
            return None;
        }
    };
    if !config.application_allowed(&application) {
        return None;
    }

    let descriptor = match node.descriptor().await {
        Ok(descriptor) => descriptor,
        Err(err) => {
            debug!("event source vanished before resolution: {err:#}");
            return None;
        }
    };

    let object = AccessibleObjectRef::new(application, descriptor.role, descriptor.node_path);
    let text = if read_text && descriptor.text_capable && !privacy::is_sensitive_role(&object.role)
    {
        node.read_text().await.ok()
    } else {
        None
    };

    Some(ChangeMessage {
        kind,
        object,
        text_capable: descriptor.text_capable,
        text,
        detail,
        observed_at: Utc::now(),
    })
}

fn operation_label(operation: &impl Debug) -> String {
    format!("{operation:?}")
        .to_lowercase()
        .trim_matches('"')
        .to_string()
}
