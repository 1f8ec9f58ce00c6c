//! The capture pipeline: the tree walker, the live-event subscriber, and
//! the filter-then-persist sequence they share. Both paths funnel every
//! observation through [`record_change`], so the privacy gate, the
//! redaction stage, and the transactional store write behave identically
//! whether a change was discovered by walking or delivered by the bus.

pub mod subscriber;
pub mod walker;

use anyhow::Result;

use crate::config::RunConfig;
use crate::db::{Database, Observation, ObservationOutcome};
use crate::privacy::{self, CaptureDecision};
use crate::redact;
use crate::tree::{ChangeMessage, EventKind};

/// Persist one observed node or change. Returns `None` when the privacy
/// gate skipped it entirely.
///
/// `event_always` distinguishes the two callers: live bus notifications are
/// a history and always get an event row; walker-discovered observations
/// only emit a text-changed event when a genuinely new snapshot was
/// inserted.
pub async fn record_change(
    db: &Database,
    config: &RunConfig,
    message: ChangeMessage,
    event_always: bool,
) -> Result<Option<ObservationOutcome>> {
    let decision = privacy::decide(&message.object.application, &message.object.role, config);
    if decision == CaptureDecision::Skip {
        return Ok(None);
    }

    // Sensitive widgets get registry bookkeeping only: no snapshot and no
    // text-changed event, under any configuration.
    let sensitive = privacy::is_sensitive_role(&message.object.role);
    let text = if sensitive { None } else { message.text };
    let event_always = if sensitive && message.kind == EventKind::TextChanged {
        false
    } else {
        event_always
    };

    let text = text.map(|body| redact::apply(&body));

    let outcome = db
        .record_observation(Observation {
            object: message.object,
            text_capable: message.text_capable,
            text,
            store_content: decision == CaptureDecision::Observe,
            kind: message.kind,
            detail: message.detail,
            event_always,
            observed_at: message.observed_at,
        })
        .await?;
    Ok(Some(outcome))
}

/// The subscriber's consumer-side entry point: same sequence as the
/// walker's per-node logic, scoped to a single changed object.
pub async fn persist_change(
    db: &Database,
    config: &RunConfig,
    message: ChangeMessage,
) -> Result<Option<ObservationOutcome>> {
    record_change(db, config, message, true).await
}
