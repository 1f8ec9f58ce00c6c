use chrono::Utc;
use log::{debug, warn};

use super::record_change;
use crate::config::RunConfig;
use crate::db::Database;
use crate::error::CaptureError;
use crate::privacy::{self, CaptureDecision};
use crate::tree::{AccessibleObjectRef, ChangeMessage, EventKind, TreeNode, TreeSource};

// Guards against cyclic or pathological trees; nodes past the cap count as
// skipped.
const MAX_DEPTH: usize = 25;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub nodes_visited: u64,
    pub snapshots_inserted: u64,
    pub events_recorded: u64,
    pub nodes_skipped: u64,
}

/// Depth-first pass over every application the filter admits. Stateless
/// across calls: rescans are safe and record only the delta of genuinely
/// new content, by the store's dedup rule.
///
/// A node disappearing mid-walk (its application closed concurrently) is
/// counted and skipped, never fatal; only total failure to enumerate the
/// desktop root errors out.
pub async fn walk<S: TreeSource>(
    source: &S,
    config: &RunConfig,
    db: &Database,
) -> Result<WalkStats, CaptureError> {
    let applications = source.applications().await?;
    let mut stats = WalkStats::default();

    for (application, root) in applications {
        if !config.application_allowed(&application) {
            debug!("skipping filtered application {application}");
            continue;
        }
        walk_application(&application, root, config, db, &mut stats).await;
    }

    Ok(stats)
}

async fn walk_application<N: TreeNode>(
    application: &str,
    root: N,
    config: &RunConfig,
    db: &Database,
    stats: &mut WalkStats,
) {
    let mut stack = vec![(root, 0usize)];

    while let Some((node, depth)) = stack.pop() {
        stats.nodes_visited += 1;

        let descriptor = match node.descriptor().await {
            Ok(descriptor) => descriptor,
            Err(err) => {
                stats.nodes_skipped += 1;
                debug!("node vanished during walk: {err:#}");
                continue;
            }
        };

        let object = AccessibleObjectRef::new(
            application,
            descriptor.role.clone(),
            descriptor.node_path.clone(),
        );
        let decision = privacy::decide(&object.application, &object.role, config);

        if decision != CaptureDecision::Skip {
            let text = if descriptor.text_capable && !privacy::is_sensitive_role(&object.role) {
                match node.read_text().await {
                    Ok(text) => Some(text),
                    Err(err) => {
                        stats.nodes_skipped += 1;
                        debug!("text read failed for {}: {err:#}", object.object_id());
                        None
                    }
                }
            } else {
                None
            };

            let message = ChangeMessage {
                kind: EventKind::TextChanged,
                object,
                text_capable: descriptor.text_capable,
                text,
                detail: None,
                observed_at: Utc::now(),
            };
            match record_change(db, config, message, false).await {
                Ok(Some(outcome)) => {
                    if outcome.snapshot_inserted {
                        stats.snapshots_inserted += 1;
                    }
                    if outcome.event_id.is_some() {
                        stats.events_recorded += 1;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    stats.nodes_skipped += 1;
                    warn!("failed to persist observation: {err:#}");
                }
            }
        }

        if depth >= MAX_DEPTH {
            stats.nodes_skipped += 1;
            continue;
        }
        match node.children().await {
            Ok(children) => {
                stack.extend(children.into_iter().map(|child| (child, depth + 1)));
            }
            Err(err) => {
                stats.nodes_skipped += 1;
                debug!("child enumeration failed: {err:#}");
            }
        }
    }
}
