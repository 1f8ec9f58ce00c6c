//! Wires the pipeline together and owns its lifecycle:
//! `Starting -> WaitingForBus -> Running -> ShuttingDown -> Stopped`, with
//! any failure surfacing as a typed [`CaptureError`] carrying its exit
//! code.

use log::{debug, error, info, warn};
use tokio::time::{interval, MissedTickBehavior};

use crate::capture::subscriber::subscribe;
use crate::capture::walker::{walk, WalkStats};
use crate::config::RunConfig;
use crate::db::Database;
use crate::error::CaptureError;
use crate::tree::atspi::AtspiTree;

/// How many times a lost bus connection is re-established before the run
/// escalates to fatal.
const BUS_RETRY_BUDGET: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Starting,
    WaitingForBus,
    Running,
    ShuttingDown,
    Stopped,
}

fn transition(from: RunState, to: RunState) -> RunState {
    info!("state: {from:?} -> {to:?}");
    to
}

/// Run the capture pipeline to completion: open the store, wait for the
/// bus, perform the initial walk, subscribe to live events, and rescan
/// periodically until a stop signal or an unrecoverable failure.
pub async fn run(config: RunConfig) -> Result<(), CaptureError> {
    let mut state = RunState::Starting;
    info!("state: {state:?}");

    config
        .validate()
        .map_err(CaptureError::InvalidConfig)?;

    let db = Database::new(config.db_path.clone()).map_err(|source| CaptureError::StoreInit {
        path: config.db_path.clone(),
        source,
    })?;

    state = transition(state, RunState::WaitingForBus);
    let mut tree = match AtspiTree::connect(config.bus_timeout).await {
        Ok(tree) => tree,
        Err(err) => {
            db.close();
            return Err(err);
        }
    };

    state = transition(state, RunState::Running);

    if config.once {
        let result = walk(&tree, &config, &db).await;
        db.close();
        let stats = result?;
        log_stats("single scan", &stats);
        info!("state: {:?} -> {:?}", RunState::Running, RunState::Stopped);
        return Ok(());
    }

    match walk(&tree, &config, &db).await {
        Ok(stats) => log_stats("initial scan", &stats),
        Err(err) => warn!("initial scan failed, retrying on next rescan: {err}"),
    }

    let mut subscription = match subscribe(&tree, &config, &db).await {
        Ok(subscription) => subscription,
        Err(err) => {
            db.close();
            return Err(CaptureError::Unexpected(err));
        }
    };
    let mut disconnect = subscription.disconnect_signal();
    let mut retries_left = BUS_RETRY_BUDGET;

    let mut ticker = interval(config.scan_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately; the initial
    // walk already ran.
    ticker.tick().await;

    let outcome = loop {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("stop signal received");
                break Ok(());
            }
            _ = ticker.tick() => {
                // A walk in progress always completes; cancellation is only
                // observed here, between walks.
                match walk(&tree, &config, &db).await {
                    Ok(stats) => debug!(
                        "rescan: visited {} nodes, {} new snapshots, {} events, {} skipped",
                        stats.nodes_visited,
                        stats.snapshots_inserted,
                        stats.events_recorded,
                        stats.nodes_skipped
                    ),
                    Err(err) => warn!("rescan failed: {err}"),
                }
            }
            changed = disconnect.changed() => {
                let lost = changed.is_err() || *disconnect.borrow();
                if !lost {
                    continue;
                }
                warn!("bus connection lost; attempting to resubscribe");
                subscription.shutdown().await;

                let mut reattached = false;
                while retries_left > 0 && !reattached {
                    retries_left -= 1;
                    match AtspiTree::connect(config.bus_timeout).await {
                        Ok(new_tree) => {
                            tree = new_tree;
                            match subscribe(&tree, &config, &db).await {
                                Ok(new_subscription) => {
                                    subscription = new_subscription;
                                    disconnect = subscription.disconnect_signal();
                                    reattached = true;
                                    info!("resubscribed ({retries_left} retries left)");
                                }
                                Err(err) => {
                                    warn!("resubscription failed: {err:#}");
                                }
                            }
                        }
                        Err(err) => {
                            warn!("bus reconnect failed: {err}");
                        }
                    }
                }

                if !reattached {
                    error!("resubscribe budget exhausted");
                    break Err(CaptureError::BusDisconnected);
                }
            }
        }
    };

    state = transition(state, RunState::ShuttingDown);
    subscription.shutdown().await;
    db.close();
    transition(state, RunState::Stopped);

    outcome
}

fn log_stats(label: &str, stats: &WalkStats) {
    info!(
        "{label}: visited {} nodes, {} new snapshots, {} events, {} skipped",
        stats.nodes_visited, stats.snapshots_inserted, stats.events_recorded, stats.nodes_skipped
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
