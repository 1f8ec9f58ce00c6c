use std::path::PathBuf;
use std::time::Duration;

/// Failure classes that terminate a run, each with a stable exit code so
/// operators can tell "no accessibility service" apart from "cannot store
/// results".
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The datastore could not be opened or migrated. Fatal: nothing can be
    /// recorded without it.
    #[error("cannot initialize datastore at {path}: {source}")]
    StoreInit {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The accessibility bus never became reachable within the wait budget.
    #[error("accessibility bus unavailable after {waited:?}: {reason}")]
    BusUnavailable { waited: Duration, reason: String },

    /// The bus connection dropped after a successful subscription and the
    /// resubscribe budget is exhausted.
    #[error("accessibility bus connection lost")]
    BusDisconnected,

    /// A walk could not enumerate the desktop root at all. Recoverable on
    /// the next rescan; fatal only in single-scan mode.
    #[error("accessibility tree unavailable: {reason}")]
    TreeUnavailable { reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl CaptureError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CaptureError::StoreInit { .. } => 3,
            CaptureError::BusUnavailable { .. } | CaptureError::BusDisconnected => 2,
            CaptureError::TreeUnavailable { .. } => 4,
            CaptureError::InvalidConfig(_) | CaptureError::Unexpected(_) => 1,
        }
    }
}
