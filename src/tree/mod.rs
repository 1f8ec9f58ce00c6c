//! Normalized view of the accessibility tree. Transport-specific node
//! shapes are converted into these fixed types at the walker/subscriber
//! boundary, so nothing downstream depends on the bus representation.

use anyhow::Result;
use chrono::{DateTime, Utc};

pub mod atspi;

use crate::error::CaptureError;

/// Stable identifier for one widget within one application's tree. A lookup
/// key, not a live handle: the widget behind it may disappear at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessibleObjectRef {
    pub application: String,
    pub role: String,
    /// Path unique within the application's tree (the accessible object
    /// path on AT-SPI).
    pub node_path: String,
}

impl AccessibleObjectRef {
    pub fn new(
        application: impl Into<String>,
        role: impl Into<String>,
        node_path: impl Into<String>,
    ) -> Self {
        Self {
            application: application.into(),
            role: role.into(),
            node_path: node_path.into(),
        }
    }

    /// The dedup and registry key.
    pub fn object_id(&self) -> String {
        format!("{}:{}:{}", self.application, self.role, self.node_path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    TextChanged,
    FocusChanged,
    ChildrenChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TextChanged => "text-changed",
            EventKind::FocusChanged => "focus-changed",
            EventKind::ChildrenChanged => "children-changed",
        }
    }
}

/// What the transport reports about a single node, already normalized.
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub role: String,
    pub node_path: String,
    pub text_capable: bool,
}

/// A live change notification, normalized by the subscriber's listener and
/// pushed onto the bounded queue for the consumer to persist.
#[derive(Debug, Clone)]
pub struct ChangeMessage {
    pub kind: EventKind,
    pub object: AccessibleObjectRef,
    pub text_capable: bool,
    /// Current text of the changed object, read at notification time. Only
    /// present for text-changed events on readable, non-sensitive widgets.
    pub text: Option<String>,
    pub detail: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Enumeration seam between the walker and the transport. The live
/// implementation is [`atspi::AtspiTree`]; tests drive the walker with an
/// in-memory tree.
#[allow(async_fn_in_trait)]
pub trait TreeSource {
    type Node: TreeNode;

    /// Top-level application nodes reachable on the desktop, paired with
    /// their application names. Total failure here means the tree is
    /// unavailable.
    async fn applications(&self) -> Result<Vec<(String, Self::Node)>, CaptureError>;
}

/// One node of the live tree. Every method may fail independently — a
/// widget can vanish between enumeration and read.
#[allow(async_fn_in_trait)]
pub trait TreeNode: Sized {
    async fn descriptor(&self) -> Result<NodeDescriptor>;

    async fn children(&self) -> Result<Vec<Self>>;

    /// Full current text of a text-capable node.
    async fn read_text(&self) -> Result<String>;
}
