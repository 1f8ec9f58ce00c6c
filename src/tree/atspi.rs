//! Live AT-SPI transport. The accessibility connection is owned here and
//! passed down explicitly; nothing in the crate reaches for a process-wide
//! bus handle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use atspi::{
    connection::set_session_accessibility,
    proxy::accessible::AccessibleProxy,
    proxy::text::TextProxy,
    zbus::{proxy::CacheProperties, Connection},
    AccessibilityConnection, Interface,
};
use log::{debug, warn};
use tokio::time::Instant;

use super::{NodeDescriptor, TreeNode, TreeSource};
use crate::error::CaptureError;

const REGISTRY_DEST: &str = "org.a11y.atspi.Registry";
const REGISTRY_PATH: &str = "/org/a11y/atspi/accessible/root";
const ACCESSIBLE_INTERFACE: &str = "org.a11y.atspi.Accessible";
const TEXT_INTERFACE: &str = "org.a11y.atspi.Text";

const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Owned handle to the session accessibility bus.
pub struct AtspiTree {
    connection: Arc<AccessibilityConnection>,
}

impl AtspiTree {
    /// Connect to the accessibility bus, polling until `timeout` elapses.
    /// A bus that never appears is reported as [`CaptureError::BusUnavailable`],
    /// distinct from datastore failures.
    pub async fn connect(timeout: Duration) -> Result<Self, CaptureError> {
        if let Err(err) = set_session_accessibility(true).await {
            warn!("could not flag session accessibility: {err}");
        }

        let deadline = Instant::now() + timeout;
        loop {
            match AccessibilityConnection::new().await {
                Ok(connection) => {
                    debug!("accessibility bus connected");
                    return Ok(Self {
                        connection: Arc::new(connection),
                    });
                }
                Err(err) => {
                    if Instant::now() >= deadline {
                        return Err(CaptureError::BusUnavailable {
                            waited: timeout,
                            reason: err.to_string(),
                        });
                    }
                    tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
                }
            }
        }
    }

    pub fn connection(&self) -> &Arc<AccessibilityConnection> {
        &self.connection
    }

    fn bus(&self) -> &Connection {
        self.connection.connection()
    }

    /// Node handle for an arbitrary (destination, path) pair, e.g. the
    /// source of a live event.
    pub fn node_from_parts(&self, dest: impl Into<String>, path: impl Into<String>) -> AtspiNode {
        AtspiNode::from_parts(self.bus(), dest, path)
    }

    async fn registry_root(&self) -> Result<AccessibleProxy<'static>> {
        accessible_proxy(self.bus(), REGISTRY_DEST, REGISTRY_PATH).await
    }
}

impl TreeSource for AtspiTree {
    type Node = AtspiNode;

    async fn applications(&self) -> Result<Vec<(String, AtspiNode)>, CaptureError> {
        let root = self
            .registry_root()
            .await
            .map_err(|err| CaptureError::TreeUnavailable {
                reason: err.to_string(),
            })?;
        let children = root
            .get_children()
            .await
            .map_err(|err| CaptureError::TreeUnavailable {
                reason: err.to_string(),
            })?;

        let mut applications = Vec::with_capacity(children.len());
        for child in children {
            let node = self.node_from_parts(child.name.to_string(), child.path.to_string());
            let name = match node.accessible().await {
                Ok(proxy) => proxy.name().await.unwrap_or_default(),
                Err(_) => String::new(),
            };
            let name = if name.is_empty() {
                "unknown".to_string()
            } else {
                name
            };
            applications.push((name, node));
        }
        Ok(applications)
    }
}

/// One accessible object, addressed by bus destination and object path.
/// Proxies are built on demand; the widget may be gone by the time a method
/// runs, in which case the call fails and the caller skips the node.
#[derive(Clone)]
pub struct AtspiNode {
    conn: Connection,
    dest: String,
    path: String,
}

impl AtspiNode {
    pub fn from_parts(conn: &Connection, dest: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            conn: conn.clone(),
            dest: dest.into(),
            path: path.into(),
        }
    }

    async fn accessible(&self) -> Result<AccessibleProxy<'static>> {
        accessible_proxy(&self.conn, &self.dest, &self.path).await
    }

    /// Human-readable name of the application owning this node.
    pub async fn application_name(&self) -> Result<String> {
        let proxy = self.accessible().await?;
        let app = proxy
            .get_application()
            .await
            .context("application lookup failed")?;
        let app_node = AtspiNode {
            conn: self.conn.clone(),
            dest: app.name.to_string(),
            path: app.path.to_string(),
        };
        let name = app_node.accessible().await?.name().await.unwrap_or_default();
        Ok(if name.is_empty() {
            "unknown".to_string()
        } else {
            name
        })
    }
}

impl TreeNode for AtspiNode {
    async fn descriptor(&self) -> Result<NodeDescriptor> {
        let proxy = self.accessible().await?;
        let role = proxy.get_role_name().await.context("role read failed")?;
        let text_capable = match proxy.get_interfaces().await {
            Ok(interfaces) => interfaces.contains(Interface::Text),
            Err(_) => false,
        };
        Ok(NodeDescriptor {
            role,
            node_path: self.path.clone(),
            text_capable,
        })
    }

    async fn children(&self) -> Result<Vec<Self>> {
        let proxy = self.accessible().await?;
        let refs = proxy
            .get_children()
            .await
            .context("child enumeration failed")?;
        Ok(refs
            .into_iter()
            .map(|child| AtspiNode {
                conn: self.conn.clone(),
                dest: child.name.to_string(),
                path: child.path.to_string(),
            })
            .collect())
    }

    async fn read_text(&self) -> Result<String> {
        let proxy = text_proxy(&self.conn, &self.dest, &self.path).await?;
        let count = proxy
            .character_count()
            .await
            .context("character count read failed")?;
        proxy
            .get_text(0, count)
            .await
            .context("text read failed")
    }
}

async fn accessible_proxy(
    conn: &Connection,
    dest: &str,
    path: &str,
) -> Result<AccessibleProxy<'static>> {
    let proxy = AccessibleProxy::builder(conn)
        .destination(dest.to_string())?
        .path(path.to_string())?
        .interface(ACCESSIBLE_INTERFACE)?
        .cache_properties(CacheProperties::No)
        .build()
        .await?;
    Ok(proxy)
}

async fn text_proxy(conn: &Connection, dest: &str, path: &str) -> Result<TextProxy<'static>> {
    let proxy = TextProxy::builder(conn)
        .destination(dest.to_string())?
        .path(path.to_string())?
        .interface(TEXT_INTERFACE)?
        .cache_properties(CacheProperties::No)
        .build()
        .await?;
    Ok(proxy)
}
