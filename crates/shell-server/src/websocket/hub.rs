//! Tab operations that end in a client broadcast.
//!
//! [`Hub`] pairs the tab registry with the connection set. Every mutation
//! that succeeds is announced to clients; every failure is returned to the
//! caller untouched so the session can report it to the originating client.

use std::sync::Arc;

use async_trait::async_trait;
use shell_core::protocol::{DownloadState, TabUpdate, events};
use shell_core::{ConnectionId, Envelope, Result, Tab, TabId};
use shell_engine::TabRegistry;
use tracing::{debug, warn};

use super::broadcast::BroadcastManager;
use crate::publish::EventPublisher;

/// Registry plus fan-out.
pub struct Hub {
    registry: Arc<TabRegistry>,
    broadcast: Arc<BroadcastManager>,
}

impl Hub {
    /// Wire a registry to a connection set.
    pub fn new(registry: Arc<TabRegistry>, broadcast: Arc<BroadcastManager>) -> Self {
        Self {
            registry,
            broadcast,
        }
    }

    /// The tab registry.
    pub fn registry(&self) -> &Arc<TabRegistry> {
        &self.registry
    }

    /// The connection set.
    pub fn connections(&self) -> &Arc<BroadcastManager> {
        &self.broadcast
    }

    /// Forward a navigation to the engine and echo it to every other client.
    pub async fn navigate(
        &self,
        sender: &ConnectionId,
        url: &str,
        tab_id: Option<TabId>,
    ) -> Result<usize> {
        let _ = self.registry.navigate(url, tab_id).await?;
        Ok(self
            .broadcast
            .broadcast(&events::navigate(url, tab_id), Some(sender))
            .await)
    }

    /// Open a tab and announce it to every client.
    pub async fn new_tab(&self, url: &str) -> Result<Tab> {
        let id = self.registry.create_tab(url).await?;
        let tab = Tab::new(id, url);
        let _ = self.broadcast.broadcast(&events::tab_created(&tab), None).await;
        Ok(tab)
    }

    /// Close a tab and announce it to every client.
    pub async fn close_tab(&self, tab_id: TabId) -> Result<()> {
        self.registry.close_tab(tab_id).await?;
        let _ = self.broadcast.broadcast(&events::tab_closed(tab_id), None).await;
        Ok(())
    }

    /// Record an engine-side URL change. Returns `false` for unknown tabs.
    pub async fn url_changed(&self, tab_id: TabId, url: &str) -> bool {
        self.apply(TabUpdate::UrlChanged {
            tab_id,
            url: url.to_owned(),
        })
        .await
        .is_some()
    }

    /// Record a page title. Returns `false` for unknown tabs.
    pub async fn title_changed(&self, tab_id: TabId, title: &str) -> bool {
        self.apply(TabUpdate::TitleChanged {
            tab_id,
            title: title.to_owned(),
        })
        .await
        .is_some()
    }

    /// Record a favicon. Returns `false` for unknown tabs.
    pub async fn favicon_changed(&self, tab_id: TabId, favicon: &str) -> bool {
        self.apply(TabUpdate::FaviconChanged {
            tab_id,
            favicon: favicon.to_owned(),
        })
        .await
        .is_some()
    }

    /// Update the registry, then announce the change.
    ///
    /// `None` when the tab no longer exists; nothing is broadcast then.
    async fn apply(&self, update: TabUpdate) -> Option<usize> {
        let (tab_id, envelope) = match &update {
            TabUpdate::UrlChanged { tab_id, url } => (
                *tab_id,
                self.registry
                    .update_url(*tab_id, url)
                    .map(|_| events::url_changed(*tab_id, url)),
            ),
            TabUpdate::TitleChanged { tab_id, title } => (
                *tab_id,
                self.registry
                    .update_title(*tab_id, title)
                    .map(|_| events::title_changed(*tab_id, title)),
            ),
            TabUpdate::FaviconChanged { tab_id, favicon } => (
                *tab_id,
                self.registry
                    .update_favicon(*tab_id, favicon)
                    .map(|_| events::favicon_changed(*tab_id, favicon)),
            ),
        };
        let Some(envelope) = envelope else {
            debug!(%tab_id, ?update, "update for unknown tab ignored");
            return None;
        };
        Some(self.broadcast.broadcast(&envelope, None).await)
    }

    /// Announce download progress.
    pub async fn download_progress(
        &self,
        download_id: &str,
        received_bytes: u64,
        total_bytes: Option<u64>,
        state: DownloadState,
    ) -> usize {
        self.broadcast
            .broadcast(
                &events::download_progress(download_id, received_bytes, total_bytes, state),
                None,
            )
            .await
    }

    /// Announce a picture-in-picture change.
    pub async fn pip_state_changed(&self, active: bool, tab_id: Option<TabId>) -> usize {
        self.broadcast
            .broadcast(&events::pip_state_changed(active, tab_id), None)
            .await
    }
}

#[async_trait]
impl EventPublisher for Hub {
    /// Tab updates go through the registry first; anything else is fanned
    /// out as-is.
    async fn publish(&self, envelope: Envelope) -> usize {
        match TabUpdate::parse(&envelope) {
            Ok(Some(update)) => self.apply(update).await.unwrap_or(0),
            Ok(None) => self.broadcast.broadcast(&envelope, None).await,
            Err(e) => {
                warn!(kind = envelope.kind(), error = %e, "malformed tab update dropped");
                0
            }
        }
    }
}
