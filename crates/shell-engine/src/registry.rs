//! In-memory tab registry.
//!
//! The registry is the authoritative record of open tabs. Ids come from a
//! counter that only moves forward, so an id is never handed out twice while
//! the registry lives, including ids whose creation was rolled back.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use shell_core::protocol::EngineCommand;
use shell_core::{Result, ShellError, Tab, TabId};
use tracing::{debug, warn};

use crate::sink::CommandSink;

struct Inner {
    next_id: u64,
    tabs: BTreeMap<TabId, Tab>,
}

/// Tab records plus the engine link used to open, close and navigate them.
pub struct TabRegistry {
    sink: Arc<dyn CommandSink>,
    inner: Mutex<Inner>,
}

impl TabRegistry {
    /// Empty registry; the first tab gets id 1.
    pub fn new(sink: Arc<dyn CommandSink>) -> Self {
        Self {
            sink,
            inner: Mutex::new(Inner {
                next_id: 1,
                tabs: BTreeMap::new(),
            }),
        }
    }

    /// Allocate an id, record the tab and tell the engine to open it.
    ///
    /// If the engine rejects the command the record is removed again but the
    /// id stays consumed.
    pub async fn create_tab(&self, url: &str) -> Result<TabId> {
        let id = {
            let mut inner = self.inner.lock();
            let id = TabId::new(inner.next_id);
            inner.next_id += 1;
            let _ = inner.tabs.insert(id, Tab::new(id, url));
            id
        };

        let command = EngineCommand::NewTab {
            tab_id: id,
            url: url.to_owned(),
        };
        if let Err(e) = self.sink.send_command(command.to_envelope()).await {
            warn!(tab_id = %id, error = %e, "NEW_TAB rejected, rolling back");
            let _ = self.inner.lock().tabs.remove(&id);
            return Err(e);
        }

        debug!(tab_id = %id, url, "tab created");
        Ok(id)
    }

    /// Remove a tab and tell the engine to close it.
    ///
    /// The record is restored if the engine rejects the command.
    pub async fn close_tab(&self, id: TabId) -> Result<()> {
        let removed = self
            .inner
            .lock()
            .tabs
            .remove(&id)
            .ok_or_else(|| ShellError::tab_not_found(id))?;

        let command = EngineCommand::CloseTab { tab_id: id };
        if let Err(e) = self.sink.send_command(command.to_envelope()).await {
            warn!(tab_id = %id, error = %e, "CLOSE_TAB rejected, restoring tab");
            let _ = self.inner.lock().tabs.insert(id, removed);
            return Err(e);
        }

        debug!(tab_id = %id, "tab closed");
        Ok(())
    }

    /// Tell the engine to navigate, then record the URL when the tab is known.
    pub async fn navigate(&self, url: &str, tab_id: Option<TabId>) -> Result<Option<Tab>> {
        let command = EngineCommand::Navigate {
            url: url.to_owned(),
            tab_id,
        };
        self.sink.send_command(command.to_envelope()).await?;

        let Some(id) = tab_id else {
            return Ok(None);
        };
        Ok(self.update(id, |tab| tab.url = url.to_owned()))
    }

    /// Record a URL the engine reached on its own (redirects, in-page links).
    pub fn update_url(&self, id: TabId, url: &str) -> Option<Tab> {
        self.update(id, |tab| tab.url = url.to_owned())
    }

    /// Set a tab's title. `None` if the tab no longer exists.
    pub fn update_title(&self, id: TabId, title: &str) -> Option<Tab> {
        self.update(id, |tab| tab.title = Some(title.to_owned()))
    }

    /// Set a tab's favicon URL. `None` if the tab no longer exists.
    pub fn update_favicon(&self, id: TabId, favicon: &str) -> Option<Tab> {
        self.update(id, |tab| tab.favicon = Some(favicon.to_owned()))
    }

    /// Snapshot of one tab.
    pub fn get(&self, id: TabId) -> Option<Tab> {
        self.inner.lock().tabs.get(&id).cloned()
    }

    /// Snapshot of all tabs in id order.
    pub fn list(&self) -> Vec<Tab> {
        self.inner.lock().tabs.values().cloned().collect()
    }

    /// Number of open tabs.
    pub fn len(&self) -> usize {
        self.inner.lock().tabs.len()
    }

    /// Whether no tabs are open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, id: TabId, apply: impl FnOnce(&mut Tab)) -> Option<Tab> {
        let mut inner = self.inner.lock();
        let tab = inner.tabs.get_mut(&id)?;
        apply(tab);
        Some(tab.clone())
    }
}
