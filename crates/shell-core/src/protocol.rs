//! Message catalogue for the engine and client protocols.
//!
//! The engine protocol carries [`EngineCommand`]s on the engine's stdin.
//! The client protocol carries [`ClientCommand`]s from UI clients to the hub,
//! and the envelopes built by the [`events`] constructors from the hub to
//! every client.

use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::errors::{Result, ShellError};
use crate::ids::TabId;

/// Message type names.
pub mod kind {
    /// Navigate the active (or given) tab. Engine command, client command and broadcast.
    pub const NAVIGATE: &str = "NAVIGATE";
    /// Open a new tab. Engine command and client command.
    pub const NEW_TAB: &str = "NEW_TAB";
    /// Close a tab. Engine command and client command.
    pub const CLOSE_TAB: &str = "CLOSE_TAB";
    /// Keepalive ping (both directions).
    pub const PING: &str = "PING";
    /// Keepalive reply (both directions).
    pub const PONG: &str = "PONG";
    /// A tab was created.
    pub const TAB_CREATED: &str = "TAB_CREATED";
    /// A tab was closed.
    pub const TAB_CLOSED: &str = "TAB_CLOSED";
    /// A tab's URL changed.
    pub const URL_CHANGED: &str = "URL_CHANGED";
    /// A tab's title changed.
    pub const TITLE_CHANGED: &str = "TITLE_CHANGED";
    /// A tab's favicon changed.
    pub const FAVICON_CHANGED: &str = "FAVICON_CHANGED";
    /// Download progress update.
    pub const DOWNLOAD_PROGRESS: &str = "DOWNLOAD_PROGRESS";
    /// Picture-in-picture state change.
    pub const PIP_STATE_CHANGED: &str = "PIP_STATE_CHANGED";
    /// A command from this client failed.
    pub const ERROR: &str = "ERROR";
    /// The engine process exited unexpectedly.
    pub const ENGINE_CRASHED: &str = "ENGINE_CRASHED";
}

/// A browsing context tracked by the tab registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    /// Registry-assigned id.
    pub id: TabId,
    /// Current URL.
    pub url: String,
    /// Page title, once known.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub title: Option<String>,
    /// Favicon URL or data URI, once known.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub favicon: Option<String>,
}

impl Tab {
    /// A freshly opened tab with no title or favicon yet.
    pub fn new(id: TabId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            title: None,
            favicon: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine protocol
// ─────────────────────────────────────────────────────────────────────────────

/// Commands written to the engine process's stdin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineCommand {
    /// Load a URL.
    Navigate {
        /// Target URL.
        url: String,
        /// Tab to navigate; the engine's active tab when absent.
        tab_id: Option<TabId>,
    },
    /// Open a tab with a registry-assigned id.
    NewTab {
        /// Registry-assigned id.
        tab_id: TabId,
        /// Initial URL.
        url: String,
    },
    /// Close a tab.
    CloseTab {
        /// Tab to close.
        tab_id: TabId,
    },
}

impl EngineCommand {
    /// The wire envelope for this command.
    pub fn to_envelope(&self) -> Envelope {
        match self {
            Self::Navigate { url, tab_id } => {
                let env = Envelope::new(kind::NAVIGATE).with("url", url.as_str());
                match tab_id {
                    Some(id) => env.with("tabId", *id),
                    None => env,
                }
            }
            Self::NewTab { tab_id, url } => Envelope::new(kind::NEW_TAB)
                .with("tabId", *tab_id)
                .with("url", url.as_str()),
            Self::CloseTab { tab_id } => Envelope::new(kind::CLOSE_TAB).with("tabId", *tab_id),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client protocol (client → server)
// ─────────────────────────────────────────────────────────────────────────────

/// URL used when a `NEW_TAB` command carries none.
pub const BLANK_URL: &str = "about:blank";

/// Commands a UI client may send to the hub.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    /// Navigate, optionally targeting a specific tab.
    Navigate {
        /// Target URL.
        url: String,
        /// Tab to navigate.
        tab_id: Option<TabId>,
    },
    /// Open a new tab.
    NewTab {
        /// Initial URL.
        url: String,
    },
    /// Close a tab.
    CloseTab {
        /// Tab to close.
        tab_id: TabId,
    },
    /// Keepalive ping from the client.
    Ping,
    /// Reply to a server `PING`.
    Pong,
}

impl ClientCommand {
    /// Interpret an inbound envelope.
    ///
    /// Returns `Ok(None)` for types outside the client→server catalogue and
    /// `Err(ProtocolDecode)` when a known type is missing required fields.
    pub fn parse(envelope: &Envelope) -> Result<Option<Self>> {
        let command = match envelope.kind() {
            kind::NAVIGATE => Self::Navigate {
                url: required_str(envelope, "url")?,
                tab_id: envelope.get_u64("tabId").map(TabId::new),
            },
            kind::NEW_TAB => Self::NewTab {
                url: envelope.get_str("url").unwrap_or(BLANK_URL).to_owned(),
            },
            kind::CLOSE_TAB => Self::CloseTab {
                tab_id: envelope
                    .get_u64("tabId")
                    .map(TabId::new)
                    .ok_or_else(|| missing_field(envelope, "tabId"))?,
            },
            kind::PING => Self::Ping,
            kind::PONG => Self::Pong,
            _ => return Ok(None),
        };
        Ok(Some(command))
    }
}

fn required_str(envelope: &Envelope, field: &str) -> Result<String> {
    envelope
        .get_str(field)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| missing_field(envelope, field))
}

fn missing_field(envelope: &Envelope, field: &str) -> ShellError {
    ShellError::ProtocolDecode {
        reason: format!("{} requires `{field}`", envelope.kind()),
        line: envelope.to_value().to_string(),
    }
}

/// Tab state reported by an out-of-process collaborator.
///
/// These arrive as published envelopes and must be applied to the registry
/// before they are fanned out.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TabUpdate {
    /// The tab reached a new URL.
    UrlChanged {
        /// Affected tab.
        #[serde(rename = "tabId")]
        tab_id: TabId,
        /// New URL.
        url: String,
    },
    /// The page title changed.
    TitleChanged {
        /// Affected tab.
        #[serde(rename = "tabId")]
        tab_id: TabId,
        /// New title.
        title: String,
    },
    /// The favicon changed.
    FaviconChanged {
        /// Affected tab.
        #[serde(rename = "tabId")]
        tab_id: TabId,
        /// Favicon URL or data URI.
        favicon: String,
    },
}

impl TabUpdate {
    /// Interpret a published envelope.
    ///
    /// `Ok(None)` for every other type; `Err(ProtocolDecode)` when one of the
    /// three tab types is missing its fields.
    pub fn parse(envelope: &Envelope) -> Result<Option<Self>> {
        match envelope.kind() {
            kind::URL_CHANGED | kind::TITLE_CHANGED | kind::FAVICON_CHANGED => {
                envelope.decode_as().map(Some)
            }
            _ => Ok(None),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client protocol (server → client)
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of a download, as reported in `DOWNLOAD_PROGRESS`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DownloadState {
    /// Bytes are still arriving.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Cancelled by the user.
    Cancelled,
    /// Failed part-way.
    Interrupted,
}

impl DownloadState {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "inProgress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Interrupted => "interrupted",
        }
    }
}

/// Server → client envelope constructors.
pub mod events {
    use super::{DownloadState, Envelope, ShellError, Tab, TabId, kind};

    /// `NAVIGATE` broadcast after a client-initiated navigation.
    pub fn navigate(url: &str, tab_id: Option<TabId>) -> Envelope {
        let env = Envelope::new(kind::NAVIGATE).with("url", url);
        match tab_id {
            Some(id) => env.with("tabId", id),
            None => env,
        }
    }

    /// `TAB_CREATED` with the new tab's id and URL.
    pub fn tab_created(tab: &Tab) -> Envelope {
        Envelope::new(kind::TAB_CREATED)
            .with("tabId", tab.id)
            .with("url", tab.url.as_str())
    }

    /// `TAB_CLOSED`.
    pub fn tab_closed(tab_id: TabId) -> Envelope {
        Envelope::new(kind::TAB_CLOSED).with("tabId", tab_id)
    }

    /// `URL_CHANGED`.
    pub fn url_changed(tab_id: TabId, url: &str) -> Envelope {
        Envelope::new(kind::URL_CHANGED)
            .with("tabId", tab_id)
            .with("url", url)
    }

    /// `TITLE_CHANGED`.
    pub fn title_changed(tab_id: TabId, title: &str) -> Envelope {
        Envelope::new(kind::TITLE_CHANGED)
            .with("tabId", tab_id)
            .with("title", title)
    }

    /// `FAVICON_CHANGED`.
    pub fn favicon_changed(tab_id: TabId, favicon: &str) -> Envelope {
        Envelope::new(kind::FAVICON_CHANGED)
            .with("tabId", tab_id)
            .with("favicon", favicon)
    }

    /// `DOWNLOAD_PROGRESS`.
    pub fn download_progress(
        download_id: &str,
        received_bytes: u64,
        total_bytes: Option<u64>,
        state: DownloadState,
    ) -> Envelope {
        let env = Envelope::new(kind::DOWNLOAD_PROGRESS)
            .with("downloadId", download_id)
            .with("receivedBytes", received_bytes)
            .with("state", state.as_str());
        match total_bytes {
            Some(total) => env.with("totalBytes", total),
            None => env,
        }
    }

    /// `PIP_STATE_CHANGED`.
    pub fn pip_state_changed(active: bool, tab_id: Option<TabId>) -> Envelope {
        let env = Envelope::new(kind::PIP_STATE_CHANGED).with("active", active);
        match tab_id {
            Some(id) => env.with("tabId", id),
            None => env,
        }
    }

    /// `PING`.
    pub fn ping() -> Envelope {
        Envelope::new(kind::PING)
    }

    /// `PONG`.
    pub fn pong() -> Envelope {
        Envelope::new(kind::PONG)
    }

    /// `ERROR` sent back to the client whose command failed.
    pub fn error(err: &ShellError, request_type: &str) -> Envelope {
        Envelope::new(kind::ERROR)
            .with("code", err.code())
            .with("message", err.to_string())
            .with("requestType", request_type)
    }

    /// `ENGINE_CRASHED`.
    pub fn engine_crashed(exit_code: Option<i32>) -> Envelope {
        Envelope::new(kind::ENGINE_CRASHED).with("exitCode", exit_code)
    }
}
