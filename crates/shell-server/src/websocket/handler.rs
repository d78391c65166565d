//! Inbound client message dispatch.

use shell_core::protocol::{ClientCommand, events};
use shell_core::{Envelope, Result, codec};
use tracing::{debug, warn};

use super::connection::ClientConnection;
use super::hub::Hub;

/// Decode a text frame and dispatch each envelope it carries, in order.
///
/// Malformed lines are dropped by the codec; the rest of the frame is still
/// processed.
pub async fn handle_frame(hub: &Hub, connection: &ClientConnection, frame: &str) {
    for envelope in codec::decode_frame(frame) {
        handle_envelope(hub, connection, &envelope).await;
    }
}

/// Dispatch a single envelope from `connection`.
///
/// Failures are reported back to the sender as an `ERROR` envelope; other
/// clients see nothing.
pub async fn handle_envelope(hub: &Hub, connection: &ClientConnection, envelope: &Envelope) {
    let result = match ClientCommand::parse(envelope) {
        Ok(Some(command)) => dispatch(hub, connection, command).await,
        Ok(None) => {
            debug!(conn_id = %connection.id, kind = envelope.kind(), "ignoring unknown message type");
            return;
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        warn!(
            conn_id = %connection.id,
            kind = envelope.kind(),
            code = e.code(),
            error = %e,
            "client command failed"
        );
        let _ = connection.send_envelope(&events::error(&e, envelope.kind()));
    }
}

async fn dispatch(hub: &Hub, connection: &ClientConnection, command: ClientCommand) -> Result<()> {
    match command {
        ClientCommand::Pong => {
            connection.mark_alive();
            Ok(())
        }
        ClientCommand::Ping => {
            let _ = connection.send_envelope(&events::pong());
            Ok(())
        }
        ClientCommand::Navigate { url, tab_id } => {
            let _ = hub.navigate(&connection.id, &url, tab_id).await?;
            Ok(())
        }
        ClientCommand::NewTab { url } => hub.new_tab(&url).await.map(|_| ()),
        ClientCommand::CloseTab { tab_id } => hub.close_tab(tab_id).await,
    }
}
