//! WebSocket client for the coordinator's auction channel.
//!
//! Connection loss is routine: the task reconnects forever with a
//! fixed delay until shutdown. Messages that do not decode as auction
//! events are ignored so the coordinator can extend its protocol
//! without breaking older bots.

use crate::AuctionParticipant;
use futures_util::StreamExt;
use resolver_types::AuctionMessage;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Runs until shutdown. Owns the connect/reconnect cycle; message
/// handling is delegated to the participant.
pub async fn run_channel(
	participant: Arc<AuctionParticipant>,
	ws_url: String,
	reconnect_delay: std::time::Duration,
	mut shutdown: watch::Receiver<bool>,
) {
	loop {
		tokio::select! {
			_ = shutdown.changed() => break,
			connected = connect_async(&ws_url) => match connected {
				Ok((stream, _)) => {
					info!(url = %ws_url, "auction channel connected");
					drive(stream, &participant, &mut shutdown).await;
					if *shutdown.borrow() {
						break;
					}
					warn!("auction channel disconnected");
				}
				Err(err) => {
					warn!(url = %ws_url, error = %err, "auction channel connect failed");
				}
			}
		}

		tokio::select! {
			_ = shutdown.changed() => break,
			_ = tokio::time::sleep(reconnect_delay) => {}
		}
	}

	participant.shutdown();
	info!("auction channel stopped");
}

async fn drive(
	mut stream: WsStream,
	participant: &Arc<AuctionParticipant>,
	shutdown: &mut watch::Receiver<bool>,
) {
	loop {
		tokio::select! {
			_ = shutdown.changed() => {
				let _ = stream.close(None).await;
				return;
			}
			frame = stream.next() => match frame {
				Some(Ok(Message::Text(text))) => {
					match serde_json::from_str::<AuctionMessage>(&text) {
						Ok(message) => participant.on_message(message).await,
						Err(err) => debug!(error = %err, "ignoring unrecognized channel message"),
					}
				}
				Some(Ok(Message::Close(_))) | None => return,
				Some(Ok(_)) => {}
				Some(Err(err)) => {
					warn!(error = %err, "auction channel read failed");
					return;
				}
			}
		}
	}
}
