// src/ws.rs
use std::net::SocketAddr;
use std::sync::Arc;

use crossbeam_channel::Sender;
use futures::{SinkExt, StreamExt};
use log::{error, info, warn};
use tokio::sync::broadcast;
use warp::Filter;

use crate::types::{IncomingMessage, NfcCommand, OutgoingMessage};

pub async fn start_server(
    addr: SocketAddr,
    nfc_cmd_tx: Sender<NfcCommand>,
    mut nfc_event_rx: broadcast::Receiver<OutgoingMessage>,
) {
    // Shared Broadcast Channel for WS Clients
    let (ws_tx, _) = broadcast::channel::<OutgoingMessage>(32);
    let ws_tx = Arc::new(ws_tx);

    // 1. Task to forward NFC Events -> All WS Clients
    let ws_tx_clone = ws_tx.clone();
    tokio::spawn(async move {
        loop {
            match nfc_event_rx.recv().await {
                Ok(msg) => {
                    let _ = ws_tx_clone.send(msg);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("WS forwarder lagged, {} message(s) dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // 2. WS route on the root path "/"
    let ws_route = warp::path::end()
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let nfc_cmd_tx = nfc_cmd_tx.clone();
            let ws_tx = ws_tx.clone();
            ws.on_upgrade(move |socket| handle_connection(socket, nfc_cmd_tx, ws_tx))
        });

    let routes = ws_route.with(warp::cors().allow_any_origin());

    info!("WebSocket server running on ws://{}", addr);
    warp::serve(routes).run(addr).await;
}

/// Map one text frame from a client to a controller command.
pub fn parse_command(text: &str) -> Option<NfcCommand> {
    match serde_json::from_str::<IncomingMessage>(text) {
        Ok(msg) => Some(msg.into()),
        Err(err) => {
            warn!("Ignoring malformed message {:?}: {}", text, err);
            None
        }
    }
}

/// Next message for one client. A lagging client skips what it missed and
/// keeps receiving; `None` once the broadcast is closed.
async fn next_broadcast(
    rx: &mut broadcast::Receiver<OutgoingMessage>,
) -> Option<OutgoingMessage> {
    loop {
        match rx.recv().await {
            Ok(msg) => return Some(msg),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("WS client lagged, {} message(s) dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

async fn handle_connection(
    ws: warp::ws::WebSocket,
    nfc_cmd_tx: Sender<NfcCommand>,
    ws_tx: Arc<broadcast::Sender<OutgoingMessage>>,
) {
    let (mut client_ws_tx, mut client_ws_rx) = ws.split();
    let mut rx_broadcast = ws_tx.subscribe();

    // Spawn task to send Broadcasts -> Client
    tokio::spawn(async move {
        while let Some(msg) = next_broadcast(&mut rx_broadcast).await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(err) => {
                    error!("Failed to serialize {:?}: {}", msg, err);
                    continue;
                }
            };
            if client_ws_tx
                .send(warp::ws::Message::text(json))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Handle incoming messages from Client
    while let Some(result) = client_ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(err) => {
                warn!("WebSocket error: {}", err);
                break;
            }
        };
        let Ok(text) = msg.to_str() else {
            continue;
        };
        if let Some(cmd) = parse_command(text) {
            info!("Received command {:?}", cmd);
            let _ = nfc_cmd_tx.send(cmd);
        }
    }
    info!("WebSocket client disconnected");
}
