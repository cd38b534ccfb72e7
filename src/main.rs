use crossbeam_channel::unbounded;
use log::{error, info};
use tokio::sync::broadcast;

use nfc_scan_service::config::ServiceConfig;
use nfc_scan_service::reader::ReaderEvent;
use nfc_scan_service::session::{ScanController, SessionSettings};
use nfc_scan_service::types::{NfcCommand, OutgoingMessage};
use nfc_scan_service::{nfc_service, ws};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match ServiceConfig::load() {
        Ok(config) => config,
        Err(err) => {
            error!("Invalid configuration: {}", err);
            std::process::exit(1);
        }
    };
    info!("Starting NFC Scan Service...");

    // Channel: WS -> controller (Commands)
    // Crossbeam (Sync) because the controller runs on a plain OS thread
    let (cmd_tx, cmd_rx) = unbounded::<NfcCommand>();

    // Channel: PC/SC driver -> controller (reader callbacks)
    let (reader_tx, reader_rx) = unbounded::<ReaderEvent>();

    // Channel: controller -> WS (Events)
    // Tokio Broadcast for distribution to WS clients
    let (event_tx, event_rx) = broadcast::channel::<OutgoingMessage>(100);

    let reader = nfc_service::spawn(&config, reader_tx);
    let settings = SessionSettings::from(&config);

    std::thread::spawn(move || {
        // Bridge controller thread -> async broadcast
        let (bridge_tx, bridge_rx) = unbounded::<OutgoingMessage>();

        std::thread::spawn(move || {
            ScanController::new(reader, bridge_tx, settings).run(cmd_rx, reader_rx);
        });

        while let Ok(msg) = bridge_rx.recv() {
            let _ = event_tx.send(msg);
        }
    });

    ws::start_server(config.socket_addr(), cmd_tx, event_rx).await;
}
