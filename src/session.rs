// src/session.rs
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, select};
use log::{debug, error, info, warn};

use crate::config::ServiceConfig;
use crate::error::ScanError;
use crate::ndef;
use crate::reader::{InvalidationReason, NdefStatus, ReaderEvent, TagReader};
use crate::tag::{self, Identification, TagHandle};
use crate::types::{
    NfcCommand, OutgoingMessage, RawRecord, ScanResult, ScanSnapshot, SessionState, Technology,
};

// How long the actor waits for input when no deadline is pending.
const IDLE_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub collision_backoff: Duration,
    pub keep_session_open: bool,
    pub alert_message: String,
}

impl From<&ServiceConfig> for SessionSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            collision_backoff: config.collision_backoff(),
            keep_session_open: config.keep_session_open,
            alert_message: config.alert_message.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&ServiceConfig::default())
    }
}

/// Owns one scan attempt at a time. Every reader callback maps to exactly one
/// transition; the controller itself is not shared, so it is driven from a
/// single thread (see `run`).
pub struct ScanController<R: TagReader> {
    reader: R,
    publisher: Sender<OutgoingMessage>,
    settings: SessionSettings,
    state: SessionState,
    status: String,
    candidate: Option<TagHandle>,
    identification: Option<Identification>,
    result: Option<ScanResult>,
    last_error: Option<ScanError>,
    repoll_at: Option<Instant>,
    session_open: bool,
}

impl<R: TagReader> ScanController<R> {
    pub fn new(reader: R, publisher: Sender<OutgoingMessage>, settings: SessionSettings) -> Self {
        Self {
            reader,
            publisher,
            settings,
            state: SessionState::Idle,
            status: "Ready".to_string(),
            candidate: None,
            identification: None,
            result: None,
            last_error: None,
            repoll_at: None,
            session_open: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_result(&self) -> Option<&ScanResult> {
        self.result.as_ref()
    }

    pub fn last_error(&self) -> Option<&ScanError> {
        self.last_error.as_ref()
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Earliest instant at which `on_tick` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.repoll_at
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        let (identity, rendered_content, extras) = match (&self.result, &self.identification) {
            (Some(result), _) => (
                Some(result.identity.clone()),
                Some(result.rendered_content.clone()),
                result.extras.clone(),
            ),
            (None, Some(id)) => (Some(id.identity.clone()), None, id.extras.clone()),
            (None, None) => (None, None, BTreeMap::new()),
        };
        ScanSnapshot {
            state: self.state,
            status: self.status.clone(),
            identity,
            rendered_content,
            extras,
            is_scanning: self.state.is_scanning(),
            error: self.last_error.clone(),
        }
    }

    pub fn start(&mut self) -> Result<(), ScanError> {
        if self.state != SessionState::Idle {
            warn!("start() rejected in state {:?}", self.state);
            return Err(ScanError::AlreadyScanning);
        }
        if !self.reader.is_available() {
            error!("No NFC reader available");
            self.last_error = Some(ScanError::UnsupportedDevice);
            self.status = ScanError::UnsupportedDevice.to_string();
            self.publish();
            return Err(ScanError::UnsupportedDevice);
        }
        if self.session_open {
            // kept open after the previous read
            self.reader.invalidate(None);
        }

        info!("Starting scan session");
        self.clear_session();
        self.result = None;
        self.last_error = None;
        self.status = self.settings.alert_message.clone();
        self.session_open = true;
        self.transition(SessionState::Polling);
        self.reader.begin_session(&self.settings.alert_message);
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.state == SessionState::Idle && !self.session_open {
            debug!("stop() while idle, nothing to do");
            return;
        }
        info!("Stopping scan session from state {:?}", self.state);
        if self.session_open {
            self.reader.invalidate(None);
            self.session_open = false;
        }
        if self.state != SessionState::Idle {
            // a result still in flight is dropped
            self.result = None;
            self.status = "Scan stopped".to_string();
        }
        self.clear_session();
        self.transition(SessionState::Idle);
    }

    pub fn handle_command(&mut self, command: NfcCommand) {
        match command {
            NfcCommand::Start => {
                if let Err(err) = self.start() {
                    let _ = self.publisher.send(OutgoingMessage::ScanError {
                        error: err.to_string(),
                    });
                }
            }
            NfcCommand::Stop => self.stop(),
            NfcCommand::CheckReaderStatus => {
                let _ = self.publisher.send(OutgoingMessage::ReaderStatus {
                    success: self.reader.is_available(),
                });
            }
        }
    }

    pub fn handle_event(&mut self, event: ReaderEvent) {
        match (self.state, event) {
            (SessionState::Polling, ReaderEvent::SessionActive) => {
                info!("Reader session active");
            }
            (SessionState::Polling, ReaderEvent::TagsDetected(handles)) => {
                self.on_tags_detected(handles);
            }
            (SessionState::Idle, ReaderEvent::TagsDetected(handles)) if self.session_open => {
                info!("Next tag in the kept session");
                self.result = None;
                self.last_error = None;
                self.on_tags_detected(handles);
            }
            (SessionState::Connecting, ReaderEvent::Connected) => self.on_connected(),
            (SessionState::Connecting, ReaderEvent::ConnectFailed(reason)) => {
                self.fail(ScanError::ConnectFailed(reason));
            }
            (SessionState::Reading, ReaderEvent::NdefStatus(status)) => {
                self.on_ndef_status(status);
            }
            (SessionState::Reading, ReaderEvent::NdefRead(read)) => self.on_ndef_read(read),
            (_, ReaderEvent::Invalidated(reason)) => self.on_invalidated(reason),
            (state, event) => {
                debug!("Ignoring {:?} in state {:?}", event, state);
            }
        }
    }

    /// Fires the collision re-poll once its backoff has elapsed.
    pub fn on_tick(&mut self, now: Instant) {
        let Some(at) = self.repoll_at else {
            return;
        };
        if now < at {
            return;
        }
        self.repoll_at = None;
        if self.state == SessionState::TagsDetected {
            self.status = self.settings.alert_message.clone();
            self.transition(SessionState::Polling);
            self.reader.restart_polling();
        }
    }

    /// Actor loop: the only place the controller is touched once spawned.
    pub fn run(mut self, commands: Receiver<NfcCommand>, events: Receiver<ReaderEvent>) {
        info!("Scan controller running");
        loop {
            let wait = self
                .next_deadline()
                .map(|at| at.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_WAIT);

            select! {
                recv(commands) -> cmd => match cmd {
                    Ok(cmd) => self.handle_command(cmd),
                    Err(_) => break,
                },
                recv(events) -> event => match event {
                    Ok(event) => self.handle_event(event),
                    Err(_) => break,
                },
                default(wait) => {}
            }

            self.on_tick(Instant::now());
        }
        info!("Scan controller stopped");
    }

    fn on_tags_detected(&mut self, mut handles: Vec<TagHandle>) {
        if handles.len() != 1 {
            // never guess which of several tags the user meant
            warn!("{} tags detected, re-polling", handles.len());
            if handles.len() > 1 {
                self.status = ScanError::Collision.to_string();
            }
            self.repoll_at = Some(Instant::now() + self.settings.collision_backoff);
            self.transition(SessionState::TagsDetected);
            return;
        }

        let handle = handles.swap_remove(0);
        info!("Tag detected, connecting to handle {}", handle.id);
        self.status = "Tag detected".to_string();
        self.transition(SessionState::TagsDetected);

        let id = handle.id;
        self.candidate = Some(handle);
        self.status = "Connecting to tag".to_string();
        self.transition(SessionState::Connecting);
        self.reader.connect(id);
    }

    fn on_connected(&mut self) {
        let Some(candidate) = &self.candidate else {
            self.fail(ScanError::Unknown("Connected without a candidate tag".into()));
            return;
        };
        let identification = tag::identify(&candidate.technology);
        if identification.identity.technology == Technology::Unknown {
            warn!("Tag technology could not be determined");
        } else {
            info!(
                "Connected to {} tag {}",
                identification.identity.technology.as_str(),
                identification.identity.uid_hex()
            );
        }
        self.identification = Some(identification);
        self.status = "Reading tag".to_string();
        self.transition(SessionState::Reading);
        self.reader.query_ndef_status();
    }

    fn on_ndef_status(&mut self, status: NdefStatus) {
        let (capacity, writable) = match status {
            NdefStatus::NotSupported => {
                self.fail(ScanError::NdefNotSupported);
                return;
            }
            NdefStatus::ReadOnly { capacity } => (capacity, false),
            NdefStatus::ReadWrite { capacity } => (capacity, true),
        };
        debug!("NDEF capacity {} bytes, writable: {}", capacity, writable);
        if let Some(id) = &mut self.identification {
            id.extras
                .insert("NDEF Capacity".to_string(), format!("{} bytes", capacity));
            id.extras.insert(
                "NDEF Access".to_string(),
                if writable { "read/write" } else { "read-only" }.to_string(),
            );
        }
        self.reader.read_ndef();
    }

    fn on_ndef_read(&mut self, read: Result<Vec<RawRecord>, String>) {
        let records = match read {
            Ok(records) if records.iter().all(RawRecord::is_empty) => {
                self.fail(ScanError::NoContent);
                return;
            }
            Ok(records) => records,
            Err(reason) => {
                self.fail(ScanError::Unknown(reason));
                return;
            }
        };

        let Some(identification) = self.identification.take() else {
            self.fail(ScanError::Unknown("Read completed without identification".into()));
            return;
        };

        let result = ScanResult {
            identity: identification.identity,
            rendered_content: ndef::render_message(&records),
            extras: identification.extras,
        };
        info!(
            "Read {} record(s) from tag {}",
            records.len(),
            result.identity.uid_hex()
        );

        self.result = Some(result.clone());
        self.status = "Tag read successfully".to_string();
        self.transition(SessionState::Reporting);
        let _ = self.publisher.send(OutgoingMessage::ScanResult(result));

        self.candidate = None;
        if self.settings.keep_session_open {
            self.transition(SessionState::Idle);
            // the reader reports the next tag once this one has left the field
            self.reader.restart_polling();
        } else {
            self.reader.invalidate(Some(&self.status));
            self.session_open = false;
            self.transition(SessionState::Idle);
        }
    }

    fn on_invalidated(&mut self, reason: InvalidationReason) {
        self.session_open = false;
        if self.state == SessionState::Idle {
            debug!("Session invalidated while idle: {:?}", reason);
            return;
        }
        match reason {
            InvalidationReason::UserCanceled => {
                info!("Session cancelled by user");
                self.result = None;
                self.status = "Scan cancelled".to_string();
                self.clear_session();
                self.transition(SessionState::Idle);
            }
            InvalidationReason::Timeout => self.fail(ScanError::Timeout),
            InvalidationReason::SessionTerminated => {
                self.fail(ScanError::Unknown("Session terminated unexpectedly".into()))
            }
            InvalidationReason::Failure(reason) => self.fail(ScanError::Unknown(reason)),
        }
    }

    fn fail(&mut self, err: ScanError) {
        error!("Scan failed in state {:?}: {}", self.state, err);
        self.status = err.to_string();
        self.last_error = Some(err);
        self.result = None;
        self.transition(SessionState::Error);

        if self.session_open {
            self.reader.invalidate(Some(&self.status));
            self.session_open = false;
        }
        self.clear_session();
        self.transition(SessionState::Idle);
    }

    fn clear_session(&mut self) {
        self.candidate = None;
        self.identification = None;
        self.repoll_at = None;
    }

    fn transition(&mut self, next: SessionState) {
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
        self.publish();
    }

    fn publish(&self) {
        let _ = self
            .publisher
            .send(OutgoingMessage::ScanStatus(self.snapshot()));
    }
}
