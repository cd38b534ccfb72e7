// src/nfc_service.rs
use std::ffi::{CStr, CString};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use log::{debug, error, info, warn};
use pcsc::{Card, Context, PNP_NOTIFICATION, Protocols, ReaderState, Scope, ShareMode, State};

use crate::apdu;
use crate::cards::{self, CardKind};
use crate::config::ServiceConfig;
use crate::ndef;
use crate::reader::{InvalidationReason, ReaderEvent, TagReader};
use crate::tag::TagHandle;

// Wait used while the controller is expected to answer quickly
const FAST_POLL: Duration = Duration::from_millis(20);

#[derive(Debug)]
enum ReaderRequest {
    Begin,
    RestartPolling,
    Connect(u32),
    QueryNdefStatus,
    ReadNdef,
    Invalidate(Option<String>),
}

/// Controller-side handle to the PC/SC driver thread.
pub struct PcscReader {
    requests: Sender<ReaderRequest>,
    available: Arc<AtomicBool>,
}

impl PcscReader {
    fn send(&self, request: ReaderRequest) {
        if self.requests.send(request).is_err() {
            error!("PC/SC driver thread is not running");
        }
    }
}

impl TagReader for PcscReader {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn begin_session(&mut self, alert_message: &str) {
        info!("{}", alert_message);
        self.send(ReaderRequest::Begin);
    }

    fn restart_polling(&mut self) {
        self.send(ReaderRequest::RestartPolling);
    }

    fn connect(&mut self, handle_id: u32) {
        self.send(ReaderRequest::Connect(handle_id));
    }

    fn query_ndef_status(&mut self) {
        self.send(ReaderRequest::QueryNdefStatus);
    }

    fn read_ndef(&mut self) {
        self.send(ReaderRequest::ReadNdef);
    }

    fn invalidate(&mut self, message: Option<&str>) {
        self.send(ReaderRequest::Invalidate(message.map(str::to_string)));
    }
}

/// Start the PC/SC driver on its own OS thread. Events for the controller go
/// out through `events`.
pub fn spawn(config: &ServiceConfig, events: Sender<ReaderEvent>) -> PcscReader {
    let (requests_tx, requests_rx) = unbounded();
    let available = Arc::new(AtomicBool::new(false));

    let driver = Driver {
        requests: requests_rx,
        events,
        available: available.clone(),
        poll_interval: config.poll_interval(),
        session_timeout: config.session_timeout(),
        next_handle_id: 1,
    };
    std::thread::spawn(move || driver.run());

    PcscReader {
        requests: requests_tx,
        available,
    }
}

struct Candidate {
    handle_id: u32,
    reader: CString,
    card: Card,
    kind: CardKind,
}

struct Session {
    started: Instant,
    polling: bool,
    candidates: Vec<Candidate>,
    connected: Option<Candidate>,
    // readers whose current card was already read in this session
    read_on: Vec<CString>,
    retry_detect: bool,
}

impl Session {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            polling: true,
            candidates: Vec::new(),
            connected: None,
            read_on: Vec::new(),
            retry_detect: false,
        }
    }

    fn already_read(&self, reader: &CStr) -> bool {
        self.read_on.iter().any(|r| r.as_c_str() == reader)
    }

    fn card_removed(&mut self, reader: &CStr) {
        self.read_on.retain(|r| r.as_c_str() != reader);
    }

    /// A present card that could not be connected leaves detection pending.
    fn detection_done(&mut self, missed: bool, found: usize) {
        self.retry_detect = missed && found == 0;
    }

    fn should_detect(&self, rescan: bool) -> bool {
        self.polling && (rescan || self.retry_detect)
    }
}

struct Driver {
    requests: Receiver<ReaderRequest>,
    events: Sender<ReaderEvent>,
    available: Arc<AtomicBool>,
    poll_interval: Duration,
    session_timeout: Duration,
    next_handle_id: u32,
}

impl Driver {
    fn run(mut self) {
        info!("Starting PC/SC reader driver (Event Driven)...");

        let ctx = match Context::establish(Scope::User) {
            Ok(ctx) => ctx,
            Err(err) => {
                error!("Failed to establish context: {}", err);
                self.available.store(false, Ordering::SeqCst);
                self.serve_without_context();
                return;
            }
        };

        let mut readers_buf = [0; 2048];
        let mut reader_names: Vec<CString> = Vec::new();
        let mut reader_states = vec![ReaderState::new(PNP_NOTIFICATION(), State::UNAWARE)];
        let mut session: Option<Session> = None;

        loop {
            // 1. Wait for State Change
            let wait = match &session {
                Some(s) if !s.polling => FAST_POLL,
                _ => self.poll_interval,
            };
            if let Err(err) = ctx.get_status_change(wait, &mut reader_states) {
                if err != pcsc::Error::Timeout {
                    error!("PCSC Error: {}", err);
                    std::thread::sleep(Duration::from_secs(1));
                    continue;
                }
            }

            // 2. Requests from the controller
            let mut rescan = false;
            loop {
                match self.requests.try_recv() {
                    Ok(request) => rescan |= self.handle_request(request, &mut session),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        info!("Controller gone, stopping PC/SC driver");
                        return;
                    }
                }
            }

            // 3. Hardware (PnP) and card changes
            let mut readers_changed = false;
            if reader_states[0].event_state().intersects(State::CHANGED) {
                info!("Hardware change detected");
                readers_changed = true;
                reader_states[0].sync_current_state();
            }

            for rs in reader_states.iter_mut().skip(1) {
                if rs.event_state().intersects(State::CHANGED) {
                    let present = rs.event_state().intersects(State::PRESENT);
                    let was_present = rs.current_state().intersects(State::PRESENT);
                    if present && !was_present {
                        info!("Card Inserted on {:?}", rs.name());
                        rescan = true;
                    }
                    if !present && was_present {
                        info!("Card Removed from {:?}", rs.name());
                        if let Some(s) = session.as_mut() {
                            s.card_removed(rs.name());
                        }
                    }
                    rs.sync_current_state();
                }
            }

            // 4. Refresh reader list
            if readers_changed {
                match ctx.list_readers(&mut readers_buf) {
                    Ok(iter) => {
                        reader_names = iter.map(CString::from).collect();
                    }
                    Err(err) => {
                        warn!("Failed to list readers: {}", err);
                        reader_names.clear();
                    }
                }
                // keep the PnP state (index 0), rebuild the rest
                reader_states.truncate(1);
                for name in &reader_names {
                    reader_states.push(ReaderState::new(name.clone(), State::UNAWARE));
                }
                self.available.store(!reader_names.is_empty(), Ordering::SeqCst);
                info!("{} reader(s) available", reader_names.len());
            }

            // 5. Detection and session timeout
            if let Some(s) = session.as_mut() {
                if s.should_detect(rescan) {
                    self.detect(&ctx, &reader_states, s);
                }
            }
            if session
                .as_ref()
                .is_some_and(|s| s.started.elapsed() >= self.session_timeout)
            {
                warn!("Reader session timed out");
                session = None;
                self.emit(ReaderEvent::Invalidated(InvalidationReason::Timeout));
            }
        }
    }

    /// No PC/SC service: availability stays false, any session attempt fails.
    fn serve_without_context(&self) {
        for request in self.requests.iter() {
            if let ReaderRequest::Begin = request {
                self.emit(ReaderEvent::Invalidated(InvalidationReason::Failure(
                    "PC/SC service unavailable".into(),
                )));
            }
        }
    }

    /// Returns true when the readers should be checked for cards again.
    fn handle_request(&mut self, request: ReaderRequest, session: &mut Option<Session>) -> bool {
        debug!("Reader request {:?}", request);
        match request {
            ReaderRequest::Begin => {
                *session = Some(Session::new());
                self.emit(ReaderEvent::SessionActive);
                true
            }
            ReaderRequest::RestartPolling => match session {
                Some(s) => {
                    s.candidates.clear();
                    s.connected = None;
                    s.polling = true;
                    true
                }
                None => false,
            },
            ReaderRequest::Connect(handle_id) => {
                let event = match session.as_mut() {
                    Some(s) => connect(s, handle_id),
                    None => ReaderEvent::ConnectFailed("No active session".into()),
                };
                self.emit(event);
                false
            }
            ReaderRequest::QueryNdefStatus => {
                let event = match session.as_ref().and_then(|s| s.connected.as_ref()) {
                    Some(c) => match cards::ndef_status(&c.card, c.kind) {
                        Ok(status) => ReaderEvent::NdefStatus(status),
                        Err(e) => ReaderEvent::Invalidated(InvalidationReason::Failure(e)),
                    },
                    None => not_connected(),
                };
                self.emit(event);
                false
            }
            ReaderRequest::ReadNdef => {
                let event = match session.as_mut() {
                    Some(Session {
                        connected: Some(c),
                        read_on,
                        ..
                    }) => {
                        let read = cards::read_ndef(&c.card, c.kind)
                            .and_then(|message| ndef::parse_ndef_records(&message));
                        if read.is_ok() {
                            read_on.push(c.reader.clone());
                        }
                        ReaderEvent::NdefRead(read)
                    }
                    _ => not_connected(),
                };
                self.emit(event);
                false
            }
            ReaderRequest::Invalidate(message) => {
                if let Some(message) = message {
                    info!("Session closed: {}", message);
                }
                *session = None;
                false
            }
        }
    }

    fn detect(&mut self, ctx: &Context, reader_states: &[ReaderState], session: &mut Session) {
        let mut candidates = Vec::new();
        let mut missed = false;

        for rs in reader_states.iter().skip(1) {
            if !rs.current_state().intersects(State::PRESENT) {
                continue;
            }
            if session.already_read(rs.name()) {
                continue;
            }
            let card = match ctx.connect(rs.name(), ShareMode::Shared, Protocols::ANY) {
                Ok(card) => card,
                Err(err) => {
                    // often a card still settling in the field
                    warn!("Failed to connect to card on {:?}: {}", rs.name(), err);
                    missed = true;
                    continue;
                }
            };

            let mut names_buf = [0u8; 128];
            let mut atr_buf = [0u8; 64];
            let kind = match card.status2(&mut names_buf, &mut atr_buf) {
                Ok(status) => CardKind::classify(status.atr()),
                Err(_) => CardKind::Unknown,
            };

            let handle_id = self.next_handle_id;
            self.next_handle_id = self.next_handle_id.wrapping_add(1);
            debug!("Candidate {} on {:?} classified as {:?}", handle_id, rs.name(), kind);
            candidates.push(Candidate {
                handle_id,
                reader: rs.name().to_owned(),
                card,
                kind,
            });
        }

        session.detection_done(missed, candidates.len());
        if candidates.is_empty() {
            return;
        }

        let handles = candidates
            .iter()
            .map(|c| TagHandle {
                id: c.handle_id,
                technology: c.kind.technology_handle(read_uid(&c.card)),
            })
            .collect();

        session.polling = false;
        session.candidates = candidates;
        self.emit(ReaderEvent::TagsDetected(handles));
    }

    fn emit(&self, event: ReaderEvent) {
        debug!("Reader event {:?}", event);
        let _ = self.events.send(event);
    }
}

fn read_uid(card: &Card) -> Vec<u8> {
    apdu::get_uid(card).unwrap_or_else(|e| {
        warn!("Could not read tag UID: {}", e);
        Vec::new()
    })
}

fn connect(session: &mut Session, handle_id: u32) -> ReaderEvent {
    let Some(pos) = session
        .candidates
        .iter()
        .position(|c| c.handle_id == handle_id)
    else {
        return ReaderEvent::ConnectFailed(format!("Unknown tag handle {}", handle_id));
    };
    let candidate = session.candidates.swap_remove(pos);
    session.candidates.clear();

    let mut names_buf = [0u8; 128];
    let mut atr_buf = [0u8; 64];
    let present = candidate.card.status2(&mut names_buf, &mut atr_buf).map(|_| ());
    match present {
        Ok(()) => {
            session.connected = Some(candidate);
            ReaderEvent::Connected
        }
        Err(err) => ReaderEvent::ConnectFailed(format!("Tag is no longer present: {}", err)),
    }
}

fn not_connected() -> ReaderEvent {
    ReaderEvent::Invalidated(InvalidationReason::Failure("No tag connected".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_name(name: &str) -> CString {
        CString::new(name).unwrap()
    }

    #[test]
    fn read_card_is_skipped_until_removed() {
        let mut session = Session::new();
        let acr = reader_name("ACS ACR122U 00 00");
        session.read_on.push(acr.clone());

        assert!(session.already_read(&acr));
        assert!(!session.already_read(&reader_name("Other Reader 01 00")));

        session.card_removed(&acr);
        assert!(!session.already_read(&acr));
    }

    #[test]
    fn failed_connect_retries_detection() {
        let mut session = Session::new();
        assert!(session.should_detect(true));
        assert!(!session.should_detect(false));

        session.detection_done(true, 0);
        assert!(session.should_detect(false));

        // a candidate was found, nothing left pending
        session.detection_done(true, 1);
        assert!(!session.should_detect(false));

        session.detection_done(true, 0);
        session.polling = false;
        assert!(!session.should_detect(false));
    }
}
