//! Session controller: the connection state machine.
//!
//! Owns at most one live [`Session`] plus the state that outlives it (status,
//! transcript log, indicator flags, last error). All inputs arrive through
//! `connect` / `disconnect` / `toggle` and `handle_event`, on one task, so no
//! two of them ever run at the same time.

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::backend::{Backend, SessionSettings};
use super::capture::CapturePipeline;
use super::playback::{ActivePlaybackUnit, PlaybackScheduler};
use super::transcript::{TranscriptLog, TranscriptionEntry, TurnTranscripts};
use super::{ConnectionStatus, Envelope, EventSender, SessionEvent, SessionId, UnitId};
use crate::audio::{audio_ring_buffer, Analyser, SpectrumSnapshot};
use crate::codec::{decode_chunk, render_to_audio_buffer};
use crate::error::SessionError;
use crate::ipc::LiveEvent;
use crate::transport::{ClientMessage, ServerContent, TransportLink};

/// Response audio is mono.
const RESPONSE_CHANNELS: u16 = 1;

/// Resources owned by one live conversation.
pub struct Session<B: Backend> {
    id: SessionId,
    link: B::Link,
    capture: CapturePipeline<B::Capture>,
    playback: PlaybackScheduler<B::Output>,
    turn: TurnTranscripts,
}

impl<B: Backend> Session<B> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn playback(&self) -> &PlaybackScheduler<B::Output> {
        &self.playback
    }

    pub fn capture(&self) -> &CapturePipeline<B::Capture> {
        &self.capture
    }

    pub fn turn(&self) -> &TurnTranscripts {
        &self.turn
    }

    /// Release everything. Safe to call more than once.
    fn shutdown(&mut self) {
        self.link.close();
        self.capture.stop();
        self.playback.teardown();
    }
}

pub struct SessionController<B: Backend> {
    backend: B,
    settings: SessionSettings,
    events: mpsc::UnboundedSender<Envelope>,
    updates: mpsc::UnboundedSender<LiveEvent>,
    status: ConnectionStatus,
    last_session: SessionId,
    session: Option<Session<B>>,
    transcript: TranscriptLog,
    thinking: bool,
    speaking: bool,
    error_message: Option<String>,
}

impl<B: Backend> SessionController<B> {
    /// `events` is the sending half of the queue this controller is fed from;
    /// `updates` receives presentation events.
    pub fn new(
        backend: B,
        settings: SessionSettings,
        events: mpsc::UnboundedSender<Envelope>,
        updates: mpsc::UnboundedSender<LiveEvent>,
    ) -> Self {
        Self {
            backend,
            settings,
            events,
            updates,
            status: ConnectionStatus::Disconnected,
            last_session: 0,
            session: None,
            transcript: TranscriptLog::default(),
            thinking: false,
            speaking: false,
            error_message: None,
        }
    }

    // -- presentation state ------------------------------------------------

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_thinking(&self) -> bool {
        self.thinking
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn transcript(&self) -> &[TranscriptionEntry] {
        self.transcript.entries()
    }

    pub fn session(&self) -> Option<&Session<B>> {
        self.session.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn snapshot(&self) -> LiveEvent {
        LiveEvent::State {
            status: self.status,
            thinking: self.thinking,
            speaking: self.speaking,
            error: self.error_message.clone(),
            entries: self.transcript.entries().to_vec(),
        }
    }

    /// Units currently scheduled or sounding, in start order.
    pub fn active_units(&self) -> Vec<ActivePlaybackUnit> {
        self.session
            .as_ref()
            .map(|s| s.playback.active_units().cloned().collect())
            .unwrap_or_default()
    }

    /// Frequency reading from the microphone tap while capture runs.
    pub fn spectrum(&mut self) -> Option<SpectrumSnapshot> {
        let session = self.session.as_mut()?;
        session
            .capture
            .is_active()
            .then(|| session.capture.spectrum())
    }

    // -- user actions --------------------------------------------------------

    /// Connect when idle, disconnect when connecting or connected.
    pub fn toggle(&mut self) {
        if self.status.is_active() {
            self.disconnect();
        } else {
            self.connect();
        }
    }

    /// Tear down whatever is live and open a new session.
    pub fn connect(&mut self) {
        self.cleanup();

        self.last_session += 1;
        let id = self.last_session;
        self.set_status(ConnectionStatus::Connecting);
        self.set_error(None);

        match self.open_session(id) {
            Ok(session) => {
                info!(session = id, "Session opening");
                self.session = Some(session);
            }
            Err(e) => self.fail(e),
        }
    }

    pub fn disconnect(&mut self) {
        if let Some(id) = self.session.as_ref().map(|s| s.id) {
            info!(session = id, "Disconnect requested");
        }
        self.cleanup();
        self.set_status(ConnectionStatus::Disconnected);
    }

    pub fn clear_transcript(&mut self) {
        self.transcript.clear();
        self.emit(LiveEvent::TranscriptCleared {});
    }

    // -- event routing -------------------------------------------------------

    pub fn handle_event(&mut self, envelope: Envelope) {
        let live = self.session.as_ref().map(|s| s.id);
        if live != Some(envelope.session) {
            trace!(
                session = envelope.session,
                live = ?live,
                "Dropping event from a finished session"
            );
            return;
        }

        match envelope.event {
            SessionEvent::TransportOpened => self.on_open(),
            SessionEvent::ServerMessage(content) => self.on_server_content(content),
            SessionEvent::TransportError(reason) => {
                let err = if self.status == ConnectionStatus::Connecting {
                    SessionError::TransportOpen(reason)
                } else {
                    SessionError::Transport(reason)
                };
                self.fail(err);
            }
            SessionEvent::TransportClosed(reason) => self.on_close(reason),
            SessionEvent::CaptureFrame(samples) => self.on_capture_frame(&samples),
            SessionEvent::PlaybackEnded(unit) => self.on_playback_ended(unit),
        }
    }

    fn on_open(&mut self) {
        if self.status != ConnectionStatus::Connecting {
            warn!(status = %self.status, "Ignoring open outside of connecting state");
            return;
        }
        let greeting = self.settings.greeting.clone();
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let started = session.capture.start().and_then(|()| {
            if greeting.trim().is_empty() {
                Ok(())
            } else {
                session.link.send(ClientMessage::Text(greeting))
            }
        });
        let id = session.id;

        match started {
            Ok(()) => {
                info!(session = id, "Session connected");
                self.set_status(ConnectionStatus::Connected);
            }
            Err(e) => self.fail(e),
        }
    }

    fn on_close(&mut self, reason: Option<String>) {
        if self.status == ConnectionStatus::Connecting {
            let reason = reason.unwrap_or_else(|| "closed before setup completed".into());
            self.fail(SessionError::TransportOpen(reason));
            return;
        }
        info!(reason = ?reason, "Remote closed the session");
        self.cleanup();
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn on_capture_frame(&mut self, samples: &[f32]) {
        if self.status != ConnectionStatus::Connected {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        // Fire-and-forget: a failed send surfaces through the transport's
        // own error or close event.
        if let Err(e) = session.capture.forward_frame(samples, &mut session.link) {
            warn!(session = session.id, error = %e, "Dropped capture frame");
        }
    }

    fn on_playback_ended(&mut self, unit: UnitId) {
        let idle = match self.session.as_mut() {
            Some(session) => session.playback.on_unit_ended(unit),
            None => return,
        };
        if idle {
            self.set_speaking(false);
        }
    }

    fn on_server_content(&mut self, content: ServerContent) {
        if self.status != ConnectionStatus::Connected {
            debug!(status = %self.status, "Ignoring server content before open");
            return;
        }

        if let Some(fragment) = content.input_transcription {
            if let Some(session) = self.session.as_mut() {
                session.turn.push_input(&fragment);
            }
            self.set_thinking(true);
        }

        if let Some(fragment) = content.output_transcription {
            if let Some(session) = self.session.as_mut() {
                session.turn.push_output(&fragment);
            }
            self.set_thinking(false);
        }

        if content.turn_complete {
            let entries = self
                .session
                .as_mut()
                .map(|s| s.turn.complete_turn())
                .unwrap_or_default();
            for entry in entries {
                self.transcript.push(entry.clone());
                self.emit(LiveEvent::Transcript { entry });
            }
            self.set_thinking(false);
        }

        if let Some(payload) = content.audio {
            self.set_speaking(true);
            self.set_thinking(false);
            self.play_chunk(&payload);
        }

        if content.interrupted {
            if let Some(session) = self.session.as_mut() {
                let stopped = session.playback.interrupt();
                info!(session = session.id, stopped, "Response interrupted");
            }
            self.set_speaking(false);
            self.set_thinking(false);
        }
    }

    fn play_chunk(&mut self, payload: &str) {
        let rate = self.settings.output_sample_rate;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let decoded = decode_chunk(payload)
            .and_then(|raw| render_to_audio_buffer(&raw, rate, RESPONSE_CHANNELS));

        match decoded {
            Ok(buffer) if buffer.frames() > 0 => {
                let (unit, start_at) = session.playback.enqueue(buffer);
                trace!(session = session.id, unit, start_at, "Queued response audio");
            }
            Ok(_) => debug!(session = session.id, "Empty audio chunk"),
            Err(e) => {
                let err = SessionError::from(e);
                warn!(session = session.id, error = %err, "Dropping malformed audio chunk");
            }
        }

        if session.playback.is_idle() {
            self.set_speaking(false);
        }
    }

    // -- lifecycle -----------------------------------------------------------

    fn open_session(&mut self, id: SessionId) -> Result<Session<B>, SessionError> {
        let sender = EventSender::new(id, self.events.clone());

        let output = self
            .backend
            .open_output(self.settings.output_sample_rate, sender.clone())?;

        let tap_capacity =
            (self.settings.capture.frame_size * 2).max(self.settings.analyser_fft_size * 8);
        let (tap, tap_reader) = audio_ring_buffer(Some(tap_capacity));
        let device = self
            .backend
            .open_capture(&self.settings.capture, sender.clone(), tap)?;

        // Wrapped before the transport opens so a refusal releases the device.
        let capture = CapturePipeline::new(
            device,
            Analyser::new(tap_reader, self.settings.analyser_fft_size),
            self.settings.capture.sample_rate,
        );

        let link = self.backend.open_transport(&self.settings.setup, sender)?;

        Ok(Session {
            id,
            link,
            capture,
            playback: PlaybackScheduler::new(output),
            turn: TurnTranscripts::default(),
        })
    }

    /// Release the live session, if any, and reset the indicators. Leaves the
    /// status to the caller. Idempotent.
    fn cleanup(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.shutdown();
            debug!(session = session.id, "Session resources released");
        }
        self.set_thinking(false);
        self.set_speaking(false);
    }

    fn fail(&mut self, err: SessionError) {
        error!(kind = err.kind(), error = %err, "Session failed");
        self.cleanup();
        self.set_status(ConnectionStatus::Error);
        self.set_error(Some(err.user_message().to_string()));
    }

    // -- change notification -------------------------------------------------

    fn emit(&self, event: LiveEvent) {
        let _ = self.updates.send(event);
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            self.status = status;
            self.emit(LiveEvent::Status { status });
        }
    }

    fn set_thinking(&mut self, active: bool) {
        if self.thinking != active {
            self.thinking = active;
            self.emit(LiveEvent::Thinking { active });
        }
    }

    fn set_speaking(&mut self, active: bool) {
        if self.speaking != active {
            self.speaking = active;
            self.emit(LiveEvent::Speaking { active });
        }
    }

    fn set_error(&mut self, message: Option<String>) {
        if let Some(message) = &message {
            self.emit(LiveEvent::Error {
                message: message.clone(),
            });
        }
        self.error_message = message;
    }
}

impl<B: Backend> Drop for SessionController<B> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    use super::*;
    use crate::audio::{AudioProducer, CaptureSettings};
    use crate::codec::AudioBuffer;
    use crate::session::capture::tests::{DeviceLog, FakeDevice, RecordingLink};
    use crate::session::playback::tests::ManualOutput;
    use crate::session::playback::PlaybackOutput;
    use crate::session::Role;
    use crate::transport::SessionSetup;

    struct SharedOutput(Rc<RefCell<ManualOutput>>);

    impl PlaybackOutput for SharedOutput {
        fn current_time(&self) -> f64 {
            self.0.borrow().current_time()
        }

        fn schedule(&mut self, unit: UnitId, buffer: &AudioBuffer, start_at: f64) {
            self.0.borrow_mut().schedule(unit, buffer, start_at);
        }

        fn stop(&mut self, unit: UnitId) {
            self.0.borrow_mut().stop(unit);
        }
    }

    struct SharedLink(Rc<RefCell<RecordingLink>>);

    impl TransportLink for SharedLink {
        fn send(&mut self, message: ClientMessage) -> Result<(), SessionError> {
            self.0.borrow_mut().send(message)
        }

        fn close(&mut self) {
            self.0.borrow_mut().close();
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        outputs: Vec<Rc<RefCell<ManualOutput>>>,
        output_rates: Vec<u32>,
        links: Vec<Rc<RefCell<RecordingLink>>>,
        devices: Vec<Rc<RefCell<DeviceLog>>>,
        deny_microphone: bool,
        fail_capture_start: bool,
        fail_transport: bool,
    }

    impl Backend for FakeBackend {
        type Output = SharedOutput;
        type Capture = FakeDevice;
        type Link = SharedLink;

        fn open_output(
            &mut self,
            sample_rate: u32,
            _events: EventSender,
        ) -> Result<SharedOutput, SessionError> {
            self.output_rates.push(sample_rate);
            let out = Rc::new(RefCell::new(ManualOutput::default()));
            self.outputs.push(Rc::clone(&out));
            Ok(SharedOutput(out))
        }

        fn open_capture(
            &mut self,
            _settings: &CaptureSettings,
            _events: EventSender,
            _tap: AudioProducer,
        ) -> Result<FakeDevice, SessionError> {
            if self.deny_microphone {
                return Err(SessionError::Permission("denied".into()));
            }
            let log = Rc::new(RefCell::new(DeviceLog::default()));
            self.devices.push(Rc::clone(&log));
            Ok(FakeDevice {
                log,
                fail_start: self.fail_capture_start,
            })
        }

        fn open_transport(
            &mut self,
            _setup: &SessionSetup,
            _events: EventSender,
        ) -> Result<SharedLink, SessionError> {
            if self.fail_transport {
                return Err(SessionError::TransportOpen("refused".into()));
            }
            let link = Rc::new(RefCell::new(RecordingLink::default()));
            self.links.push(Rc::clone(&link));
            Ok(SharedLink(link))
        }
    }

    struct Harness {
        ctl: SessionController<FakeBackend>,
        updates: mpsc::UnboundedReceiver<LiveEvent>,
        _events: mpsc::UnboundedReceiver<Envelope>,
    }

    impl Harness {
        fn new(backend: FakeBackend) -> Self {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let (updates_tx, updates_rx) = mpsc::unbounded_channel();
            let settings = SessionSettings {
                setup: SessionSetup {
                    model: "test-model".into(),
                    voice_name: "Kore".into(),
                    system_instruction: "be brief".into(),
                    transcribe_input: true,
                    transcribe_output: true,
                },
                greeting: "Say hello.".into(),
                capture: CaptureSettings::default(),
                output_sample_rate: 24_000,
                analyser_fft_size: 512,
            };
            Self {
                ctl: SessionController::new(backend, settings, events_tx, updates_tx),
                updates: updates_rx,
                _events: events_rx,
            }
        }

        fn id(&self) -> SessionId {
            self.ctl.session().map(|s| s.id()).unwrap_or(0)
        }

        fn send(&mut self, session: SessionId, event: SessionEvent) {
            self.ctl.handle_event(Envelope { session, event });
        }

        fn current(&mut self, event: SessionEvent) {
            let id = self.id();
            self.send(id, event);
        }

        fn server(&mut self, content: ServerContent) {
            self.current(SessionEvent::ServerMessage(content));
        }

        fn connected() -> Self {
            let mut h = Self::new(FakeBackend::default());
            h.ctl.connect();
            h.current(SessionEvent::TransportOpened);
            assert_eq!(h.ctl.status(), ConnectionStatus::Connected);
            h.drain();
            h
        }

        fn link(&self) -> Rc<RefCell<RecordingLink>> {
            Rc::clone(self.ctl.backend().links.last().unwrap())
        }

        fn output(&self) -> Rc<RefCell<ManualOutput>> {
            Rc::clone(self.ctl.backend().outputs.last().unwrap())
        }

        fn device(&self) -> Rc<RefCell<DeviceLog>> {
            Rc::clone(self.ctl.backend().devices.last().unwrap())
        }

        fn drain(&mut self) -> Vec<LiveEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.updates.try_recv() {
                out.push(event);
            }
            out
        }
    }

    /// Base64 of `secs` of mono 24 kHz silence.
    fn audio(secs: f64) -> String {
        let frames = (secs * 24_000.0).round() as usize;
        BASE64.encode(vec![0u8; frames * 2])
    }

    fn audio_content(secs: f64) -> ServerContent {
        ServerContent {
            audio: Some(audio(secs)),
            ..Default::default()
        }
    }

    const EPS: f64 = 1e-9;

    #[test]
    fn connect_then_open_reaches_connected() {
        let mut h = Harness::new(FakeBackend::default());
        h.ctl.connect();
        assert_eq!(h.ctl.status(), ConnectionStatus::Connecting);
        assert_eq!(h.device().borrow().starts, 0, "capture waits for open");

        h.current(SessionEvent::TransportOpened);
        assert_eq!(h.ctl.status(), ConnectionStatus::Connected);
        assert_eq!(h.device().borrow().starts, 1);
        assert!(h.ctl.error_message().is_none());

        let statuses: Vec<_> = h
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                LiveEvent::Status { status } => Some(status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
        );
    }

    #[test]
    fn greeting_is_first_outbound_message() {
        let mut h = Harness::connected();
        h.current(SessionEvent::CaptureFrame(vec![0.1; 16]));
        h.current(SessionEvent::CaptureFrame(vec![0.2; 16]));

        let link = h.link();
        let link = link.borrow();
        let sent = &link.sent;
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], ClientMessage::Text("Say hello.".into()));
        assert!(matches!(sent[1], ClientMessage::Media(_)));
        assert!(matches!(sent[2], ClientMessage::Media(_)));
    }

    #[test]
    fn frames_before_open_are_not_sent() {
        let mut h = Harness::new(FakeBackend::default());
        h.ctl.connect();
        h.current(SessionEvent::CaptureFrame(vec![0.1; 16]));
        assert!(h.link().borrow().sent.is_empty());
    }

    #[test]
    fn turn_complete_flushes_both_sides() {
        let mut h = Harness::connected();
        h.server(ServerContent {
            input_transcription: Some("what time ".into()),
            ..Default::default()
        });
        assert!(h.ctl.is_thinking());
        h.server(ServerContent {
            input_transcription: Some("is it".into()),
            ..Default::default()
        });
        h.server(ServerContent {
            output_transcription: Some("It is noon.".into()),
            ..Default::default()
        });
        assert!(!h.ctl.is_thinking());
        h.server(ServerContent {
            turn_complete: true,
            ..Default::default()
        });

        let log = h.ctl.transcript();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].role, Role::User);
        assert_eq!(log[0].text, "what time is it");
        assert_eq!(log[1].role, Role::Assistant);
        assert_eq!(log[1].text, "It is noon.");

        let emitted = h
            .drain()
            .into_iter()
            .filter(|e| matches!(e, LiveEvent::Transcript { .. }))
            .count();
        assert_eq!(emitted, 2);

        let turn = h.ctl.session().unwrap().turn();
        assert!(turn.input().is_empty());
        assert!(turn.output().is_empty());
    }

    #[test]
    fn turn_complete_with_one_or_no_side() {
        let mut h = Harness::connected();
        h.server(ServerContent {
            output_transcription: Some("hi".into()),
            turn_complete: true,
            ..Default::default()
        });
        assert_eq!(h.ctl.transcript().len(), 1);
        assert_eq!(h.ctl.transcript()[0].role, Role::Assistant);

        h.server(ServerContent {
            turn_complete: true,
            ..Default::default()
        });
        assert_eq!(h.ctl.transcript().len(), 1);
    }

    #[test]
    fn response_audio_is_gapless() {
        let mut h = Harness::connected();
        h.output().borrow_mut().now = 1.0;
        h.server(audio_content(0.5));
        h.output().borrow_mut().now = 1.1;
        h.server(audio_content(0.25));
        assert!(h.ctl.is_speaking());

        let out = h.output();
        let out = out.borrow();
        let scheduled = &out.scheduled;
        assert!((scheduled[0].1 - 1.0).abs() < EPS);
        assert!((scheduled[1].1 - 1.5).abs() < EPS);
        assert_eq!(h.ctl.active_units().len(), 2);
    }

    #[test]
    fn response_audio_matches_output_rate() {
        let mut h = Harness::connected();
        h.server(audio_content(0.1));
        assert_eq!(h.ctl.backend().output_rates, vec![24_000]);
        assert_eq!(h.output().borrow().rates, vec![24_000]);
    }

    #[test]
    fn speaking_clears_when_last_unit_ends() {
        let mut h = Harness::connected();
        h.server(audio_content(0.1));
        h.server(audio_content(0.1));
        let ids: Vec<UnitId> = h.ctl.active_units().iter().map(|u| u.id).collect();

        h.current(SessionEvent::PlaybackEnded(ids[0]));
        assert!(h.ctl.is_speaking());
        h.current(SessionEvent::PlaybackEnded(ids[1]));
        assert!(!h.ctl.is_speaking());
    }

    #[test]
    fn interruption_stops_everything_and_rewinds() {
        let mut h = Harness::connected();
        for _ in 0..3 {
            h.server(audio_content(1.0));
        }
        h.server(ServerContent {
            interrupted: true,
            ..Default::default()
        });

        assert!(!h.ctl.is_speaking());
        assert!(!h.ctl.is_thinking());
        assert!(h.ctl.active_units().is_empty());
        assert_eq!(h.output().borrow().stopped.len(), 3);
        let playback = h.ctl.session().unwrap().playback();
        assert_eq!(playback.next_playback_time(), 0.0);

        h.output().borrow_mut().now = 0.4;
        h.server(audio_content(0.2));
        let out = h.output();
        let last = out.borrow().scheduled.last().copied().unwrap();
        assert!((last.1 - 0.4).abs() < EPS);
    }

    #[test]
    fn malformed_chunk_is_dropped() {
        let mut h = Harness::connected();
        h.server(ServerContent {
            audio: Some("AAAA".into()),
            ..Default::default()
        });
        assert_eq!(h.ctl.status(), ConnectionStatus::Connected);
        assert!(!h.ctl.is_speaking());
        assert!(h.ctl.active_units().is_empty());

        h.server(audio_content(0.1));
        assert_eq!(h.ctl.active_units().len(), 1);
    }

    #[test]
    fn events_from_old_sessions_are_ignored() {
        let mut h = Harness::connected();
        let old = h.id();
        h.ctl.connect();
        let new = h.id();
        assert_ne!(old, new);

        h.send(old, SessionEvent::TransportOpened);
        assert_eq!(h.ctl.status(), ConnectionStatus::Connecting);
        h.send(old, SessionEvent::ServerMessage(audio_content(0.5)));
        h.send(old, SessionEvent::TransportError("late".into()));
        assert_eq!(h.ctl.status(), ConnectionStatus::Connecting);
        assert!(h.ctl.active_units().is_empty());
    }

    #[test]
    fn reconnect_tears_down_previous_session() {
        let mut h = Harness::connected();
        h.server(audio_content(1.0));
        let first_link = h.link();
        let first_device = h.device();
        let first_output = h.output();

        h.ctl.connect();
        assert_eq!(first_link.borrow().closed, 1);
        assert_eq!(first_device.borrow().stops, 1);
        assert_eq!(first_output.borrow().stopped.len(), 1);
        assert!(h.ctl.active_units().is_empty());
        assert!(!h.ctl.is_speaking());
        assert_eq!(h.ctl.backend().links.len(), 2);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut h = Harness::new(FakeBackend::default());
        h.ctl.disconnect();
        assert_eq!(h.ctl.status(), ConnectionStatus::Disconnected);

        h.ctl.connect();
        h.current(SessionEvent::TransportOpened);
        h.ctl.disconnect();
        h.ctl.disconnect();
        assert_eq!(h.ctl.status(), ConnectionStatus::Disconnected);
        assert_eq!(h.link().borrow().closed, 1);
        assert_eq!(h.device().borrow().stops, 1);
        assert!(h.ctl.session().is_none());
    }

    #[test]
    fn microphone_denied_is_an_audio_error() {
        let mut h = Harness::new(FakeBackend {
            deny_microphone: true,
            ..Default::default()
        });
        h.ctl.connect();
        assert_eq!(h.ctl.status(), ConnectionStatus::Error);
        assert_eq!(h.ctl.error_message(), Some("Audio Interface Error."));
        assert!(h.ctl.session().is_none());
        assert!(h
            .drain()
            .iter()
            .any(|e| matches!(e, LiveEvent::Error { message } if message == "Audio Interface Error.")));
    }

    #[test]
    fn capture_start_failure_after_open() {
        let mut h = Harness::new(FakeBackend {
            fail_capture_start: true,
            ..Default::default()
        });
        h.ctl.connect();
        h.current(SessionEvent::TransportOpened);
        assert_eq!(h.ctl.status(), ConnectionStatus::Error);
        assert_eq!(h.ctl.error_message(), Some("Audio Interface Error."));
        assert_eq!(h.link().borrow().closed, 1);
    }

    #[test]
    fn transport_refused_at_open() {
        let mut h = Harness::new(FakeBackend {
            fail_transport: true,
            ..Default::default()
        });
        h.ctl.connect();
        assert_eq!(h.ctl.status(), ConnectionStatus::Error);
        assert_eq!(h.ctl.error_message(), Some("Connection failed."));
        assert_eq!(h.device().borrow().stops, 1, "microphone released");
    }

    #[test]
    fn mid_session_error_is_sync_interrupted() {
        let mut h = Harness::connected();
        h.server(audio_content(1.0));
        h.current(SessionEvent::TransportError("reset by peer".into()));
        assert_eq!(h.ctl.status(), ConnectionStatus::Error);
        assert_eq!(h.ctl.error_message(), Some("Sync Interrupted."));
        assert!(!h.ctl.is_speaking());
        assert_eq!(h.device().borrow().stops, 1);
    }

    #[test]
    fn close_while_connecting_is_an_open_failure() {
        let mut h = Harness::new(FakeBackend::default());
        h.ctl.connect();
        h.current(SessionEvent::TransportClosed(Some("bad key".into())));
        assert_eq!(h.ctl.status(), ConnectionStatus::Error);
        assert_eq!(h.ctl.error_message(), Some("Connection failed."));
    }

    #[test]
    fn remote_close_disconnects() {
        let mut h = Harness::connected();
        h.current(SessionEvent::TransportClosed(None));
        assert_eq!(h.ctl.status(), ConnectionStatus::Disconnected);
        assert!(h.ctl.error_message().is_none());
        assert!(h.ctl.session().is_none());
    }

    #[test]
    fn reconnect_clears_previous_error() {
        let mut h = Harness::connected();
        h.current(SessionEvent::TransportError("boom".into()));
        assert!(h.ctl.error_message().is_some());
        h.ctl.connect();
        assert!(h.ctl.error_message().is_none());
        assert_eq!(h.ctl.status(), ConnectionStatus::Connecting);
    }

    #[test]
    fn toggle_flips_between_idle_and_live() {
        let mut h = Harness::new(FakeBackend::default());
        h.ctl.toggle();
        assert_eq!(h.ctl.status(), ConnectionStatus::Connecting);
        h.ctl.toggle();
        assert_eq!(h.ctl.status(), ConnectionStatus::Disconnected);

        h.current(SessionEvent::TransportOpened);
        assert_eq!(h.ctl.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn clear_transcript_survives_sessions() {
        let mut h = Harness::connected();
        h.server(ServerContent {
            input_transcription: Some("hello".into()),
            turn_complete: true,
            ..Default::default()
        });
        h.ctl.disconnect();
        assert_eq!(h.ctl.transcript().len(), 1);

        h.drain();
        h.ctl.clear_transcript();
        assert!(h.ctl.transcript().is_empty());
        assert!(matches!(h.drain().as_slice(), [LiveEvent::TranscriptCleared {}]));
    }

    #[test]
    fn spectrum_only_while_capturing() {
        let mut h = Harness::new(FakeBackend::default());
        assert!(h.ctl.spectrum().is_none());
        h.ctl.connect();
        assert!(h.ctl.spectrum().is_none());
        h.current(SessionEvent::TransportOpened);
        assert_eq!(h.ctl.spectrum().map(|s| s.bins.len()), Some(256));
    }

    #[test]
    fn snapshot_reflects_state() {
        let h = Harness::connected();
        match h.ctl.snapshot() {
            LiveEvent::State {
                status, speaking, ..
            } => {
                assert_eq!(status, ConnectionStatus::Connected);
                assert!(!speaking);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
