//! Voice session state machine
//!
//! Every input (caller command, socket event, capture frame, VAD edge,
//! encoder output, timer expiry, sink acknowledgement) is a `SessionEvent`
//! handled to completion by `SessionController::handle`. The controller owns
//! the collaborators through traits, so the whole machine runs the same way
//! against tokio-backed adapters and against test fakes.

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::conversation::{ChatMessage, Conversation};
use super::stats::{SessionStats, SpeechState};
use super::timers::{Scheduler, TimerHandle};
use crate::audio::{
    AudioFrame, ChunkEncoder, CompletedUtterance, DeviceError, Disposition, EncoderOutput,
    EnergyVad, StreamFormat, UtteranceRecorder, VadEdge,
};
use crate::channel::{ChannelError, ConnectionState, SocketChannel, Transport, TransportEvent};
use crate::playback::{PlaybackReassembler, SinkFactory, StreamId};
use crate::protocol::{encode_frame, InboundEvent};

/// Capture device (microphone) access
///
/// `acquire` is a suspension point: the outcome arrives later as
/// `DeviceAcquired`/`DeviceDenied`, followed by `CaptureFrame`s tagged with
/// the same attempt number.
pub trait CaptureDevice: Send {
    fn acquire(&mut self, attempt: u64);
    fn release(&mut self, attempt: u64);
}

/// Receives everything the caller should see
pub trait SessionObserver: Send {
    fn notify(&mut self, notification: Notification);
}

/// Caller-facing signals
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Connection(ConnectionState),
    /// Voice mode (capture + VAD) switched on or off
    VoiceMode(bool),
    /// A non-empty transcript of the user's utterance
    Transcript(ChatMessage),
    /// The pending-reply placeholder was removed without a new message
    PlaceholderCleared,
    /// Assistant reply text
    ResponseText(ChatMessage),
    ResponseLoading(bool),
    UtteranceSent { utterance: u64, bytes: usize },
    /// Peer-reported error; the connection stays open
    Warning(String),
    /// Fatal error of the session attempt
    Error(String),
}

/// Input of the state machine
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Open the socket, optionally for another session id; voice starts once connected
    Connect { session_id: Option<String> },
    StartVoice,
    StopVoice,
    Disconnect,
    /// Final teardown; same path as `Disconnect`
    Dispose,

    Transport(TransportEvent),

    DeviceAcquired { attempt: u64, format: StreamFormat },
    DeviceDenied { attempt: u64, reason: String },
    /// The held device stopped delivering frames
    DeviceLost { attempt: u64, reason: String },
    CaptureFrame { attempt: u64, frame: AudioFrame },

    Vad(VadEdge),
    Encoder(EncoderOutput),
    TimerFired(TimerHandle),
    SinkAppended(StreamId),
}

/// Collaborators injected into a controller
pub struct Collaborators {
    pub scheduler: Box<dyn Scheduler>,
    pub transport: Box<dyn Transport>,
    pub capture: Box<dyn CaptureDevice>,
    pub encoder: Box<dyn ChunkEncoder>,
    pub sinks: Box<dyn SinkFactory>,
    pub observer: Box<dyn SessionObserver>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceState {
    Released,
    Acquiring(u64),
    Held(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Voice mode off, socket stays open
    Voice,
    /// Everything, including the socket
    Session,
}

#[derive(Debug, Default)]
struct Counters {
    sent: usize,
    discarded: usize,
    rejected: usize,
}

pub struct SessionController {
    config: SessionConfig,
    scheduler: Box<dyn Scheduler>,
    channel: SocketChannel,
    capture: Box<dyn CaptureDevice>,
    recorder: UtteranceRecorder,
    playback: PlaybackReassembler,
    observer: Box<dyn SessionObserver>,
    conversation: Conversation,

    vad: Option<EnergyVad>,
    speech: SpeechState,
    /// Set only by a genuine `speaking` edge that found the recorder busy stopping
    resume_requested: bool,
    device: DeviceState,
    next_attempt: u64,
    voice_active: bool,
    start_voice_on_connect: bool,

    flush_timer: Option<TimerHandle>,
    auto_stop_timer: Option<TimerHandle>,

    counters: Counters,
    started_at: chrono::DateTime<Utc>,
}

impl SessionController {
    pub fn new(config: SessionConfig, parts: Collaborators) -> Self {
        info!("Creating voice session: {}", config.session_id);
        let conversation = Conversation::new(config.duplicate_window);

        Self {
            config,
            scheduler: parts.scheduler,
            channel: SocketChannel::new(parts.transport),
            capture: parts.capture,
            recorder: UtteranceRecorder::new(parts.encoder),
            playback: PlaybackReassembler::new(parts.sinks),
            observer: parts.observer,
            conversation,
            vad: None,
            speech: SpeechState::Silent,
            resume_requested: false,
            device: DeviceState::Released,
            next_attempt: 0,
            voice_active: false,
            start_voice_on_connect: false,
            flush_timer: None,
            auto_stop_timer: None,
            counters: Counters::default(),
            started_at: Utc::now(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn voice_active(&self) -> bool {
        self.voice_active
    }

    pub fn speech_state(&self) -> SpeechState {
        self.speech
    }

    pub fn flush_armed(&self) -> bool {
        self.flush_timer.is_some()
    }

    pub fn auto_stop_armed(&self) -> bool {
        self.auto_stop_timer.is_some()
    }

    pub fn device_held(&self) -> bool {
        self.device != DeviceState::Released
    }

    pub fn playback_open(&self) -> bool {
        self.playback.is_open()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.conversation.messages()
    }

    pub fn stats(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.started_at);
        SessionStats {
            session_id: self.config.session_id.clone(),
            connection: self.channel.state(),
            voice_active: self.voice_active,
            speech: self.speech,
            utterances_sent: self.counters.sent,
            utterances_discarded: self.counters.discarded,
            frames_rejected: self.counters.rejected,
            responses_played: self.playback.completed(),
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        }
    }

    /// Handle one event to completion
    pub fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connect { session_id } => self.connect(session_id),
            SessionEvent::StartVoice => self.start_voice(),
            SessionEvent::StopVoice => {
                info!("Stopping voice mode");
                self.teardown(Teardown::Voice);
            }
            SessionEvent::Disconnect | SessionEvent::Dispose => {
                info!("Disconnecting voice session {}", self.config.session_id);
                self.teardown(Teardown::Session);
            }

            SessionEvent::Transport(event) => self.on_transport(event),

            SessionEvent::DeviceAcquired { attempt, format } => {
                self.on_device_acquired(attempt, format)
            }
            SessionEvent::DeviceDenied { attempt, reason } => self.on_device_denied(attempt, reason),
            SessionEvent::DeviceLost { attempt, reason } => self.on_device_lost(attempt, reason),
            SessionEvent::CaptureFrame { attempt, frame } => self.on_frame(attempt, &frame),

            SessionEvent::Vad(edge) => self.on_vad(edge),
            SessionEvent::Encoder(output) => self.on_encoder(output),
            SessionEvent::TimerFired(handle) => self.on_timer(handle),
            SessionEvent::SinkAppended(stream) => self.playback.on_append_complete(stream),
        }
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    fn connect(&mut self, session_id: Option<String>) {
        let mut config = self.config.clone();
        if let Some(id) = session_id {
            config.session_id = id;
        }

        let Some(url) = config.connection_url() else {
            let err = ChannelError::MissingApiKey;
            error!("Cannot connect voice session: {}", err);
            self.observer.notify(Notification::Error(err.to_string()));
            return;
        };

        if self.channel.is_active_for(&url) {
            info!("Socket already {:?} for this session", self.channel.state());
            return;
        }

        if self.channel.state() != ConnectionState::Disconnected {
            info!("Closing existing connection for new session");
            self.teardown(Teardown::Session);
        }

        self.config = config;
        self.start_voice_on_connect = true;
        if self.channel.connect(&url) {
            self.observer
                .notify(Notification::Connection(ConnectionState::Connecting));
        }
    }

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened(id) => {
                if self.channel.on_open(id) {
                    self.observer
                        .notify(Notification::Connection(ConnectionState::Connected));
                    if self.start_voice_on_connect {
                        self.start_voice();
                    }
                }
            }
            TransportEvent::Closed { id, reason } => {
                if self.channel.on_closed(id, reason.as_deref()) {
                    self.observer
                        .notify(Notification::Connection(ConnectionState::Disconnected));
                    self.teardown(Teardown::Session);
                }
            }
            TransportEvent::Message(id, raw) => {
                if let Some(event) = self.channel.demux(id, raw) {
                    self.on_inbound(event);
                }
            }
        }
    }

    fn on_inbound(&mut self, event: InboundEvent) {
        let now = self.scheduler.now();
        match event {
            InboundEvent::Transcript { text } if text.trim().is_empty() => {
                if self.conversation.clear_placeholder() {
                    self.observer.notify(Notification::PlaceholderCleared);
                }
            }
            InboundEvent::Transcript { text } => {
                info!("Transcript received: {}", text);
                let message = self.conversation.push_user(&text, now);
                self.observer.notify(Notification::Transcript(message));
                self.observer.notify(Notification::ResponseLoading(true));
            }
            InboundEvent::ResponseText { text } => {
                debug!("Response text received ({} chars)", text.len());
                let had_placeholder = self.conversation.has_placeholder();
                match self.conversation.push_assistant(&text, now) {
                    Some(message) => self.observer.notify(Notification::ResponseText(message)),
                    None => {
                        debug!("Duplicate response skipped");
                        if had_placeholder {
                            self.observer.notify(Notification::PlaceholderCleared);
                        }
                    }
                }
                self.observer.notify(Notification::ResponseLoading(false));
            }
            InboundEvent::AudioStart => self.playback.on_audio_start(),
            InboundEvent::AudioChunk { bytes } => self.playback.on_chunk(bytes),
            InboundEvent::AudioEnd => self.playback.on_audio_end(),
            InboundEvent::Error { message } => {
                warn!("Voice service reported an error: {}", message);
                self.observer.notify(Notification::Warning(message));
            }
        }
    }

    // ------------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------------

    fn start_voice(&mut self) {
        match self.channel.state() {
            ConnectionState::Connected => self.start_voice_on_connect = false,
            ConnectionState::Connecting => {
                info!("Voice mode will start once connected");
                self.start_voice_on_connect = true;
                return;
            }
            ConnectionState::Disconnected => {
                info!("Cannot start recording: socket not connected");
                self.start_voice_on_connect = false;
                return;
            }
        }
        if self.device != DeviceState::Released {
            debug!("Voice mode already starting or running");
            return;
        }

        let attempt = self.next_attempt;
        self.next_attempt += 1;
        self.device = DeviceState::Acquiring(attempt);
        info!("Requesting capture device (attempt {})", attempt);
        self.capture.acquire(attempt);
    }

    fn on_device_acquired(&mut self, attempt: u64, format: StreamFormat) {
        if self.device != DeviceState::Acquiring(attempt) {
            debug!("Releasing capture device from stale attempt {}", attempt);
            self.capture.release(attempt);
            return;
        }

        info!(
            "Capture device granted: {}Hz, {} channel(s)",
            format.sample_rate, format.channels
        );
        self.device = DeviceState::Held(attempt);
        self.recorder.bind(format);
        self.vad = Some(EnergyVad::new(self.config.vad.clone()));
        self.speech = SpeechState::Silent;
        self.resume_requested = false;

        if self.recorder.is_idle() {
            if let Err(e) = self.recorder.start() {
                error!("Failed to start recorder: {:#}", e);
                self.observer.notify(Notification::Error(format!("{:#}", e)));
                self.teardown(Teardown::Session);
                return;
            }
        } else {
            // A stop from the previous voice run has not completed yet
            self.resume_requested = true;
        }

        self.voice_active = true;
        self.observer.notify(Notification::VoiceMode(true));
    }

    fn on_device_denied(&mut self, attempt: u64, reason: String) {
        if self.device != DeviceState::Acquiring(attempt) {
            debug!("Ignoring denial of stale attempt {}", attempt);
            return;
        }

        let err = DeviceError::Denied(reason);
        error!("{}", err);
        self.device = DeviceState::Released;
        self.observer.notify(Notification::Error(err.to_string()));
        self.teardown(Teardown::Session);
    }

    fn on_device_lost(&mut self, attempt: u64, reason: String) {
        if self.device != DeviceState::Held(attempt) {
            debug!("Ignoring loss of stale attempt {}", attempt);
            return;
        }

        let err = DeviceError::Lost(reason);
        error!("{}", err);
        self.observer.notify(Notification::Error(err.to_string()));
        self.teardown(Teardown::Session);
    }

    fn on_frame(&mut self, attempt: u64, frame: &AudioFrame) {
        if self.device != DeviceState::Held(attempt) {
            return;
        }

        self.recorder.push(frame);

        let edges = match self.vad.as_mut() {
            Some(vad) => vad.process(frame),
            None => return,
        };
        for edge in edges {
            self.on_vad(edge);
        }
    }

    // ------------------------------------------------------------------
    // Speech / timers
    // ------------------------------------------------------------------

    fn on_vad(&mut self, edge: VadEdge) {
        if !self.voice_active {
            debug!("Ignoring {:?} while voice mode is off", edge);
            return;
        }

        match edge {
            VadEdge::Speaking => {
                info!("Started speaking");
                self.speech = SpeechState::Speaking;
                self.cancel_timers();

                if self.recorder.is_idle() {
                    self.start_recorder();
                } else if self.recorder.is_stopping() {
                    self.resume_requested = true;
                }
            }
            VadEdge::StoppedSpeaking => {
                info!(
                    "Stopped speaking, flushing in {}ms",
                    self.config.silence_flush.as_millis()
                );
                self.speech = SpeechState::Silent;
                self.cancel_timers();
                self.flush_timer = Some(self.scheduler.after(self.config.silence_flush));
                self.auto_stop_timer = Some(self.scheduler.after(self.config.auto_stop));
            }
        }
    }

    fn on_timer(&mut self, handle: TimerHandle) {
        if self.flush_timer == Some(handle) {
            self.flush_timer = None;
            if !self.recorder.stop(Disposition::Send) {
                debug!("Silence flush with no utterance recording");
            }
        } else if self.auto_stop_timer == Some(handle) {
            self.auto_stop_timer = None;
            info!(
                "Silence lasted {}s, auto-stopping voice mode",
                self.config.auto_stop.as_secs()
            );
            self.teardown(Teardown::Voice);
        } else {
            debug!("Ignoring stale timer {:?}", handle);
        }
    }

    fn cancel_timers(&mut self) {
        if let Some(handle) = self.flush_timer.take() {
            self.scheduler.cancel(handle);
        }
        if let Some(handle) = self.auto_stop_timer.take() {
            self.scheduler.cancel(handle);
        }
    }

    // ------------------------------------------------------------------
    // Recorder / upload
    // ------------------------------------------------------------------

    fn start_recorder(&mut self) {
        if !self.recorder.is_bound() {
            return;
        }
        match self.recorder.start() {
            Ok(utterance) => debug!("Recording utterance {}", utterance),
            Err(e) => warn!("Recorder did not start: {:#}", e),
        }
    }

    fn on_encoder(&mut self, output: EncoderOutput) {
        match output {
            EncoderOutput::Data(bytes) => self.recorder.on_data(bytes),
            EncoderOutput::Stopped => {
                if let Some(done) = self.recorder.on_stopped() {
                    self.dispatch(done);
                }

                let resume = self.speech == SpeechState::Speaking || self.resume_requested;
                if self.voice_active && self.recorder.is_idle() && resume {
                    self.resume_requested = false;
                    self.start_recorder();
                    info!("Recorder restarted for resumed speech");
                }
            }
        }
    }

    fn dispatch(&mut self, utterance: CompletedUtterance) {
        if utterance.disposition == Disposition::Discard || utterance.bytes.is_empty() {
            debug!(
                "Discarded utterance {} ({:?}, {} bytes)",
                utterance.id,
                utterance.disposition,
                utterance.bytes.len()
            );
            self.counters.discarded += 1;
            return;
        }

        let metadata = self.config.upload_metadata(self.recorder.codec_label());
        let frame = match encode_frame(&metadata, &utterance.bytes) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to frame utterance {}: {}", utterance.id, e);
                self.counters.discarded += 1;
                return;
            }
        };

        match self.channel.send(frame) {
            Ok(()) => {
                info!(
                    "Sent utterance {} ({} audio bytes)",
                    utterance.id,
                    utterance.bytes.len()
                );
                self.counters.sent += 1;
                self.observer.notify(Notification::UtteranceSent {
                    utterance: utterance.id,
                    bytes: utterance.bytes.len(),
                });
            }
            Err(e) => {
                warn!("Utterance {} not sent: {}", utterance.id, e);
                self.counters.rejected += 1;
            }
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Single idempotent cleanup path for stop, auto-stop, connection loss and disposal
    fn teardown(&mut self, scope: Teardown) {
        self.cancel_timers();
        self.vad = None;
        self.speech = SpeechState::Silent;
        self.resume_requested = false;
        self.start_voice_on_connect = false;

        self.recorder.stop(Disposition::Discard);
        self.recorder.unbind();

        match self.device {
            DeviceState::Acquiring(attempt) | DeviceState::Held(attempt) => {
                info!("Releasing capture device (attempt {})", attempt);
                self.capture.release(attempt);
            }
            DeviceState::Released => {}
        }
        self.device = DeviceState::Released;

        if self.voice_active {
            self.voice_active = false;
            self.observer.notify(Notification::VoiceMode(false));
        }

        if scope == Teardown::Session {
            self.playback.abandon();

            if self.channel.close() {
                self.observer
                    .notify(Notification::Connection(ConnectionState::Disconnected));
            }

            let was_loading = self.conversation.response_loading();
            if self.conversation.clear_placeholders() > 0 {
                self.observer.notify(Notification::PlaceholderCleared);
            }
            if was_loading {
                self.observer.notify(Notification::ResponseLoading(false));
            }
        }
    }
}
