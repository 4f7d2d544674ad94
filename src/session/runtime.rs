use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::controller::{
    CaptureDevice, Collaborators, Notification, SessionController, SessionEvent, SessionObserver,
};
use super::conversation::ChatMessage;
use super::stats::SessionStats;
use super::timers::TokioScheduler;
use crate::audio::{AudioBackendConfig, AudioBackendFactory, AudioSource, WavChunkEncoder};
use crate::channel::WsTransport;
use crate::playback::FileSinkFactory;

/// Runtime adapters for a voice session
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Where captured audio comes from
    pub source: AudioSource,
    pub backend: AudioBackendConfig,
    /// Codec label sent as `audio_format`
    pub codec_label: String,
    /// Directory receiving response audio files
    pub playback_dir: PathBuf,
    pub playback_extension: String,
    /// Capacity of the notification broadcast channel
    pub notification_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            source: AudioSource::Microphone,
            backend: AudioBackendConfig::default(),
            codec_label: "audio/wav".to_string(),
            playback_dir: PathBuf::from("./responses"),
            playback_extension: "mp3".to_string(),
            notification_capacity: 256,
        }
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub stats: SessionStats,
    pub messages: Vec<ChatMessage>,
}

enum LoopMessage {
    Event(SessionEvent),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

type LoopSender = mpsc::UnboundedSender<LoopMessage>;

fn post(tx: &LoopSender, event: SessionEvent) {
    if tx.send(LoopMessage::Event(event)).is_err() {
        debug!("Session loop gone, event dropped");
    }
}

/// A voice session driven by a single tokio task
pub struct VoiceSession;

impl VoiceSession {
    /// Build the adapters, start the event loop and return a handle to it
    pub fn spawn(config: SessionConfig, options: RuntimeOptions) -> Result<VoiceSessionHandle> {
        let session_id = config.session_id.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(options.notification_capacity.max(1));

        let timer_tx = tx.clone();
        let scheduler = TokioScheduler::new(Arc::new(move |handle| {
            post(&timer_tx, SessionEvent::TimerFired(handle))
        }));

        let transport_tx = tx.clone();
        let transport =
            WsTransport::new(Arc::new(move |event| post(&transport_tx, SessionEvent::Transport(event))));

        let encoder_tx = tx.clone();
        let encoder = WavChunkEncoder::new(
            options.codec_label.clone(),
            Box::new(move |output| post(&encoder_tx, SessionEvent::Encoder(output))),
        );

        let sink_tx = tx.clone();
        let sinks = FileSinkFactory::new(
            &options.playback_dir,
            session_id.clone(),
            options.playback_extension.clone(),
            Arc::new(move |stream| post(&sink_tx, SessionEvent::SinkAppended(stream))),
        )
        .context("Failed to prepare playback output")?;

        let capture = BackendCapture::new(options.source.clone(), options.backend.clone(), tx.clone());

        let controller = SessionController::new(
            config,
            Collaborators {
                scheduler: Box::new(scheduler),
                transport: Box::new(transport),
                capture: Box::new(capture),
                encoder: Box::new(encoder),
                sinks: Box::new(sinks),
                observer: Box::new(BroadcastObserver {
                    sender: notifications.clone(),
                }),
            },
        );

        let task = tokio::spawn(run_loop(controller, rx));
        info!("Voice session {} started", session_id);

        Ok(VoiceSessionHandle {
            session_id,
            tx,
            notifications,
            task: Arc::new(std::sync::Mutex::new(Some(task))),
        })
    }
}

async fn run_loop(mut controller: SessionController, mut rx: mpsc::UnboundedReceiver<LoopMessage>) {
    while let Some(message) = rx.recv().await {
        match message {
            LoopMessage::Event(event) => controller.handle(event),
            LoopMessage::Snapshot(reply) => {
                let _ = reply.send(SessionSnapshot {
                    stats: controller.stats(),
                    messages: controller.messages().to_vec(),
                });
            }
            LoopMessage::Shutdown(ack) => {
                controller.handle(SessionEvent::Dispose);
                let _ = ack.send(());
                break;
            }
        }
    }
    info!("Voice session {} loop finished", controller.session_id());
}

/// Cloneable handle to a running voice session
#[derive(Clone)]
pub struct VoiceSessionHandle {
    session_id: String,
    tx: LoopSender,
    notifications: broadcast::Sender<Notification>,
    task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl VoiceSessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Open the socket; voice mode starts once it is connected
    pub fn connect(&self, session_id: Option<String>) -> Result<()> {
        self.send(SessionEvent::Connect { session_id })
    }

    pub fn start_voice(&self) -> Result<()> {
        self.send(SessionEvent::StartVoice)
    }

    pub fn stop_voice(&self) -> Result<()> {
        self.send(SessionEvent::StopVoice)
    }

    pub fn disconnect(&self) -> Result<()> {
        self.send(SessionEvent::Disconnect)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(LoopMessage::Snapshot(reply))
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())
    }

    /// Tear everything down and wait for the loop to exit
    pub async fn shutdown(&self) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        if self.tx.send(LoopMessage::Shutdown(ack)).is_ok() {
            let _ = rx.await;
        }

        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Voice session {} loop failed: {}", self.session_id, e);
            }
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, event: SessionEvent) -> Result<()> {
        self.tx
            .send(LoopMessage::Event(event))
            .map_err(|_| self.closed())
    }

    fn closed(&self) -> anyhow::Error {
        anyhow!("Voice session {} has shut down", self.session_id)
    }
}

/// Publishes notifications to every subscriber
struct BroadcastObserver {
    sender: broadcast::Sender<Notification>,
}

impl SessionObserver for BroadcastObserver {
    fn notify(&mut self, notification: Notification) {
        // No subscribers is fine
        let _ = self.sender.send(notification);
    }
}

/// Capture device backed by an `AudioBackend`, one pump task per attempt
struct BackendCapture {
    source: AudioSource,
    config: AudioBackendConfig,
    events: LoopSender,
    running: HashMap<u64, oneshot::Sender<()>>,
}

impl BackendCapture {
    fn new(source: AudioSource, config: AudioBackendConfig, events: LoopSender) -> Self {
        Self {
            source,
            config,
            events,
            running: HashMap::new(),
        }
    }
}

impl CaptureDevice for BackendCapture {
    fn acquire(&mut self, attempt: u64) {
        let (stop_tx, stop_rx) = oneshot::channel();
        self.running.insert(attempt, stop_tx);
        tokio::spawn(pump_capture(
            attempt,
            self.source.clone(),
            self.config.clone(),
            self.events.clone(),
            stop_rx,
        ));
    }

    fn release(&mut self, attempt: u64) {
        if let Some(stop) = self.running.remove(&attempt) {
            let _ = stop.send(());
        }
    }
}

async fn pump_capture(
    attempt: u64,
    source: AudioSource,
    config: AudioBackendConfig,
    events: LoopSender,
    mut stop: oneshot::Receiver<()>,
) {
    let deny = |reason: String| {
        post(&events, SessionEvent::DeviceDenied { attempt, reason });
    };

    let mut backend = match AudioBackendFactory::create(source, config) {
        Ok(backend) => backend,
        Err(e) => return deny(format!("{:#}", e)),
    };

    let started = tokio::select! {
        _ = &mut stop => {
            debug!("Capture attempt {} released before the device opened", attempt);
            return;
        }
        started = backend.start() => started,
    };

    let (format, mut frames) = match started {
        Ok(started) => started,
        Err(e) => return deny(format!("{:#}", e)),
    };

    info!("Capture attempt {} running on {} backend", attempt, backend.name());
    post(&events, SessionEvent::DeviceAcquired { attempt, format });

    loop {
        tokio::select! {
            _ = &mut stop => break,
            frame = frames.recv() => match frame {
                Some(frame) => post(&events, SessionEvent::CaptureFrame { attempt, frame }),
                None => {
                    warn!("Capture attempt {} stream ended", attempt);
                    let reason = format!("{} stream ended", backend.name());
                    post(&events, SessionEvent::DeviceLost { attempt, reason });
                    break;
                }
            },
        }
    }

    if let Err(e) = backend.stop().await {
        error!("Failed to stop {} backend: {}", backend.name(), e);
    }
    debug!("Capture attempt {} released", attempt);
}
