//! Startup sequence and UI-event dispatch for one avatar session.

use crate::animation::{AnimationDriver, RenderSurface};
use crate::audio::playback::AudioOutput;
use crate::audio::{
    AudioCapture, CaptureController, Focus, InputEvent, PlaybackEngine, RecordingState,
    SpeechPlayer,
};
use crate::catalog::{CatalogClient, ModelRegistry};
use crate::channel::{Connector, SessionChannel};
use crate::config::Config;
use crate::error::{RuntimeError, RuntimeResult};
use crate::session::{ChannelClipSink, ChatView, Session};
use shared::ipc::{Command, DragPhase, Response, StatusInfo};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const INPUT_QUEUE: usize = 32;
const INBOUND_QUEUE: usize = 64;

/// Platform pieces the session runs on.
pub struct Backends<C: Connector> {
    pub surface: Arc<dyn RenderSurface>,
    pub output: Arc<dyn AudioOutput>,
    pub connector: C,
    /// Acquired once at startup; `None` leaves recording inert.
    pub capture: Option<AudioCapture>,
}

pub struct App {
    session: Arc<Session>,
    driver: Arc<AnimationDriver>,
    player: Arc<dyn SpeechPlayer>,
    input_tx: mpsc::Sender<(InputEvent, Focus)>,
    recording_rx: watch::Receiver<RecordingState>,
    capture: Mutex<Option<AudioCapture>>,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    pub async fn start<C: Connector>(
        config: &Config,
        backends: Backends<C>,
        chat: Arc<dyn ChatView>,
    ) -> RuntimeResult<Self> {
        let mut config = config.clone();
        config.sanitize();
        let config = &config;

        let Backends {
            surface,
            output,
            connector,
            capture,
        } = backends;

        // 1. Rendering surface and the driver that owns it.
        let registry = Arc::new(RwLock::new(ModelRegistry::new(
            config.avatar.default_model.clone(),
        )));
        let driver = Arc::new(AnimationDriver::new(
            surface,
            Arc::clone(&registry),
            config.avatar.clone(),
        ));

        // 2. Characters, falling back to a single default entry.
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        let catalog = CatalogClient::new(http.clone(), &config.server)?;
        let characters = catalog.characters().await;
        let names: Vec<&str> = characters.iter().map(|c| c.display_name()).collect();
        info!("Characters: {}", names.join(", "));

        // 3. Model registry. Failure leaves every id on the default model.
        match catalog.models().await {
            Ok(entries) => {
                let mut registry = registry.write().unwrap_or_else(PoisonError::into_inner);
                registry.refresh(&entries);
                info!("Model registry has {} entries", registry.len());
            }
            Err(e) => warn!("Failed to fetch model registry, using default model: {}", e),
        }

        let initial = characters.first().map(|c| c.id.clone());
        if let Some(character_id) = &initial {
            if let Err(e) = driver.load_model(character_id).await {
                warn!("Failed to load initial model: {}", e);
            }
        }

        // 4. Session channel.
        let (character_tx, character_rx) = watch::channel(initial);
        let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let (channel, channel_task) =
            SessionChannel::spawn(connector, &config.channel, character_rx, inbound_tx);

        let engine = PlaybackEngine::new(
            output,
            Arc::clone(&driver),
            http,
            Url::parse(&config.server.base_url)?,
            &config.analysis,
        );
        let player: Arc<dyn SpeechPlayer> = Arc::new(engine.clone());

        let session = Arc::new(Session::new(
            channel.clone(),
            Arc::clone(&driver),
            Arc::clone(&player),
            chat,
            character_tx,
            characters,
        ));

        let mut capture = capture;
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let device_ready = match capture.as_mut() {
            Some(device) => match device.start(chunk_tx) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to start audio capture: {}", e);
                    false
                }
            },
            None => false,
        };
        let controller = CaptureController::new(
            device_ready,
            config.audio.sample_rate,
            config.audio.record_key.clone(),
            Arc::new(ChannelClipSink::new(channel.clone())),
        );

        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);
        let (recording_tx, recording_rx) = watch::channel(RecordingState::Idle);

        let mut tasks = vec![channel_task];
        tasks.push(tokio::spawn(crate::audio::recorder::run_recorder(
            controller,
            chunk_rx,
            input_rx,
            recording_tx,
        )));
        tasks.push(tokio::spawn(
            engine.run_mouth_sync(Duration::from_millis(config.analysis.tick_ms.max(1))),
        ));

        let dispatch = Arc::clone(&session);
        tasks.push(tokio::spawn(async move {
            while let Some(inbound) = inbound_rx.recv().await {
                dispatch.handle_inbound(inbound);
            }
            debug!("Inbound dispatch ended");
        }));

        let watcher = Arc::clone(&session);
        let mut connection = channel.subscribe();
        tasks.push(tokio::spawn(async move {
            while connection.changed().await.is_ok() {
                let state = *connection.borrow_and_update();
                watcher.connection_changed(state);
            }
        }));

        // 5. Playback stays locked until the first command arrives.
        info!("Session started");

        Ok(Self {
            session,
            driver,
            player,
            input_tx,
            recording_rx,
            capture: Mutex::new(capture),
            tasks,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn driver(&self) -> &AnimationDriver {
        &self.driver
    }

    pub fn status(&self) -> StatusInfo {
        StatusInfo {
            connection: self.session.channel().state().to_string(),
            recording: *self.recording_rx.borrow() == RecordingState::Recording,
            speaking: self.player.is_speaking(),
            character: self.session.character(),
            model: self.driver.current_model(),
        }
    }

    pub fn subscribe_recording(&self) -> watch::Receiver<RecordingState> {
        self.recording_rx.clone()
    }

    /// Applies one UI event. Every command counts as a user gesture.
    pub async fn handle_command(&self, command: Command) -> Response {
        self.player.unlock();

        let result = match command {
            Command::Status => return Response::Status(self.status()),
            Command::PressTalk => self.input(InputEvent::PointerDown, Focus::Elsewhere).await,
            Command::ReleaseTalk => self.input(InputEvent::PointerUp, Focus::Elsewhere).await,
            Command::Key {
                key,
                pressed,
                repeat,
                text_focus,
            } => {
                let focus = if text_focus {
                    Focus::TextEntry
                } else {
                    Focus::Elsewhere
                };
                let event = if pressed {
                    InputEvent::KeyDown { key, repeat }
                } else {
                    InputEvent::KeyUp { key }
                };
                self.input(event, focus).await
            }
            Command::SendText(text) => self.session.send_text(&text),
            Command::SelectCharacter(character_id) => {
                self.session.select_character(&character_id).await
            }
            Command::UpdatePersona(prompt) => self.session.update_persona(&prompt),
            Command::Replay(url) => {
                self.session.replay(&url);
                Ok(())
            }
            Command::Tap { x, y } => {
                self.driver.tap(x, y);
                Ok(())
            }
            Command::Drag { phase, x, y } => {
                match phase {
                    DragPhase::Down => self.driver.pointer_down(x, y),
                    DragPhase::Move => self.driver.pointer_move(x, y),
                    DragPhase::Up => self.driver.pointer_up(),
                }
                Ok(())
            }
            Command::Zoom { delta } => {
                self.driver.zoom(delta);
                Ok(())
            }
        };

        match result {
            Ok(()) => Response::Ok,
            Err(e) => Response::Error(e.to_string()),
        }
    }

    async fn input(&self, event: InputEvent, focus: Focus) -> RuntimeResult<()> {
        self.input_tx
            .send((event, focus))
            .await
            .map_err(|_| RuntimeError::Device("recorder is not running".to_string()))
    }
}

impl Drop for App {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Some(capture) = self
            .capture
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            capture.stop();
        }
    }
}
