//! Session orchestration: character and persona selection, the chat log, and
//! dispatch of inbound channel traffic to playback and the avatar.

use crate::animation::AnimationDriver;
use crate::audio::{AudioClip, ClipSink, InboundAudioPayload, SpeechPlayer};
use crate::catalog::{CharacterEntry, FALLBACK_CHARACTER};
use crate::channel::{ChannelHandle, ConnectionState, Inbound, Outbound};
use crate::error::{RuntimeError, RuntimeResult};
use shared::protocol::{ClientMessage, ServerMessage};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const NEUTRAL_EMOTION: &str = "neutral";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Author {
    User,
    Agent,
    System,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    pub author: Author,
    pub text: String,
    /// Audio the entry can be replayed from.
    pub replay: Option<String>,
}

impl ChatEntry {
    pub fn new(author: Author, text: impl Into<String>) -> Self {
        Self {
            author,
            text: text.into(),
            replay: None,
        }
    }

    pub fn with_replay(mut self, url: impl Into<String>) -> Self {
        self.replay = Some(url.into());
        self
    }
}

/// The chat log and connection indicator. The UI is external; this is the
/// seam it hooks into.
pub trait ChatView: Send + Sync {
    fn append(&self, entry: ChatEntry);
    fn connection_changed(&self, state: ConnectionState);
}

/// Renders the chat log into the tracing output.
pub struct LogChatView;

impl ChatView for LogChatView {
    fn append(&self, entry: ChatEntry) {
        match entry.author {
            Author::User => info!(target: "chat", "you: {}", entry.text),
            Author::Agent => match &entry.replay {
                Some(url) => info!(target: "chat", "agent: {} [{}]", entry.text, url),
                None => info!(target: "chat", "agent: {}", entry.text),
            },
            Author::System => warn!(target: "chat", "system: {}", entry.text),
        }
    }

    fn connection_changed(&self, state: ConnectionState) {
        info!(target: "chat", "connection: {}", state);
    }
}

pub struct Session {
    channel: ChannelHandle,
    driver: Arc<AnimationDriver>,
    player: Arc<dyn SpeechPlayer>,
    chat: Arc<dyn ChatView>,
    character_tx: watch::Sender<Option<String>>,
    persona: Mutex<String>,
    characters: Vec<CharacterEntry>,
}

impl Session {
    /// `character_tx` is shared with the channel task, which announces the
    /// current value on every open.
    pub fn new(
        channel: ChannelHandle,
        driver: Arc<AnimationDriver>,
        player: Arc<dyn SpeechPlayer>,
        chat: Arc<dyn ChatView>,
        character_tx: watch::Sender<Option<String>>,
        characters: Vec<CharacterEntry>,
    ) -> Self {
        Self {
            channel,
            driver,
            player,
            chat,
            character_tx,
            persona: Mutex::new(String::new()),
            characters,
        }
    }

    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    pub fn characters(&self) -> &[CharacterEntry] {
        &self.characters
    }

    pub fn character(&self) -> Option<String> {
        self.character_tx.borrow().clone()
    }

    pub fn persona(&self) -> String {
        self.persona
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn connection_changed(&self, state: ConnectionState) {
        self.chat.connection_changed(state);
    }

    /// Switches the active character: records it, tells the server if the
    /// channel is open, then swaps the avatar model. A failed announcement
    /// does not stop the swap; the next handshake announces the selection.
    pub async fn select_character(&self, character_id: &str) -> RuntimeResult<()> {
        info!("Selecting character {}", character_id);
        self.character_tx
            .send_replace(Some(character_id.to_string()));

        if self.channel.is_open() {
            let announce = Outbound::Message(ClientMessage::select_character(character_id));
            if let Err(e) = self.channel.send(announce) {
                warn!("Failed to announce character {}: {}", character_id, e);
            }
        } else {
            debug!("Channel not open; character will be announced on connect");
        }

        self.driver.load_model(character_id).await
    }

    /// Sends typed text on behalf of the user. Blank text and a closed
    /// channel are both no-ops; the echo only appears once the text is sent.
    pub fn send_text(&self, text: &str) -> RuntimeResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        if !self.channel.is_open() {
            debug!("Dropping text while channel is {}", self.channel.state());
            return Err(RuntimeError::ChannelClosed);
        }

        let character = self
            .character()
            .unwrap_or_else(|| FALLBACK_CHARACTER.to_string());
        self.channel
            .send(Outbound::Message(ClientMessage::user_text(character, text)))?;
        self.chat.append(ChatEntry::new(Author::User, text));
        Ok(())
    }

    pub fn update_persona(&self, system_prompt: &str) -> RuntimeResult<()> {
        let prompt = system_prompt.trim();
        if prompt.is_empty() {
            return Ok(());
        }
        if !self.channel.is_open() {
            return Err(RuntimeError::ChannelClosed);
        }

        self.channel
            .send(Outbound::Message(ClientMessage::persona(prompt)))?;
        *self.persona.lock().unwrap_or_else(PoisonError::into_inner) = prompt.to_string();
        Ok(())
    }

    /// Replays the audio bound to an agent chat entry.
    pub fn replay(&self, url: &str) {
        self.player.play(InboundAudioPayload::Url(url.to_string()));
    }

    pub fn handle_inbound(&self, inbound: Inbound) {
        match inbound {
            Inbound::Audio(bytes) => {
                debug!("Received {} bytes of speech audio", bytes.len());
                self.player.play(InboundAudioPayload::Bytes(bytes));
            }
            Inbound::Message(message) => self.handle_message(message),
        }
    }

    fn handle_message(&self, message: ServerMessage) {
        match message {
            ServerMessage::Transcript { text } => {
                self.chat.append(ChatEntry::new(Author::User, text));
            }
            ServerMessage::Tts { text, url, emotion } => {
                if let Some(emotion) = emotion.filter(|e| !e.is_empty() && e != NEUTRAL_EMOTION) {
                    self.driver.express(&emotion);
                }
                match url.filter(|u| !u.is_empty()) {
                    Some(url) => {
                        self.chat
                            .append(ChatEntry::new(Author::Agent, text).with_replay(url.clone()));
                        self.player.play(InboundAudioPayload::Url(url));
                    }
                    None => self.chat.append(ChatEntry::new(Author::Agent, text)),
                }
            }
            ServerMessage::Error { message } => {
                warn!("Server error: {}", message);
                self.chat.append(ChatEntry::new(Author::System, message));
            }
            ServerMessage::Info { message } => {
                self.chat.append(ChatEntry::new(Author::System, message));
            }
        }
    }
}

/// Sends finalized recordings over the channel while it is open.
pub struct ChannelClipSink {
    channel: ChannelHandle,
}

impl ChannelClipSink {
    pub fn new(channel: ChannelHandle) -> Self {
        Self { channel }
    }
}

impl ClipSink for ChannelClipSink {
    fn submit(&self, clip: AudioClip) {
        if !self.channel.is_open() {
            debug!("Dropping recorded clip while channel is {}", self.channel.state());
            return;
        }
        let samples = clip.sample_count();
        match self.channel.send(Outbound::Audio(clip.into_bytes())) {
            Ok(()) => info!("Sent recording ({} samples)", samples),
            Err(e) => warn!("Failed to send recording: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::HeadlessSurface;
    use crate::catalog::ModelRegistry;
    use crate::channel::transport::{Connector, Frame, FrameSink, FrameStream};
    use crate::channel::SessionChannel;
    use crate::config::{AvatarConfig, ChannelConfig};
    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use futures::{SinkExt, StreamExt};
    use std::sync::RwLock;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    struct LoopbackConnector {
        sent: fmpsc::UnboundedSender<Frame>,
        reachable: bool,
    }

    #[async_trait]
    impl Connector for LoopbackConnector {
        async fn connect(&self) -> RuntimeResult<(FrameSink, FrameStream)> {
            if !self.reachable {
                return Err(RuntimeError::Channel("unreachable".to_string()));
            }
            let sink = self
                .sent
                .clone()
                .sink_map_err(|e| RuntimeError::Channel(e.to_string()));
            Ok((Box::pin(sink), futures::stream::pending().boxed()))
        }
    }

    #[derive(Default)]
    struct RecordingPlayer {
        played: Mutex<Vec<InboundAudioPayload>>,
    }

    impl SpeechPlayer for RecordingPlayer {
        fn play(&self, payload: InboundAudioPayload) {
            self.played.lock().unwrap().push(payload);
        }
        fn unlock(&self) {}
        fn is_speaking(&self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct RecordingChat {
        entries: Mutex<Vec<ChatEntry>>,
    }

    impl ChatView for RecordingChat {
        fn append(&self, entry: ChatEntry) {
            self.entries.lock().unwrap().push(entry);
        }
        fn connection_changed(&self, _state: ConnectionState) {}
    }

    struct Fixture {
        session: Session,
        sent: fmpsc::UnboundedReceiver<Frame>,
        player: Arc<RecordingPlayer>,
        chat: Arc<RecordingChat>,
        surface: Arc<HeadlessSurface>,
        task: JoinHandle<()>,
        _inbound: mpsc::Receiver<Inbound>,
    }

    async fn fixture(reachable: bool) -> Fixture {
        let (sent_tx, sent) = fmpsc::unbounded();
        let (character_tx, character_rx) = watch::channel(None);
        let (inbound_tx, inbound) = mpsc::channel(8);
        let (channel, task) = SessionChannel::spawn(
            LoopbackConnector {
                sent: sent_tx,
                reachable,
            },
            &ChannelConfig::default(),
            character_rx,
            inbound_tx,
        );

        let mut state = channel.subscribe();
        let wanted = if reachable {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        };
        state.wait_for(|s| *s == wanted).await.unwrap();

        let surface = Arc::new(HeadlessSurface::new(800.0, 600.0));
        let registry = Arc::new(RwLock::new(ModelRegistry::new("default.model3.json")));
        let driver = Arc::new(AnimationDriver::new(
            surface.clone(),
            registry,
            AvatarConfig::default(),
        ));
        let player = Arc::new(RecordingPlayer::default());
        let chat = Arc::new(RecordingChat::default());
        let session = Session::new(
            channel,
            driver,
            player.clone(),
            chat.clone(),
            character_tx,
            vec![CharacterEntry::fallback()],
        );

        Fixture {
            session,
            sent,
            player,
            chat,
            surface,
            task,
            _inbound: inbound,
        }
    }

    fn tts(text: &str, url: Option<&str>, emotion: Option<&str>) -> Inbound {
        Inbound::Message(ServerMessage::Tts {
            text: text.to_string(),
            url: url.map(str::to_string),
            emotion: emotion.map(str::to_string),
        })
    }

    #[test]
    fn test_chat_entry_replay() {
        let entry = ChatEntry::new(Author::Agent, "hi").with_replay("a.wav");
        assert_eq!(entry.replay.as_deref(), Some("a.wav"));
        assert_eq!(ChatEntry::new(Author::User, "hi").replay, None);
    }

    #[tokio::test]
    async fn test_tts_with_url_plays_and_binds_replay() {
        let fx = fixture(true).await;
        fx.session.handle_inbound(tts("Hello", Some("a.wav"), None));

        let entries = fx.chat.entries.lock().unwrap().clone();
        assert_eq!(
            entries,
            vec![ChatEntry::new(Author::Agent, "Hello").with_replay("a.wav")]
        );
        assert_eq!(
            *fx.player.played.lock().unwrap(),
            vec![InboundAudioPayload::Url("a.wav".to_string())]
        );
    }

    #[tokio::test]
    async fn test_tts_without_url_is_text_only() {
        let fx = fixture(true).await;
        fx.session.handle_inbound(tts("Hello", None, Some("neutral")));

        let entries = fx.chat.entries.lock().unwrap().clone();
        assert_eq!(entries, vec![ChatEntry::new(Author::Agent, "Hello")]);
        assert!(fx.player.played.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_messages_become_chat_entries() {
        let fx = fixture(true).await;
        fx.session.handle_inbound(Inbound::Message(ServerMessage::Transcript {
            text: "what's up".to_string(),
        }));
        fx.session.handle_inbound(Inbound::Message(ServerMessage::Error {
            message: "boom".to_string(),
        }));
        fx.session.handle_inbound(Inbound::Message(ServerMessage::Info {
            message: "Character set".to_string(),
        }));

        let authors: Vec<Author> = fx
            .chat
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.author)
            .collect();
        assert_eq!(authors, vec![Author::User, Author::System, Author::System]);
        assert!(fx.player.played.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_binary_inbound_is_played_without_chat_entry() {
        let fx = fixture(true).await;
        fx.session.handle_inbound(Inbound::Audio(vec![1, 2, 3]));

        assert_eq!(
            *fx.player.played.lock().unwrap(),
            vec![InboundAudioPayload::Bytes(vec![1, 2, 3])]
        );
        assert!(fx.chat.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_text_uses_default_character_and_echoes() {
        let mut fx = fixture(true).await;
        fx.session.send_text("  hello  ").unwrap();

        assert_eq!(
            fx.sent.next().await,
            Some(Frame::Text(
                r#"{"character_id":"default","text_input":"hello"}"#.to_string()
            ))
        );
        assert_eq!(
            *fx.chat.entries.lock().unwrap(),
            vec![ChatEntry::new(Author::User, "hello")]
        );
    }

    #[tokio::test]
    async fn test_send_text_while_closed_is_dropped() {
        let fx = fixture(false).await;
        assert!(matches!(
            fx.session.send_text("hello"),
            Err(RuntimeError::ChannelClosed)
        ));
        assert!(fx.chat.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_persona_is_not_sent() {
        let mut fx = fixture(true).await;
        fx.session.update_persona("   ").unwrap();
        fx.session.update_persona(" be terse ").unwrap();

        assert_eq!(
            fx.sent.next().await,
            Some(Frame::Text(
                r#"{"type":"config","system_prompt":"be terse"}"#.to_string()
            ))
        );
        assert_eq!(fx.session.persona(), "be terse");
    }

    #[tokio::test]
    async fn test_select_character_announces_and_loads_model() {
        let mut fx = fixture(true).await;
        fx.session.select_character("robin").await.unwrap();

        assert_eq!(fx.session.character().as_deref(), Some("robin"));
        assert_eq!(
            fx.sent.next().await,
            Some(Frame::Text(r#"{"character_id":"robin"}"#.to_string()))
        );
        assert_eq!(fx.surface.live_models(), 1);
    }

    #[tokio::test]
    async fn test_select_character_loads_model_when_announce_fails() {
        let mut fx = fixture(true).await;
        // The handle still reports Open but nothing drains the queue any more.
        fx.task.abort();
        let _ = (&mut fx.task).await;
        assert!(fx.session.channel().is_open());

        fx.session.select_character("robin").await.unwrap();

        assert_eq!(fx.session.character().as_deref(), Some("robin"));
        assert_eq!(fx.surface.live_models(), 1);
    }

    #[tokio::test]
    async fn test_replay_plays_bound_url() {
        let fx = fixture(true).await;
        fx.session.handle_inbound(tts("Hello", Some("a.wav"), None));
        let bound = fx.chat.entries.lock().unwrap()[0].replay.clone().unwrap();

        fx.session.replay(&bound);

        assert_eq!(
            *fx.player.played.lock().unwrap(),
            vec![
                InboundAudioPayload::Url("a.wav".to_string()),
                InboundAudioPayload::Url("a.wav".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_clip_sink_sends_binary_when_open() {
        let mut fx = fixture(true).await;
        let sink = ChannelClipSink::new(fx.session.channel().clone());
        let clip = AudioClip::encode(&[0.0, 0.5, -0.5], 16000).unwrap();
        let expected = clip.bytes().to_vec();
        sink.submit(clip);

        assert_eq!(fx.sent.next().await, Some(Frame::Binary(expected)));
    }
}
