//! Reconnecting duplex channel to the remote agent.
//!
//! A single task owns the connection for the lifetime of the session. It
//! cycles Connecting → Open → Closed, sleeps a fixed delay, then dials
//! again, forever. Because the sleep lives in that one task there is never
//! more than one reconnect pending.

use crate::channel::transport::{Connector, Frame, FrameSink, FrameStream};
use crate::config::ChannelConfig;
use crate::error::{RuntimeError, RuntimeResult};
use futures_util::{SinkExt, StreamExt};
use shared::protocol::{ClientMessage, ServerMessage};
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ClientMessage),
    Audio(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(ServerMessage),
    Audio(Vec<u8>),
}

/// Cheap handle onto the channel task. Dropping every handle ends the task.
#[derive(Clone)]
pub struct ChannelHandle {
    state_rx: watch::Receiver<ConnectionState>,
    outbound_tx: mpsc::Sender<Outbound>,
}

impl ChannelHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Queues a message for the open connection. The channel does not
    /// buffer for later connections; callers check [`is_open`](Self::is_open)
    /// and drop their message otherwise.
    pub fn send(&self, outbound: Outbound) -> RuntimeResult<()> {
        if !self.is_open() {
            return Err(RuntimeError::ChannelClosed);
        }
        self.outbound_tx
            .try_send(outbound)
            .map_err(|e| RuntimeError::Channel(e.to_string()))
    }
}

enum Ending {
    Closed,
    Shutdown,
}

pub struct SessionChannel<C: Connector> {
    connector: C,
    reconnect_delay: Duration,
    character_rx: watch::Receiver<Option<String>>,
    inbound_tx: mpsc::Sender<Inbound>,
    state_tx: watch::Sender<ConnectionState>,
    outbound_rx: mpsc::Receiver<Outbound>,
}

impl<C: Connector> SessionChannel<C> {
    /// Starts the channel task. `character_rx` is read on every successful
    /// handshake so the server learns the current selection.
    pub fn spawn(
        connector: C,
        config: &ChannelConfig,
        character_rx: watch::Receiver<Option<String>>,
        inbound_tx: mpsc::Sender<Inbound>,
    ) -> (ChannelHandle, JoinHandle<()>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));

        let channel = Self {
            connector,
            reconnect_delay: config.reconnect_delay(),
            character_rx,
            inbound_tx,
            state_tx,
            outbound_rx,
        };
        let task = tokio::spawn(channel.run());

        (
            ChannelHandle {
                state_rx,
                outbound_tx,
            },
            task,
        )
    }

    async fn run(mut self) {
        loop {
            self.state_tx.send_replace(ConnectionState::Connecting);

            match self.connector.connect().await {
                Ok((sink, stream)) => {
                    info!("Session channel open");
                    self.state_tx.send_replace(ConnectionState::Open);
                    if let Ending::Shutdown = self.pump(sink, stream).await {
                        break;
                    }
                }
                Err(e) => warn!("Session channel connect failed: {}", e),
            }

            self.state_tx.send_replace(ConnectionState::Closed);

            // Anything queued against the dead connection is stale.
            while self.outbound_rx.try_recv().is_ok() {}

            info!(
                "Session channel closed, reconnecting in {}ms",
                self.reconnect_delay.as_millis()
            );
            tokio::time::sleep(self.reconnect_delay).await;

            if self.outbound_rx.is_closed() && self.outbound_rx.is_empty() {
                break;
            }
        }
        self.state_tx.send_replace(ConnectionState::Closed);
        debug!("Session channel task ended");
    }

    async fn pump(&mut self, mut sink: FrameSink, mut stream: FrameStream) -> Ending {
        let selection = self.character_rx.borrow().clone();
        if let Some(character_id) = selection {
            if let Err(e) = send_message(&mut sink, ClientMessage::select_character(character_id)).await
            {
                warn!("Failed to announce character: {}", e);
                return Ending::Closed;
            }
        }

        loop {
            tokio::select! {
                outbound = self.outbound_rx.recv() => {
                    let Some(outbound) = outbound else {
                        let _ = sink.close().await;
                        return Ending::Shutdown;
                    };
                    let result = match outbound {
                        Outbound::Message(message) => send_message(&mut sink, message).await,
                        Outbound::Audio(bytes) => {
                            debug!("Sending {} bytes of audio", bytes.len());
                            sink.send(Frame::Binary(bytes)).await
                        }
                    };
                    if let Err(e) = result {
                        warn!("Session channel send failed: {}", e);
                        return Ending::Closed;
                    }
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(Frame::Text(text))) => match ServerMessage::parse(&text) {
                        Some(message) => self.deliver(Inbound::Message(message)).await,
                        None => debug!("Dropping unrecognized message: {}", text),
                    },
                    Some(Ok(Frame::Binary(bytes))) => self.deliver(Inbound::Audio(bytes)).await,
                    Some(Err(e)) => {
                        info!("Session channel closed: {}", e);
                        return Ending::Closed;
                    }
                    None => {
                        info!("Session channel closed by peer");
                        return Ending::Closed;
                    }
                },
            }
        }
    }

    async fn deliver(&self, inbound: Inbound) {
        if self.inbound_tx.send(inbound).await.is_err() {
            debug!("No inbound consumer, dropping message");
        }
    }
}

async fn send_message(sink: &mut FrameSink, message: ClientMessage) -> RuntimeResult<()> {
    let json = message
        .to_json()
        .map_err(|e| RuntimeError::Channel(e.to_string()))?;
    sink.send(Frame::Text(json)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Unreachable {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for Unreachable {
        async fn connect(&self) -> RuntimeResult<(FrameSink, FrameStream)> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(RuntimeError::Channel("refused".to_string()))
        }
    }

    fn config(delay_ms: u64) -> ChannelConfig {
        ChannelConfig {
            reconnect_delay_ms: delay_ms,
            outbound_capacity: 4,
        }
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Open.to_string(), "open");
        assert_eq!(ConnectionState::Closed.to_string(), "closed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_closed_is_rejected() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let (_character_tx, character_rx) = watch::channel(None);
        let (inbound_tx, _inbound_rx) = mpsc::channel(4);
        let (handle, _task) = SessionChannel::spawn(
            Unreachable {
                attempts: attempts.clone(),
            },
            &config(3000),
            character_rx,
            inbound_tx,
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(matches!(
            handle.send(Outbound::Audio(vec![1, 2, 3])),
            Err(RuntimeError::ChannelClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connects_retry_at_fixed_interval() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let (_character_tx, character_rx) = watch::channel(None);
        let (inbound_tx, _inbound_rx) = mpsc::channel(4);
        let (_handle, _task) = SessionChannel::spawn(
            Unreachable {
                attempts: attempts.clone(),
            },
            &config(3000),
            character_rx,
            inbound_tx,
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_millis(6000)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_ends_when_handles_dropped() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let (_character_tx, character_rx) = watch::channel(None);
        let (inbound_tx, _inbound_rx) = mpsc::channel(4);
        let (handle, task) = SessionChannel::spawn(
            Unreachable { attempts },
            &config(100),
            character_rx,
            inbound_tx,
        );

        drop(handle);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(task.is_finished());
    }
}
