// Common test helpers for avatar runtime tests
//
// This module provides utilities for:
// - A scripted in-memory connector standing in for the agent server
// - User interaction and confirmation for device tests
// - Test output formatting

#![allow(dead_code)]

use async_trait::async_trait;
use avatar_runtime::channel::transport::{Connector, Frame, FrameSink, FrameStream};
use avatar_runtime::{RuntimeError, RuntimeResult};
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use std::io::{self, Write};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Server side of one accepted connection. Dropping `to_client` closes it.
pub struct ServerEnd {
    pub accepted_at: Instant,
    pub from_client: fmpsc::UnboundedReceiver<Frame>,
    pub to_client: fmpsc::UnboundedSender<RuntimeResult<Frame>>,
}

impl ServerEnd {
    pub fn send_text(&self, text: &str) {
        self.to_client
            .unbounded_send(Ok(Frame::Text(text.to_string())))
            .unwrap();
    }

    pub fn send_binary(&self, bytes: Vec<u8>) {
        self.to_client
            .unbounded_send(Ok(Frame::Binary(bytes)))
            .unwrap();
    }

    pub async fn next_from_client(&mut self) -> Option<Frame> {
        self.from_client.next().await
    }
}

/// Accepts every connection and hands the server end to the test.
pub struct ScriptedConnector {
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

impl ScriptedConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        (Self { accepted }, rx)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> RuntimeResult<(FrameSink, FrameStream)> {
        let (client_tx, from_client) = fmpsc::unbounded();
        let (to_client, client_rx) = fmpsc::unbounded();

        self.accepted
            .send(ServerEnd {
                accepted_at: Instant::now(),
                from_client,
                to_client,
            })
            .map_err(|_| RuntimeError::Channel("test harness gone".to_string()))?;

        let sink = client_tx.sink_map_err(|e| RuntimeError::Channel(e.to_string()));
        Ok((Box::pin(sink), client_rx.boxed()))
    }
}

/// Ask user to confirm an action
pub fn confirm_action(prompt: &str) -> bool {
    print!(
        "\n[CONFIRM] {}\nPress 'y' to confirm, any other key to skip: ",
        prompt
    );
    io::stdout().flush().unwrap();

    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    input.trim().to_lowercase() == "y"
}

/// Print a section header
pub fn print_header(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("  {}", title);
    println!("{}", "=".repeat(60));
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("\n✓ {}", message);
}

/// Print an error message
pub fn print_error(message: &str) {
    println!("\n✗ {}", message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("\nℹ {}", message);
}
