use serde::{Deserialize, Serialize};
use thiserror::Error;

/// UI events injected into a running `avatard` over its control socket.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Command {
    PressTalk,
    ReleaseTalk,
    Key {
        key: String,
        pressed: bool,
        repeat: bool,
        text_focus: bool,
    },
    SendText(String),
    SelectCharacter(String),
    UpdatePersona(String),
    /// Plays the audio URL bound to an agent chat entry again.
    Replay(String),
    Tap {
        x: f32,
        y: f32,
    },
    Drag {
        phase: DragPhase,
        x: f32,
        y: f32,
    },
    Zoom {
        delta: f32,
    },
    Status,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragPhase {
    Down,
    Move,
    Up,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    Error(String),
    Status(StatusInfo),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusInfo {
    pub connection: String,
    pub recording: bool,
    pub speaking: bool,
    pub character: Option<String>,
    pub model: Option<String>,
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection refused: is avatard running?")]
    ConnectionRefused,

    #[error("Connection timeout")]
    Timeout,
}
