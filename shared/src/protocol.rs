//! Messages exchanged with the remote agent over the duplex session channel.
//!
//! Text frames carry JSON; binary frames carry audio (recorded clips going
//! out, synthesized speech coming in) and are not modelled here.

use serde::{Deserialize, Serialize};

/// Client → server JSON messages.
///
/// The server distinguishes these by which fields are present, so the
/// enum is untagged. `UserText` must stay ahead of `SelectCharacter` for
/// deserialization to pick the richer shape.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ClientMessage {
    Control(ControlMessage),
    UserText {
        character_id: String,
        text_input: String,
    },
    SelectCharacter {
        character_id: String,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Config { system_prompt: String },
}

impl ClientMessage {
    pub fn select_character(character_id: impl Into<String>) -> Self {
        Self::SelectCharacter {
            character_id: character_id.into(),
        }
    }

    pub fn user_text(character_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::UserText {
            character_id: character_id.into(),
            text_input: text.into(),
        }
    }

    pub fn persona(system_prompt: impl Into<String>) -> Self {
        Self::Control(ControlMessage::Config {
            system_prompt: system_prompt.into(),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Server → client JSON messages, dispatched on the `type` tag.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Transcript {
        #[serde(default)]
        text: String,
    },
    Tts {
        #[serde(default)]
        text: String,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        emotion: Option<String>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    Info {
        #[serde(default)]
        message: String,
    },
}

impl ServerMessage {
    /// Parses a text frame. Malformed JSON and unknown `type` tags yield
    /// `None`; the caller drops them without telling the user.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}
