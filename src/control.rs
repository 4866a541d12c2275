//! Speech-synthesis control messages
//!
//! The server brackets each spoken reply with JSON text messages:
//!
//! ```json
//! {"type":"tts","state":"start","session_id":"abc"}
//! {"type":"tts","state":"sentence_start","text":"Hello there."}
//! {"type":"tts","state":"sentence_end","text":"Hello there."}
//! {"type":"tts","state":"stop"}
//! ```
//!
//! `stop` means the reply was interrupted or is over, so whatever is still
//! queued must go.

use serde::{Deserialize, Serialize};

use crate::player::StreamPlayer;

/// Phase of a synthesized reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsState {
    Start,
    SentenceStart,
    SentenceEnd,
    Stop,
}

/// A control message from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Tts {
        state: TtsState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Any other message type; not relevant to playback
    #[serde(other)]
    Other,
}

impl ControlMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Applies control messages to a player and tracks the reply in progress
#[derive(Debug, Default)]
pub struct ControlHandler {
    speaking: bool,
    session_id: Option<String>,
}

impl ControlHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a reply is between `start` and `stop`
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn apply(&mut self, player: &StreamPlayer, message: &ControlMessage) {
        let ControlMessage::Tts {
            state,
            text,
            session_id,
        } = message
        else {
            tracing::trace!("Ignoring non-tts control message");
            return;
        };

        match state {
            TtsState::Start => {
                tracing::info!("Server started sending audio");
                self.speaking = true;
                if session_id.is_some() {
                    self.session_id = session_id.clone();
                }
            }
            TtsState::SentenceStart => {
                tracing::info!("Sentence: {}", text.as_deref().unwrap_or(""));
            }
            TtsState::SentenceEnd => {
                tracing::debug!("Sentence ended: {}", text.as_deref().unwrap_or(""));
            }
            TtsState::Stop => {
                tracing::info!("Server audio ended, clearing all audio");
                player.clear_all_audio();
                self.speaking = false;
            }
        }
    }

    /// Parse and apply one JSON text message. Malformed messages are
    /// returned as errors and change nothing.
    pub fn handle_text(
        &mut self,
        player: &StreamPlayer,
        text: &str,
    ) -> Result<ControlMessage, serde_json::Error> {
        let message = ControlMessage::parse(text)?;
        self.apply(player, &message);
        Ok(message)
    }
}
