//! Adapters module - where the session meets the user.
//!
//! The engine consumes [`UserInput`] events and writes to an [`OutputSink`].
//! Each adapter supplies one side of that:
//!
//! - **CLI** - line-based text input and console output
//! - **Audio** - microphone capture and speaker playback (`audio` feature)

pub mod audio;
pub mod cli;

use crate::Result;

/// Something the user did.
#[derive(Debug, Clone, PartialEq)]
pub enum UserInput {
    /// A line of text. The literal `exit` ends the session.
    Text(String),
    /// Captured audio, raw PCM16 little-endian.
    Audio(Vec<u8>),
    /// Start or stop microphone capture.
    ToggleRecording,
    /// Leave the conversation.
    Exit,
}

impl UserInput {
    /// Interpret a typed line.
    pub fn from_line(line: &str, voice: bool) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if line.eq_ignore_ascii_case("exit") {
            return Some(UserInput::Exit);
        }
        if voice {
            match line {
                "r" | "R" => return Some(UserInput::ToggleRecording),
                "q" | "Q" => return Some(UserInput::Exit),
                _ => {}
            }
        }
        Some(UserInput::Text(line.to_string()))
    }
}

/// Destination for everything the session produces.
pub trait OutputSink: Send {
    /// Assistant text (a message or a transcript).
    fn text(&mut self, text: &str);

    /// A chunk of synthesized speech.
    fn audio(&mut self, bytes: &[u8]);

    /// The current spoken reply is complete.
    fn audio_end(&mut self);

    fn error(&mut self, message: &str);

    /// Informational line, e.g. recording state.
    fn notice(&mut self, message: &str);

    /// Ask the user for the next input.
    fn prompt(&mut self);
}

/// Microphone capture.
pub trait AudioSource: Send {
    fn start(&mut self) -> Result<()>;

    /// Stop capturing and return everything recorded since `start`.
    fn stop(&mut self) -> Result<Vec<u8>>;

    fn is_recording(&self) -> bool;
}

#[cfg(test)]
pub use recording::{RecordingSink, SinkEvent};


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_parsing() {
        assert_eq!(UserInput::from_line("  ", false), None);
        assert_eq!(UserInput::from_line("exit", false), Some(UserInput::Exit));
        assert_eq!(UserInput::from_line("EXIT\n", true), Some(UserInput::Exit));
        assert_eq!(UserInput::from_line("r", false), Some(UserInput::Text("r".to_string())));
        assert_eq!(UserInput::from_line("r", true), Some(UserInput::ToggleRecording));
        assert_eq!(UserInput::from_line("q", true), Some(UserInput::Exit));
        assert_eq!(
            UserInput::from_line(" weather in Paris ", false),
            Some(UserInput::Text("weather in Paris".to_string()))
        );
    }
}
