//! CLI adapter - line input from stdin and console output.

use std::io::{self, BufRead};
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::adapters::audio::Speaker;
use crate::adapters::{OutputSink, UserInput};
use crate::ui;

/// Console output. In voice mode a [`Speaker`] is opened on the first audio
/// chunk of each reply and released when the reply ends.
pub struct ConsoleSink {
    sample_rate: Option<u32>,
    speaker: Option<Speaker>,
    playback_failed: bool,
}

impl ConsoleSink {
    pub fn text_mode() -> Self {
        Self { sample_rate: None, speaker: None, playback_failed: false }
    }

    pub fn voice_mode(sample_rate: u32) -> Self {
        Self { sample_rate: Some(sample_rate), speaker: None, playback_failed: false }
    }

    fn speaker(&mut self) -> Option<&mut Speaker> {
        if self.speaker.is_none() && !self.playback_failed {
            let rate = self.sample_rate?;
            match Speaker::open(rate) {
                Ok(speaker) => self.speaker = Some(speaker),
                Err(e) => {
                    warn!("Playback unavailable: {}", e);
                    ui::print_warning("No audio playback; replies are shown as text only");
                    self.playback_failed = true;
                }
            }
        }
        self.speaker.as_mut()
    }
}

impl OutputSink for ConsoleSink {
    fn text(&mut self, text: &str) {
        ui::print_reply(text);
    }

    fn audio(&mut self, bytes: &[u8]) {
        if let Some(speaker) = self.speaker() {
            speaker.play(bytes);
        }
    }

    fn audio_end(&mut self) {
        if let Some(mut speaker) = self.speaker.take() {
            speaker.finish();
            // Dropping waits for the queued audio to drain.
            thread::spawn(move || drop(speaker));
        }
    }

    fn error(&mut self, message: &str) {
        ui::print_error(message);
    }

    fn notice(&mut self, message: &str) {
        ui::print_step(message);
    }

    fn prompt(&mut self) {
        if self.sample_rate.is_some() {
            ui::print_voice_controls();
        } else {
            ui::print_prompt();
        }
    }
}

/// Read stdin line by line into `tx` until EOF, an exit command, or the
/// engine hanging up.
///
/// Runs on a plain thread so a pending blocking read never holds up runtime
/// shutdown.
pub fn spawn_line_reader(tx: mpsc::Sender<UserInput>, voice: bool) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    debug!("stdin read failed: {}", e);
                    break;
                }
            };
            let Some(input) = UserInput::from_line(&line, voice) else {
                continue;
            };
            let exit = input == UserInput::Exit;
            if tx.blocking_send(input).is_err() || exit {
                return;
            }
        }
        debug!("stdin closed");
        let _ = tx.blocking_send(UserInput::Exit);
    })
}
