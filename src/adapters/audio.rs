//! Audio adapter - microphone capture and speaker playback.
//!
//! Audio crosses the session as raw PCM16 little-endian mono at the
//! configured sample rate. Device access needs the `audio` cargo feature;
//! without it, [`Recorder::open`] and [`Speaker::open`] fail with
//! [`Error::Audio`](crate::error::Error::Audio) and the CLI stays text-only.

use crate::adapters::AudioSource;
use crate::Result;

pub use imp::{Recorder, Speaker};

/// Samples to little-endian bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Little-endian bytes to samples. A trailing odd byte is returned separately
/// so a split sample can be completed by the next chunk.
pub fn bytes_to_pcm16(bytes: &[u8]) -> (Vec<i16>, Option<u8>) {
    let chunks = bytes.chunks_exact(2);
    let rest = chunks.remainder().first().copied();
    let samples = chunks.map(|pair| i16::from_le_bytes([pair[0], pair[1]])).collect();
    (samples, rest)
}

/// Reassembles PCM16 samples from arbitrarily split byte chunks.
#[derive(Debug, Default)]
pub struct SampleAssembler {
    carry: Option<u8>,
}

impl SampleAssembler {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<i16> {
        let mut joined;
        let input = match self.carry.take() {
            Some(first) => {
                joined = Vec::with_capacity(bytes.len() + 1);
                joined.push(first);
                joined.extend_from_slice(bytes);
                &joined[..]
            }
            None => bytes,
        };
        let (samples, rest) = bytes_to_pcm16(input);
        self.carry = rest;
        samples
    }

    /// Drop any half sample at the end of a reply.
    pub fn reset(&mut self) {
        self.carry = None;
    }
}

impl AudioSource for Recorder {
    fn start(&mut self) -> Result<()> {
        Recorder::start(self)
    }

    fn stop(&mut self) -> Result<Vec<u8>> {
        Recorder::stop(self).map(|samples| pcm16_to_bytes(&samples))
    }

    fn is_recording(&self) -> bool {
        Recorder::is_recording(self)
    }
}

#[cfg(feature = "audio")]
mod imp {
    use std::collections::VecDeque;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread::{self, JoinHandle};

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleRate, StreamConfig};
    use tracing::{debug, error, info, warn};

    use super::SampleAssembler;
    use crate::error::Error;
    use crate::Result;

    fn mono(sample_rate: u32) -> StreamConfig {
        StreamConfig {
            channels: 1,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    }

    fn audio_err(e: impl std::fmt::Display) -> Error {
        Error::Audio(e.to_string())
    }

    struct Capture {
        stop: mpsc::Sender<()>,
        samples: Arc<Mutex<Vec<i16>>>,
        thread: JoinHandle<()>,
    }

    /// Microphone capture. cpal streams are not `Send`, so each recording
    /// owns its stream on a dedicated thread.
    pub struct Recorder {
        sample_rate: u32,
        capture: Option<Capture>,
    }

    impl Recorder {
        pub fn open(sample_rate: u32) -> Result<Self> {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| Error::Audio("No input device".to_string()))?;
            info!("Using input device: {}", device.name().unwrap_or_default());
            Ok(Self { sample_rate, capture: None })
        }

        pub fn is_recording(&self) -> bool {
            self.capture.is_some()
        }

        pub fn start(&mut self) -> Result<()> {
            if self.capture.is_some() {
                return Ok(());
            }
            let samples = Arc::new(Mutex::new(Vec::new()));
            let (stop, stop_rx) = mpsc::channel::<()>();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
            let sink = samples.clone();
            let sample_rate = self.sample_rate;

            let thread = thread::spawn(move || {
                let stream = match build_input(sample_rate, sink) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until `stop` sends or is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            });

            ready_rx
                .recv()
                .map_err(|_| Error::Audio("capture thread exited".to_string()))??;
            self.capture = Some(Capture { stop, samples, thread });
            debug!("Recording started at {} Hz", self.sample_rate);
            Ok(())
        }

        pub fn stop(&mut self) -> Result<Vec<i16>> {
            let Some(capture) = self.capture.take() else {
                return Ok(Vec::new());
            };
            let _ = capture.stop.send(());
            if capture.thread.join().is_err() {
                warn!("Capture thread panicked");
            }
            let samples = capture
                .samples
                .lock()
                .map(|mut s| std::mem::take(&mut *s))
                .map_err(|_| Error::Audio("capture buffer poisoned".to_string()))?;
            debug!("Recording stopped: {} samples", samples.len());
            Ok(samples)
        }
    }

    fn build_input(sample_rate: u32, samples: Arc<Mutex<Vec<i16>>>) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("No input device".to_string()))?;
        let stream = device
            .build_input_stream(
                &mono(sample_rate),
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = samples.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| error!("Input stream error: {}", err),
                None,
            )
            .map_err(audio_err)?;
        stream.play().map_err(audio_err)?;
        Ok(stream)
    }

    /// Speaker playback fed chunk by chunk.
    pub struct Speaker {
        chunks: Option<mpsc::Sender<Vec<i16>>>,
        assembler: SampleAssembler,
        thread: Option<JoinHandle<()>>,
    }

    impl Speaker {
        pub fn open(sample_rate: u32) -> Result<Self> {
            let (chunks, chunk_rx) = mpsc::channel::<Vec<i16>>();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
            let (done_tx, done_rx) = mpsc::channel::<()>();

            let thread = thread::spawn(move || {
                let stream = match build_output(sample_rate, chunk_rx, done_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // The callback signals once the sender is gone and the
                // buffer has drained.
                let _ = done_rx.recv();
                drop(stream);
            });

            ready_rx
                .recv()
                .map_err(|_| Error::Audio("playback thread exited".to_string()))??;
            Ok(Self {
                chunks: Some(chunks),
                assembler: SampleAssembler::default(),
                thread: Some(thread),
            })
        }

        pub fn play(&mut self, bytes: &[u8]) {
            let samples = self.assembler.push(bytes);
            if samples.is_empty() {
                return;
            }
            if let Some(chunks) = &self.chunks {
                if chunks.send(samples).is_err() {
                    warn!("Playback stream is gone");
                }
            }
        }

        pub fn finish(&mut self) {
            self.assembler.reset();
        }
    }

    impl Drop for Speaker {
        fn drop(&mut self) {
            self.chunks.take();
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }

    fn build_output(
        sample_rate: u32,
        chunks: mpsc::Receiver<Vec<i16>>,
        done: mpsc::Sender<()>,
    ) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("No output device".to_string()))?;
        info!("Using output device: {}", device.name().unwrap_or_default());

        let mut buffer: VecDeque<i16> = VecDeque::new();
        let stream = device
            .build_output_stream(
                &mono(sample_rate),
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let mut closed = false;
                    while buffer.len() < data.len() {
                        match chunks.try_recv() {
                            Ok(samples) => buffer.extend(samples),
                            Err(mpsc::TryRecvError::Empty) => break,
                            Err(mpsc::TryRecvError::Disconnected) => {
                                closed = true;
                                break;
                            }
                        }
                    }
                    for slot in data.iter_mut() {
                        *slot = buffer.pop_front().unwrap_or(0);
                    }
                    if closed && buffer.is_empty() {
                        let _ = done.send(());
                    }
                },
                |err| error!("Output stream error: {}", err),
                None,
            )
            .map_err(audio_err)?;
        stream.play().map_err(audio_err)?;
        Ok(stream)
    }
}

#[cfg(not(feature = "audio"))]
mod imp {
    use crate::error::Error;
    use crate::Result;

    fn unavailable() -> Error {
        Error::Audio("built without audio support (enable the `audio` feature)".to_string())
    }

    pub struct Recorder;

    impl Recorder {
        pub fn open(_sample_rate: u32) -> Result<Self> {
            Err(unavailable())
        }

        pub fn is_recording(&self) -> bool {
            false
        }

        pub fn start(&mut self) -> Result<()> {
            Err(unavailable())
        }

        pub fn stop(&mut self) -> Result<Vec<i16>> {
            Ok(Vec::new())
        }
    }

    pub struct Speaker;

    impl Speaker {
        pub fn open(_sample_rate: u32) -> Result<Self> {
            Err(unavailable())
        }

        pub fn play(&mut self, _bytes: &[u8]) {}

        pub fn finish(&mut self) {}
    }
}
