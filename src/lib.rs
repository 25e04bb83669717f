//! Parley - command-line client for realtime conversational sessions
//!
//! This library holds the session engine that talks to a realtime
//! conversational service over one WebSocket, the tools it dispatches
//! locally when the model asks for them, and the console/audio adapters.

pub mod adapters;
pub mod config;
pub mod error;
pub mod session;
pub mod tools;
pub mod ui;

pub use error::{Error, Result};
