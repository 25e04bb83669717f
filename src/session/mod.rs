//! Realtime session: wire protocol, turn state and the engine driving them.

mod context;
mod engine;
mod message;
mod phase;
pub mod protocol;
pub mod transport;
mod turn;

pub use context::{ConversationContext, DialogLookup, QueryType};
pub use engine::{EngineOptions, SessionEngine};
pub use message::{ContentKind, ConversationItem, Role};
pub use phase::{instructions_for, ConversationPhase, ToolSetKind};
pub use protocol::{ClientEvent, ServerEvent, SessionSettings};
pub use transport::{Connection, Connector, WebSocketConnector};
pub use turn::{CallDecision, Completion, DecodeGuard, Dispatch, TurnMachine};
