//! Session engine.
//!
//! A single task owns the connection, the turn machine and the output sink.
//! It waits on three sources at once: frames from the server, user input,
//! and continuations (finished tool calls and phase-reset timers) posted by
//! tasks it spawned. Tool calls never block the loop; their results come
//! back as continuations.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::adapters::{AudioSource, OutputSink, UserInput};
use crate::config::{Config, ToolSetConfig};
use crate::tools::{Tool, ToolRunner};
use crate::Result;

use super::context::ConversationContext;
use super::message::ConversationItem;
use super::phase::ConversationPhase;
use super::protocol::{
    decode_frame, encode, ClientEvent, ResponseOutput, ResponseStatus, ServerEvent, SessionSettings,
};
use super::transport::{Connection, Connector};
use super::turn::{CallDecision, DecodeGuard, Dispatch, TurnMachine};

/// Tunables for one engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub settings: SessionSettings,
    pub tool_sets: ToolSetConfig,
    pub phase_reset: Duration,
    pub reconnect_delay: Duration,
    pub max_decode_failures: u32,
}

impl EngineOptions {
    pub fn from_config(config: &Config, voice: bool) -> Self {
        Self {
            settings: SessionSettings::from_config(config, voice),
            tool_sets: config.tools.clone(),
            phase_reset: Duration::from_millis(config.phase_reset_ms),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            max_decode_failures: config.max_decode_failures,
        }
    }
}

enum Continuation {
    ToolFinished { dispatch: Dispatch, result: Result<String> },
    PhaseReset { epoch: u64 },
}

enum Wake {
    Frame(Option<Result<String>>),
    Continuation(Continuation),
    Input(Option<UserInput>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Reconnect,
    Exit,
}

/// Per-connection state. Rebuilt on every reconnect.
struct Session<T> {
    connection: T,
    pending_response: bool,
    /// `event_id` of the `response.create` behind `pending_response`.
    response_event: Option<String>,
    /// At most one response request waits behind the pending one.
    deferred_response: Option<Option<String>>,
    /// Instructions and tool set last pushed with `session.update`.
    pushed: Option<String>,
    decode: DecodeGuard,
}

impl<T: Connection> Session<T> {
    fn new(connection: T, max_decode_failures: u32) -> Self {
        Self {
            connection,
            pending_response: false,
            response_event: None,
            deferred_response: None,
            pushed: None,
            decode: DecodeGuard::new(max_decode_failures),
        }
    }

    async fn send(&mut self, event: &ClientEvent) -> Result<()> {
        debug!("-> {}", event.event_type());
        self.connection.send(encode(event)?).await
    }
}

/// Drives one conversation over a [`Connector`].
pub struct SessionEngine<C: Connector> {
    connector: C,
    tools: Arc<ToolRunner>,
    turns: TurnMachine,
    sink: Box<dyn OutputSink>,
    recorder: Option<Box<dyn AudioSource>>,
    options: EngineOptions,
    continuations_tx: mpsc::UnboundedSender<Continuation>,
    continuations_rx: mpsc::UnboundedReceiver<Continuation>,
}

impl<C: Connector> SessionEngine<C> {
    pub fn new(connector: C, tools: ToolRunner, sink: Box<dyn OutputSink>, options: EngineOptions) -> Self {
        let (continuations_tx, continuations_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            tools: Arc::new(tools),
            turns: TurnMachine::new(options.tool_sets.clone()),
            sink,
            recorder: None,
            options,
            continuations_tx,
            continuations_rx,
        }
    }

    /// Attach a microphone for `r` toggling.
    pub fn with_recorder(mut self, recorder: Box<dyn AudioSource>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn phase(&self) -> ConversationPhase {
        self.turns.phase()
    }

    pub fn context(&self) -> &ConversationContext {
        self.turns.context()
    }

    /// Run until the user exits or the input stream ends.
    ///
    /// `first` is submitted as soon as the first session is open. A lost
    /// connection is reopened after the reconnect delay; phase and context
    /// survive the reconnect.
    pub async fn run(&mut self, mut input: mpsc::Receiver<UserInput>, mut first: Option<UserInput>) -> Result<()> {
        loop {
            let mut session = match self.open().await {
                Ok(session) => session,
                Err(e) => {
                    error!("Failed to open session: {}", e);
                    self.sink.error(&format!("Connection failed: {}", e));
                    if self.wait_before_reconnect(&mut input).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            let flow = match first.take() {
                Some(user) => settle(self.on_input(&mut session, Some(user)).await),
                None => {
                    self.sink.prompt();
                    Flow::Continue
                }
            };
            let flow = match flow {
                Flow::Continue => self.pump(&mut session, &mut input).await,
                other => other,
            };

            if let Err(e) = session.connection.close().await {
                debug!("Close failed: {}", e);
            }
            match flow {
                Flow::Exit => {
                    info!("Session closed by user");
                    return Ok(());
                }
                _ => {
                    warn!(
                        "Session lost; reconnecting in {:?} with phase {} kept",
                        self.options.reconnect_delay,
                        self.turns.phase()
                    );
                    if self.wait_before_reconnect(&mut input).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn open(&mut self) -> Result<Session<C::Connection>> {
        let connection = self.connector.connect().await?;
        let mut session = Session::new(connection, self.options.max_decode_failures);
        if self.turns.phase() != ConversationPhase::Initial {
            warn!("Reopening session mid-conversation in phase {}", self.turns.phase());
        }
        self.sync_session(&mut session).await?;
        Ok(session)
    }

    /// Sleep out the reconnect delay. Returns true if the user left meanwhile.
    async fn wait_before_reconnect(&mut self, input: &mut mpsc::Receiver<UserInput>) -> bool {
        let delay = tokio::time::sleep(self.options.reconnect_delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => return false,
                user = input.recv() => match user {
                    None | Some(UserInput::Exit) => return true,
                    Some(UserInput::Text(text)) if is_exit(&text) => return true,
                    Some(_) => self.sink.notice("Reconnecting; input dropped"),
                },
            }
        }
    }

    async fn pump(&mut self, session: &mut Session<C::Connection>, input: &mut mpsc::Receiver<UserInput>) -> Flow {
        loop {
            let wake = tokio::select! {
                frame = session.connection.recv() => Wake::Frame(frame),
                Some(continuation) = self.continuations_rx.recv() => Wake::Continuation(continuation),
                user = input.recv() => Wake::Input(user),
            };

            let result = match wake {
                Wake::Frame(None) => {
                    warn!("Connection closed by server");
                    Ok(Flow::Reconnect)
                }
                Wake::Frame(Some(Err(e))) => {
                    warn!("Transport error: {}", e);
                    Ok(Flow::Reconnect)
                }
                Wake::Frame(Some(Ok(raw))) => self.on_frame(session, raw).await,
                Wake::Continuation(continuation) => self.on_continuation(session, continuation).await,
                Wake::Input(user) => self.on_input(session, user).await,
            };

            let flow = settle(result);
            if flow != Flow::Continue {
                return flow;
            }
        }
    }

    /// Push `session.update` if instructions or tool set changed since the
    /// last push on this connection.
    async fn sync_session(&mut self, session: &mut Session<C::Connection>) -> Result<()> {
        let instructions = self.turns.instructions();
        let names = self.turns.active_tools().to_vec();
        let fingerprint = format!("{}\n{}", names.join(","), instructions);
        if session.pushed.as_deref() == Some(fingerprint.as_str()) {
            return Ok(());
        }

        let tools = self.tools.definitions_for(&names);
        let event = ClientEvent::session_update(instructions, tools, &self.options.settings);
        session.send(&event).await?;
        info!("Session updated for phase {} (tools: {})", self.turns.phase(), names.join(", "));
        session.pushed = Some(fingerprint);
        Ok(())
    }

    /// Ask for a response, or queue the request behind the pending one.
    async fn request_response(&mut self, session: &mut Session<C::Connection>, instructions: Option<String>) -> Result<()> {
        if session.pending_response {
            debug!("Response already pending; deferring request");
            session.deferred_response = Some(instructions);
            return Ok(());
        }
        let event = ClientEvent::response_request(instructions, &self.options.settings);
        session.send(&event).await?;
        session.pending_response = true;
        session.response_event = Some(event.event_id().to_string());
        Ok(())
    }

    async fn release_deferred(&mut self, session: &mut Session<C::Connection>) -> Result<()> {
        if session.pending_response {
            return Ok(());
        }
        if let Some(instructions) = session.deferred_response.take() {
            debug!("Sending deferred response request");
            self.sync_session(session).await?;
            self.request_response(session, instructions).await?;
        }
        Ok(())
    }

    async fn submit(&mut self, session: &mut Session<C::Connection>, item: ConversationItem) -> Result<()> {
        self.sync_session(session).await?;
        session.send(&ClientEvent::conversation_item(&item)).await?;
        self.request_response(session, None).await
    }

    async fn on_input(&mut self, session: &mut Session<C::Connection>, user: Option<UserInput>) -> Result<Flow> {
        match user {
            None | Some(UserInput::Exit) => return Ok(Flow::Exit),
            Some(UserInput::Text(text)) => {
                if is_exit(&text) {
                    return Ok(Flow::Exit);
                }
                let text = text.trim();
                if text.is_empty() {
                    self.sink.prompt();
                } else {
                    self.submit(session, ConversationItem::user_text(text)).await?;
                }
            }
            Some(UserInput::Audio(bytes)) => self.submit_audio(session, bytes).await?,
            Some(UserInput::ToggleRecording) => self.toggle_recording(session).await?,
        }
        Ok(Flow::Continue)
    }

    async fn submit_audio(&mut self, session: &mut Session<C::Connection>, bytes: Vec<u8>) -> Result<()> {
        if bytes.is_empty() {
            self.sink.notice("No audio captured");
            self.sink.prompt();
            return Ok(());
        }
        info!("Submitting {} bytes of audio", bytes.len());
        let encoded = general_purpose::STANDARD.encode(&bytes);
        self.submit(session, ConversationItem::user_audio(encoded)).await
    }

    async fn toggle_recording(&mut self, session: &mut Session<C::Connection>) -> Result<()> {
        let Some(recorder) = self.recorder.as_mut() else {
            self.sink.error("Voice input is not available");
            self.sink.prompt();
            return Ok(());
        };

        if recorder.is_recording() {
            let captured = recorder.stop();
            self.sink.notice("Recording stopped");
            match captured {
                Ok(bytes) => self.submit_audio(session, bytes).await?,
                Err(e) => {
                    error!("Stopping capture failed: {}", e);
                    self.sink.error(&e.to_string());
                    self.sink.prompt();
                }
            }
        } else if session.pending_response {
            self.sink.notice("Wait for the current response to finish before recording");
        } else {
            match recorder.start() {
                Ok(()) => self.sink.notice("Recording... press r to stop"),
                Err(e) => {
                    error!("Starting capture failed: {}", e);
                    self.sink.error(&e.to_string());
                    self.sink.prompt();
                }
            }
        }
        Ok(())
    }

    async fn on_frame(&mut self, session: &mut Session<C::Connection>, raw: String) -> Result<Flow> {
        let event = match decode_frame(&raw) {
            Ok(event) => {
                debug!("<- {}", event.event_type());
                session.decode.record_success();
                event
            }
            Err(e) => {
                warn!("Dropping undecodable frame: {}", e);
                if session.decode.record_failure(self.turns.phase()) {
                    error!("{} consecutive undecodable frames; reopening session", session.decode.failures());
                    self.sink.error("Lost sync with the server; reconnecting");
                    return Ok(Flow::Reconnect);
                }
                self.sink.prompt();
                return Ok(Flow::Continue);
            }
        };

        let race = event.is_active_response_race();
        match event {
            ServerEvent::Error { .. } if race => {
                debug!("Ignoring active-response race");
            }
            ServerEvent::Error { message, event_id } => {
                error!("Server error: {} (event {:?})", message, event_id);
                self.sink.error(&message);
                // Only a rejected response.create ends the pending response.
                if event_id.is_some() && event_id == session.response_event {
                    session.pending_response = false;
                    session.response_event = None;
                    self.release_deferred(session).await?;
                }
                self.sink.prompt();
            }
            ServerEvent::TranscriptDone { text } => self.sink.text(&text),
            ServerEvent::AudioDelta { bytes } => self.sink.audio(&bytes),
            ServerEvent::AudioDone => {
                self.sink.audio_end();
                self.sink.prompt();
            }
            ServerEvent::ResponseDone { status, output, status_details } => {
                session.pending_response = false;
                session.response_event = None;
                self.on_response_done(session, status, output, status_details).await?;
                self.release_deferred(session).await?;
            }
            ServerEvent::ItemCreated(item) => {
                debug!("Server created {:?} item ({:?})", item.role(), item.kind());
            }
            ServerEvent::Ignored { .. } => {}
        }
        Ok(Flow::Continue)
    }

    async fn on_response_done(
        &mut self,
        session: &mut Session<C::Connection>,
        status: ResponseStatus,
        output: Option<ResponseOutput>,
        status_details: Option<Value>,
    ) -> Result<()> {
        if status == ResponseStatus::Failed {
            error!("Response failed: {}", status_details.as_ref().map(|d| d.to_string()).unwrap_or_default());
            let reason = status_details
                .as_ref()
                .and_then(|d| d.pointer("/error/message"))
                .and_then(Value::as_str)
                .unwrap_or("Response failed");
            self.sink.error(reason);
            self.sink.prompt();
            return Ok(());
        }

        match output {
            Some(ResponseOutput::FunctionCall { name, arguments, call_id }) => {
                debug!("Function call {} ({:?})", name, call_id);
                self.on_function_call(session, &name, &arguments).await?;
            }
            Some(ResponseOutput::Message { text: Some(text) }) => {
                self.settle_turn();
                self.sink.text(&text);
                if !self.options.settings.voice_enabled() {
                    self.sink.prompt();
                }
            }
            // Spoken replies arrive as transcript and audio frames.
            Some(ResponseOutput::Message { text: None }) if self.options.settings.voice_enabled() => {
                self.settle_turn();
            }
            _ => {
                warn!("No valid response content found");
                self.sink.prompt();
            }
        }
        Ok(())
    }

    async fn on_function_call(&mut self, session: &mut Session<C::Connection>, name: &str, arguments: &str) -> Result<()> {
        let Some(tool) = self.tools.get(name) else {
            warn!("Model called unknown tool: {}", name);
            self.sink.prompt();
            return Ok(());
        };

        match self.turns.begin_call(name, tool.role(), tool.argument(), arguments) {
            CallDecision::Dispatch(dispatch) => {
                info!("Dispatching {} (phase {})", name, self.turns.phase());
                self.spawn_tool(tool, dispatch);
            }
            CallDecision::MissingArgument => self.sink.prompt(),
            CallDecision::MalformedArguments(reason) => {
                warn!("Bad arguments for {}: {}", name, reason);
                let item = ConversationItem::system("Error parsing function arguments");
                session.send(&ClientEvent::conversation_item(&item)).await?;
                self.request_response(session, None).await?;
            }
        }
        Ok(())
    }

    /// A plain reply ends the turn. Schedule the reset if no tool call is
    /// still running.
    fn settle_turn(&mut self) {
        if let Some(epoch) = self.turns.finish_reply() {
            self.schedule_reset(epoch);
        }
    }

    fn spawn_tool(&self, tool: Arc<dyn Tool>, dispatch: Dispatch) {
        let tx = self.continuations_tx.clone();
        tokio::spawn(async move {
            let result = tool.execute(dispatch.params.clone()).await;
            let _ = tx.send(Continuation::ToolFinished { dispatch, result });
        });
    }

    fn schedule_reset(&self, epoch: u64) {
        let tx = self.continuations_tx.clone();
        let delay = self.options.phase_reset;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Continuation::PhaseReset { epoch });
        });
    }

    async fn on_continuation(&mut self, session: &mut Session<C::Connection>, continuation: Continuation) -> Result<Flow> {
        match continuation {
            Continuation::ToolFinished { dispatch, result } => {
                let completion = self.turns.complete_call(&dispatch, result);
                match &completion.item {
                    Some(item) => session.send(&ClientEvent::conversation_item(item)).await?,
                    None => self.sink.prompt(),
                }
                if completion.follow_up {
                    self.sync_session(session).await?;
                    self.request_response(session, None).await?;
                }
                if let Some(epoch) = completion.reset_epoch {
                    self.schedule_reset(epoch);
                }
            }
            Continuation::PhaseReset { epoch } => {
                self.turns.reset_if_due(epoch);
            }
        }
        Ok(Flow::Continue)
    }
}

/// A failed send means the connection is gone.
fn settle(result: Result<Flow>) -> Flow {
    result.unwrap_or_else(|e| {
        warn!("Session error: {}", e);
        Flow::Reconnect
    })
}

fn is_exit(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("exit")
}
