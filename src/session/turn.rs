//! Turn state machine.
//!
//! Owns the conversation phase and context and decides, for each function
//! call and each tool result, how they move. It performs no I/O: the engine
//! feeds it decoded events and carries out what it returns.
//!
//! ```text
//! Initial --call--> Processing --lookup/fallback result--> Complete --delay--> Initial
//!                   Processing --discovery result--> Processing (helper tools)
//!                   Processing --plain reply, no call running--> Complete
//! ```

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ToolSetConfig;
use crate::error::Error;
use crate::tools::ToolRole;
use crate::Result;

use super::context::{ConversationContext, DialogLookup, QueryType};
use super::message::ConversationItem;
use super::phase::{instructions_for, ConversationPhase, ToolSetKind};

/// A tool invocation accepted for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub tool: String,
    pub role: ToolRole,
    pub params: Value,
    /// Dispatch counter value when the call was accepted.
    pub epoch: u64,
}

/// Outcome of a decoded function call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallDecision {
    Dispatch(Dispatch),
    /// Required argument missing or empty; dropped without a trace.
    MissingArgument,
    /// Argument blob was not valid JSON.
    MalformedArguments(String),
}

/// What the engine must do with a finished tool call, in order: append the
/// item, refresh the session and request a response, then schedule a reset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Completion {
    pub item: Option<ConversationItem>,
    pub follow_up: bool,
    pub reset_epoch: Option<u64>,
}

/// Parse a function-call argument blob.
pub fn parse_arguments(arguments: &str) -> Result<Value> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(arguments)
        .map_err(|e| Error::Decode(format!("invalid function arguments: {}", e)))
}

fn error_message(role: ToolRole) -> &'static str {
    match role {
        ToolRole::Discovery => "Error processing dialog chunks",
        ToolRole::Lookup => "Error getting weather information",
        ToolRole::Fallback => "Error executing input",
    }
}

/// Phase, context and the bookkeeping needed to validate late continuations.
#[derive(Debug, Clone)]
pub struct TurnMachine {
    phase: ConversationPhase,
    context: ConversationContext,
    epoch: u64,
    /// Dispatched calls whose results have not come back.
    in_flight: u32,
    tool_sets: ToolSetConfig,
}

impl TurnMachine {
    pub fn new(tool_sets: ToolSetConfig) -> Self {
        Self {
            phase: ConversationPhase::Initial,
            context: ConversationContext::default(),
            epoch: 0,
            in_flight: 0,
            tool_sets,
        }
    }

    pub fn phase(&self) -> ConversationPhase {
        self.phase
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Instruction text for the current phase and context.
    pub fn instructions(&self) -> String {
        instructions_for(self.phase, &self.context, &self.tool_sets.helper)
    }

    /// Tool names active in the current phase.
    pub fn active_tools(&self) -> &[String] {
        match self.phase.tool_set() {
            ToolSetKind::Initial => &self.tool_sets.initial,
            ToolSetKind::Helper => &self.tool_sets.helper,
        }
    }

    fn transition(&mut self, next: ConversationPhase) {
        if self.phase != next {
            info!("Conversation phase {} -> {}", self.phase, next);
            self.phase = next;
        }
    }

    /// Accept or drop a function call for a registered tool.
    ///
    /// On acceptance the context is updated for the tool's role and the phase
    /// moves to `Processing`. Nothing changes otherwise.
    pub fn begin_call(
        &mut self,
        tool: &str,
        role: ToolRole,
        argument_name: &str,
        arguments: &str,
    ) -> CallDecision {
        let mut params = match parse_arguments(arguments) {
            Ok(params) => params,
            Err(e) => return CallDecision::MalformedArguments(e.to_string()),
        };

        let argument = params
            .get(argument_name)
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if argument.is_empty() {
            debug!("Dropping {} call without '{}'", tool, argument_name);
            return CallDecision::MissingArgument;
        }
        params[argument_name] = Value::String(argument.clone());

        match role {
            ToolRole::Discovery => {
                self.context.query_type = Some(QueryType::Dialog);
            }
            ToolRole::Lookup => {
                self.context.subject = Some(argument);
                self.context.query_type = Some(QueryType::Weather);
            }
            ToolRole::Fallback => {
                self.context.intent = Some(argument);
                self.context.query_type = Some(QueryType::Dialog);
            }
        }
        self.epoch += 1;
        self.in_flight += 1;
        self.transition(ConversationPhase::Processing);

        CallDecision::Dispatch(Dispatch {
            tool: tool.to_string(),
            role,
            params,
            epoch: self.epoch,
        })
    }

    /// Fold a finished tool call back into the conversation.
    ///
    /// A result whose dispatch has since been superseded by a newer call is
    /// still injected, but moves neither phase nor context.
    pub fn complete_call(&mut self, dispatch: &Dispatch, result: Result<String>) -> Completion {
        self.in_flight = self.in_flight.saturating_sub(1);
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                warn!("Tool {} failed: {}", dispatch.tool, e);
                return Completion {
                    item: Some(ConversationItem::system(error_message(dispatch.role))),
                    follow_up: true,
                    reset_epoch: None,
                };
            }
        };

        if output.trim().is_empty() {
            debug!("Tool {} returned nothing", dispatch.tool);
            return Completion::default();
        }

        let current = dispatch.epoch == self.epoch && self.phase == ConversationPhase::Processing;
        if !current {
            info!(
                "Result of {} arrived after the conversation moved on ({}); injecting without transition",
                dispatch.tool, self.phase
            );
        }

        match dispatch.role {
            ToolRole::Discovery => {
                let lookup: DialogLookup = match serde_json::from_str(&output) {
                    Ok(lookup) => lookup,
                    Err(e) => {
                        warn!("Unreadable intent lookup result: {}", e);
                        return Completion::default();
                    }
                };
                if lookup.is_empty() {
                    return Completion::default();
                }
                if current {
                    self.context.dialog = Some(lookup);
                }
                Completion {
                    item: Some(ConversationItem::system(output)),
                    follow_up: true,
                    reset_epoch: None,
                }
            }
            ToolRole::Lookup | ToolRole::Fallback => {
                let item = if dispatch.role == ToolRole::Fallback {
                    ConversationItem::assistant(output)
                } else {
                    ConversationItem::system(output)
                };
                let reset_epoch = if current {
                    self.transition(ConversationPhase::Complete);
                    Some(dispatch.epoch)
                } else {
                    None
                };
                Completion {
                    item: Some(item),
                    follow_up: true,
                    reset_epoch,
                }
            }
        }
    }

    /// The model answered with a plain message. A turn left in `Processing`
    /// with no call running is complete; returns the epoch to reset on.
    pub fn finish_reply(&mut self) -> Option<u64> {
        if self.phase != ConversationPhase::Processing || self.in_flight > 0 {
            return None;
        }
        self.transition(ConversationPhase::Complete);
        Some(self.epoch)
    }

    /// Fire a scheduled reset. Only resets if the phase is still `Complete`
    /// for the same dispatch.
    pub fn reset_if_due(&mut self, epoch: u64) -> bool {
        if self.phase == ConversationPhase::Complete && self.epoch == epoch {
            self.transition(ConversationPhase::Initial);
            self.context.clear();
            true
        } else {
            debug!("Skipping stale phase reset for dispatch {}", epoch);
            false
        }
    }
}

/// Counts consecutive undecodable frames within one phase.
#[derive(Debug, Clone)]
pub struct DecodeGuard {
    limit: u32,
    failures: u32,
    phase: ConversationPhase,
}

impl DecodeGuard {
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            failures: 0,
            phase: ConversationPhase::Initial,
        }
    }

    /// Record a failure; returns true once the limit is reached.
    pub fn record_failure(&mut self, phase: ConversationPhase) -> bool {
        if phase != self.phase {
            self.phase = phase;
            self.failures = 0;
        }
        self.failures += 1;
        self.failures >= self.limit
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> TurnMachine {
        TurnMachine::new(ToolSetConfig::default())
    }

    fn dispatch(decision: CallDecision) -> Dispatch {
        match decision {
            CallDecision::Dispatch(d) => d,
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[test]
    fn test_weather_cycle_visits_every_phase() {
        let mut turns = machine();
        let mut seen = vec![turns.phase()];

        let call = dispatch(turns.begin_call("lookup_weather", ToolRole::Lookup, "city", r#"{"city":"Paris"}"#));
        seen.push(turns.phase());
        assert_eq!(call.params["city"], "Paris");
        assert_eq!(turns.context().subject.as_deref(), Some("Paris"));
        assert_eq!(turns.context().query_type, Some(QueryType::Weather));

        let report = "Current weather in Paris, France: 18°C, Clear sky. Humidity: 50%, Wind Speed: 5 km/h";
        let done = turns.complete_call(&call, Ok(report.to_string()));
        seen.push(turns.phase());
        assert_eq!(done.item, Some(ConversationItem::system(report)));
        assert!(done.follow_up);
        assert_eq!(done.reset_epoch, Some(call.epoch));

        assert!(turns.reset_if_due(call.epoch));
        seen.push(turns.phase());
        assert!(turns.context().is_empty());

        assert_eq!(
            seen,
            vec![
                ConversationPhase::Initial,
                ConversationPhase::Processing,
                ConversationPhase::Complete,
                ConversationPhase::Initial
            ]
        );
    }

    #[test]
    fn test_empty_argument_changes_nothing() {
        let mut turns = machine();
        let before = turns.clone();

        assert_eq!(
            turns.begin_call("lookup_weather", ToolRole::Lookup, "city", r#"{"city":""}"#),
            CallDecision::MissingArgument
        );
        assert_eq!(
            turns.begin_call("lookup_weather", ToolRole::Lookup, "city", r#"{}"#),
            CallDecision::MissingArgument
        );
        assert_eq!(turns.phase(), before.phase());
        assert_eq!(turns.context(), before.context());
        assert_eq!(turns.epoch(), before.epoch());
    }

    #[test]
    fn test_empty_argument_in_processing_keeps_processing() {
        let mut turns = machine();
        dispatch(turns.begin_call("lookup_intents", ToolRole::Discovery, "query", r#"{"query":"hi"}"#));
        assert_eq!(
            turns.begin_call("lookup_weather", ToolRole::Lookup, "city", r#"{"city":"  "}"#),
            CallDecision::MissingArgument
        );
        assert_eq!(turns.phase(), ConversationPhase::Processing);
    }

    #[test]
    fn test_malformed_arguments_are_recoverable() {
        let mut turns = machine();
        let decision = turns.begin_call("lookup_weather", ToolRole::Lookup, "city", "{city: Paris");
        assert!(matches!(decision, CallDecision::MalformedArguments(_)));
        assert_eq!(turns.phase(), ConversationPhase::Initial);
    }

    #[test]
    fn test_discovery_narrows_tools_and_stays_processing() {
        let mut turns = machine();
        assert_eq!(turns.active_tools(), ["lookup_intents", "execute_intent"]);

        let call = dispatch(turns.begin_call("lookup_intents", ToolRole::Discovery, "query", r#"{"query":"weather"}"#));
        let done = turns.complete_call(&call, Ok(r#"{"dialogNames":["weather"]}"#.to_string()));

        assert_eq!(turns.phase(), ConversationPhase::Processing);
        assert_eq!(turns.active_tools(), ["lookup_weather", "execute_intent"]);
        assert!(turns.instructions().contains("use lookup_weather function"));
        assert_eq!(done.reset_epoch, None);
        assert!(done.follow_up);
        assert_eq!(
            turns.context().dialog.as_ref().map(|d| d.dialog_names.clone()),
            Some(vec!["weather".to_string()])
        );
    }

    #[test]
    fn test_plain_reply_after_discovery_ends_turn() {
        let mut turns = machine();
        let call = dispatch(turns.begin_call("lookup_intents", ToolRole::Discovery, "query", r#"{"query":"joke"}"#));

        // Reply while the lookup is still running does not end the turn.
        assert_eq!(turns.finish_reply(), None);
        assert_eq!(turns.phase(), ConversationPhase::Processing);

        turns.complete_call(&call, Ok(r#"{"dialogNames":["weather"]}"#.to_string()));
        let epoch = turns.finish_reply();
        assert_eq!(epoch, Some(call.epoch));
        assert_eq!(turns.phase(), ConversationPhase::Complete);

        assert!(turns.reset_if_due(call.epoch));
        assert_eq!(turns.phase(), ConversationPhase::Initial);
        assert_eq!(turns.active_tools(), ["lookup_intents", "execute_intent"]);
        assert!(turns.context().is_empty());
    }

    #[test]
    fn test_plain_reply_outside_processing_is_ignored() {
        let mut turns = machine();
        assert_eq!(turns.finish_reply(), None);
        assert_eq!(turns.phase(), ConversationPhase::Initial);

        let call = dispatch(turns.begin_call("lookup_weather", ToolRole::Lookup, "city", r#"{"city":"Paris"}"#));
        turns.complete_call(&call, Ok("report".to_string()));
        assert_eq!(turns.finish_reply(), None);
        assert_eq!(turns.phase(), ConversationPhase::Complete);
    }

    #[test]
    fn test_dispatched_argument_is_trimmed() {
        let mut turns = machine();
        let call = dispatch(turns.begin_call("lookup_weather", ToolRole::Lookup, "city", r#"{"city":"  Paris "}"#));
        assert_eq!(call.params["city"], "Paris");
        assert_eq!(turns.context().subject.as_deref(), Some("Paris"));
    }

    #[test]
    fn test_empty_discovery_is_silent() {
        let mut turns = machine();
        let call = dispatch(turns.begin_call("lookup_intents", ToolRole::Discovery, "query", r#"{"query":"?"}"#));
        assert_eq!(turns.complete_call(&call, Ok(String::new())), Completion::default());
        assert_eq!(turns.complete_call(&call, Ok(r#"{"dialogNames":[]}"#.to_string())), Completion::default());
        assert!(turns.context().dialog.is_none());
    }

    #[test]
    fn test_fallback_result_is_assistant_item() {
        let mut turns = machine();
        let call = dispatch(turns.begin_call("execute_intent", ToolRole::Fallback, "intent", r#"{"intent":"showBanner"}"#));
        assert_eq!(turns.context().intent.as_deref(), Some("showBanner"));

        let done = turns.complete_call(&call, Ok("Executed intent: showBanner.".to_string()));
        assert_eq!(done.item, Some(ConversationItem::assistant("Executed intent: showBanner.")));
        assert_eq!(turns.phase(), ConversationPhase::Complete);
        assert_eq!(turns.instructions(), instructions_for(ConversationPhase::Complete, turns.context(), &[]));
    }

    #[test]
    fn test_tool_error_stays_in_place() {
        let mut turns = machine();
        let call = dispatch(turns.begin_call("lookup_weather", ToolRole::Lookup, "city", r#"{"city":"Paris"}"#));
        let done = turns.complete_call(&call, Err(Error::Tool("boom".to_string())));

        assert_eq!(turns.phase(), ConversationPhase::Processing);
        assert_eq!(done.item, Some(ConversationItem::system("Error getting weather information")));
        assert!(done.follow_up);
        assert_eq!(done.reset_epoch, None);
    }

    #[test]
    fn test_superseded_result_does_not_transition() {
        let mut turns = machine();
        let first = dispatch(turns.begin_call("lookup_weather", ToolRole::Lookup, "city", r#"{"city":"Paris"}"#));
        let second = dispatch(turns.begin_call("lookup_weather", ToolRole::Lookup, "city", r#"{"city":"Rome"}"#));

        let late = turns.complete_call(&first, Ok("Paris report".to_string()));
        assert!(late.item.is_some());
        assert_eq!(late.reset_epoch, None);
        assert_eq!(turns.phase(), ConversationPhase::Processing);

        let fresh = turns.complete_call(&second, Ok("Rome report".to_string()));
        assert_eq!(fresh.reset_epoch, Some(second.epoch));
        assert_eq!(turns.phase(), ConversationPhase::Complete);
    }

    #[test]
    fn test_stale_reset_is_ignored() {
        let mut turns = machine();
        let first = dispatch(turns.begin_call("lookup_weather", ToolRole::Lookup, "city", r#"{"city":"Paris"}"#));
        turns.complete_call(&first, Ok("report".to_string()));

        // A new call lands before the timer fires.
        dispatch(turns.begin_call("execute_intent", ToolRole::Fallback, "intent", r#"{"intent":"x"}"#));
        assert!(!turns.reset_if_due(first.epoch));
        assert_eq!(turns.phase(), ConversationPhase::Processing);
        assert_eq!(turns.context().intent.as_deref(), Some("x"));
    }

    #[test]
    fn test_every_phase_event_pair_is_defined() {
        let payloads = [
            (ToolRole::Discovery, "query", r#"{"query":"q"}"#),
            (ToolRole::Lookup, "city", r#"{"city":"c"}"#),
            (ToolRole::Fallback, "intent", r#"{"intent":"i"}"#),
        ];
        for (role, arg, args) in payloads {
            for results in [Ok("x".to_string()), Err(Error::Tool("e".to_string()))] {
                let mut turns = machine();
                let call = dispatch(turns.begin_call("t", role, arg, args));
                turns.complete_call(&call, results);
                turns.reset_if_due(call.epoch);
                assert!(matches!(
                    turns.phase(),
                    ConversationPhase::Initial | ConversationPhase::Processing | ConversationPhase::Complete
                ));
                assert!(!turns.instructions().is_empty());
                assert!(!turns.active_tools().is_empty());
            }
        }
    }

    #[test]
    fn test_decode_guard_counts_per_phase() {
        let mut guard = DecodeGuard::new(3);
        assert!(!guard.record_failure(ConversationPhase::Initial));
        assert!(!guard.record_failure(ConversationPhase::Initial));
        // Phase change restarts the count.
        assert!(!guard.record_failure(ConversationPhase::Processing));
        assert_eq!(guard.failures(), 1);
        guard.record_success();
        assert!(!guard.record_failure(ConversationPhase::Processing));
        assert!(!guard.record_failure(ConversationPhase::Processing));
        assert!(guard.record_failure(ConversationPhase::Processing));
    }
}
