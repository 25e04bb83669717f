//! Realtime wire protocol: outbound client events and inbound server events.
//!
//! Every logical event is exactly one JSON text frame. Outbound events are
//! built with the [`ClientEvent`] constructors and serialized with
//! [`encode`]; inbound frames are parsed with [`decode_frame`], which maps the
//! handful of frame types the engine cares about onto [`ServerEvent`] and
//! reports everything else as [`ServerEvent::Ignored`].

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{Config, TurnDetectionConfig};
use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

use super::message::{ContentKind, ConversationItem, Role};

/// Error message the service sends when a response is requested while one is
/// still being generated.
pub const ACTIVE_RESPONSE_ERROR: &str = "Conversation already has an active response";

/// Output modalities requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

/// Voice-specific session fields, present only in audio mode.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSettings {
    pub voice: String,
    pub audio_format: String,
    pub transcription_model: String,
    pub turn_detection: TurnDetectionConfig,
}

/// Modality configuration shared by every frame of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub voice: Option<VoiceSettings>,
}

impl SessionSettings {
    /// Text-only settings.
    pub fn text(temperature: f32) -> Self {
        Self {
            temperature,
            max_output_tokens: 4096,
            voice: None,
        }
    }

    pub fn from_config(config: &Config, voice_enabled: bool) -> Self {
        let voice = voice_enabled.then(|| VoiceSettings {
            voice: config.voice.voice.clone(),
            audio_format: config.voice.audio_format.clone(),
            transcription_model: config.voice.transcription_model.clone(),
            turn_detection: config.voice.turn_detection.clone(),
        });
        Self {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            voice,
        }
    }

    pub fn voice_enabled(&self) -> bool {
        self.voice.is_some()
    }

    pub fn modalities(&self) -> Vec<Modality> {
        if self.voice_enabled() {
            vec![Modality::Text, Modality::Audio]
        } else {
            vec![Modality::Text]
        }
    }
}

/// Tool entry in a session update.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeTool {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    definition: ToolDefinition,
}

impl From<ToolDefinition> for RealtimeTool {
    fn from(definition: ToolDefinition) -> Self {
        Self { kind: "function", definition }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Transcription {
    pub model: String,
}

/// Body of a `session.update` frame.
#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    pub instructions: String,
    pub temperature: f32,
    pub modalities: Vec<Modality>,
    pub tools: Vec<RealtimeTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Transcription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetectionConfig>,
}

/// Body of a `response.create` frame.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub tool_choice: &'static str,
    pub modalities: Vec<Modality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// A conversation item as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: Role,
    pub content: Vec<WireContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireContent {
    InputText { text: String },
    InputAudio { audio: String },
    Text { text: String },
}

impl From<&ConversationItem> for WireItem {
    fn from(item: &ConversationItem) -> Self {
        let content = item.content().to_string();
        let part = match item.kind() {
            ContentKind::InputText => WireContent::InputText { text: content },
            ContentKind::InputAudio => WireContent::InputAudio { audio: content },
            ContentKind::Text => WireContent::Text { text: content },
        };
        Self {
            kind: "message".to_string(),
            role: item.role(),
            content: vec![part],
        }
    }
}

impl TryFrom<WireItem> for ConversationItem {
    type Error = Error;

    fn try_from(item: WireItem) -> Result<Self> {
        let part = item
            .content
            .into_iter()
            .next()
            .ok_or_else(|| Error::Decode("conversation item has no content".to_string()))?;
        let (kind, content) = match part {
            WireContent::InputText { text } => (ContentKind::InputText, text),
            WireContent::InputAudio { audio } => (ContentKind::InputAudio, audio),
            WireContent::Text { text } => (ContentKind::Text, text),
        };
        Ok(ConversationItem::new(item.role, kind, content))
    }
}

/// Outbound event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate {
        event_id: String,
        session: Box<SessionConfig>,
    },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { event_id: String, item: WireItem },

    #[serde(rename = "response.create")]
    ResponseCreate {
        event_id: String,
        response: ResponseParams,
    },
}

fn new_event_id() -> String {
    format!("evt_{}", uuid::Uuid::new_v4().simple())
}

impl ClientEvent {
    /// Control frame fixing instructions, temperature, modalities and tools.
    pub fn session_update(
        instructions: impl Into<String>,
        tools: Vec<ToolDefinition>,
        settings: &SessionSettings,
    ) -> Self {
        let voice = settings.voice.as_ref();
        let session = SessionConfig {
            instructions: instructions.into(),
            temperature: settings.temperature,
            modalities: settings.modalities(),
            tools: tools.into_iter().map(RealtimeTool::from).collect(),
            voice: voice.map(|v| v.voice.clone()),
            input_audio_format: voice.map(|v| v.audio_format.clone()),
            input_audio_transcription: voice.map(|v| Transcription {
                model: v.transcription_model.clone(),
            }),
            turn_detection: voice.map(|v| v.turn_detection.clone()),
        };
        ClientEvent::SessionUpdate {
            event_id: new_event_id(),
            session: Box::new(session),
        }
    }

    pub fn conversation_item(item: &ConversationItem) -> Self {
        ClientEvent::ConversationItemCreate {
            event_id: new_event_id(),
            item: WireItem::from(item),
        }
    }

    /// Request generation. Audio mode also pins voice, format, temperature
    /// and output length.
    pub fn response_request(instructions: Option<String>, settings: &SessionSettings) -> Self {
        let voice = settings.voice.as_ref();
        let response = ResponseParams {
            instructions,
            tool_choice: "auto",
            modalities: settings.modalities(),
            voice: voice.map(|v| v.voice.clone()),
            output_audio_format: voice.map(|v| v.audio_format.clone()),
            temperature: voice.map(|_| settings.temperature),
            max_output_tokens: voice.map(|_| settings.max_output_tokens),
        };
        ClientEvent::ResponseCreate {
            event_id: new_event_id(),
            response,
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            ClientEvent::SessionUpdate { event_id, .. }
            | ClientEvent::ConversationItemCreate { event_id, .. }
            | ClientEvent::ResponseCreate { event_id, .. } => event_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate { .. } => "response.create",
        }
    }
}

/// Serialize an outbound event into one wire frame.
pub fn encode(event: &ClientEvent) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}

/// Terminal status of a generated response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Completed,
    Cancelled,
    Failed,
    Incomplete,
    InProgress,
    #[serde(other)]
    Unknown,
}

/// First output item of a finished response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutput {
    FunctionCall {
        name: String,
        /// Raw JSON argument string, parsed at dispatch time.
        arguments: String,
        call_id: Option<String>,
    },
    Message {
        text: Option<String>,
    },
    Other {
        kind: String,
    },
}

/// Decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Error {
        message: String,
        /// Client event the server rejected, when it says which.
        event_id: Option<String>,
    },
    TranscriptDone {
        text: String,
    },
    AudioDelta {
        bytes: Vec<u8>,
    },
    AudioDone,
    ResponseDone {
        status: ResponseStatus,
        output: Option<ResponseOutput>,
        status_details: Option<Value>,
    },
    /// Server echo of a created conversation item.
    ItemCreated(ConversationItem),
    /// Frame type the engine does not act on.
    Ignored {
        event_type: String,
    },
}

impl ServerEvent {
    /// Wire type the event was decoded from.
    pub fn event_type(&self) -> &str {
        match self {
            ServerEvent::Error { .. } => "error",
            ServerEvent::TranscriptDone { .. } => "response.audio_transcript.done",
            ServerEvent::AudioDelta { .. } => "response.audio.delta",
            ServerEvent::AudioDone => "response.audio.done",
            ServerEvent::ResponseDone { .. } => "response.done",
            ServerEvent::ItemCreated(_) => "conversation.item.created",
            ServerEvent::Ignored { event_type } => event_type,
        }
    }

    pub fn is_active_response_race(&self) -> bool {
        matches!(self, ServerEvent::Error { message, .. } if message == ACTIVE_RESPONSE_ERROR)
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum RawServerEvent {
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: RawError,
    },
    #[serde(rename = "response.audio_transcript.done")]
    TranscriptDone {
        #[serde(default)]
        transcript: String,
    },
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },
    #[serde(rename = "response.audio.done")]
    AudioDone {},
    #[serde(rename = "response.done")]
    ResponseDone { response: RawResponse },
    #[serde(rename = "conversation.item.created")]
    ItemCreated { item: Value },
    #[serde(other)]
    Unknown,
}

#[derive(Default, Deserialize)]
struct RawError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    event_id: Option<String>,
}

#[derive(Deserialize)]
struct RawResponse {
    status: ResponseStatus,
    #[serde(default)]
    output: Vec<RawOutputItem>,
    #[serde(default)]
    status_details: Option<Value>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum RawOutputItem {
    #[serde(rename = "function_call")]
    FunctionCall {
        name: String,
        #[serde(default)]
        arguments: String,
        #[serde(default)]
        call_id: Option<String>,
    },
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        content: Vec<RawContentPart>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct RawContentPart {
    #[serde(default)]
    text: Option<String>,
}

/// Parse one inbound frame.
///
/// Malformed JSON, a missing `type`, or a known type with a malformed body is
/// an [`Error::Decode`]. Unknown types decode to [`ServerEvent::Ignored`].
pub fn decode_frame(raw: &str) -> Result<ServerEvent> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Error::Decode(format!("invalid JSON frame: {}", e)))?;
    let event_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Decode("frame has no type".to_string()))?
        .to_string();

    let parsed: RawServerEvent = serde_json::from_value(value)
        .map_err(|e| Error::Decode(format!("malformed {} frame: {}", event_type, e)))?;

    let event = match parsed {
        RawServerEvent::Error { error } => ServerEvent::Error {
            message: error.message,
            event_id: error.event_id,
        },
        RawServerEvent::TranscriptDone { transcript } => ServerEvent::TranscriptDone { text: transcript },
        RawServerEvent::AudioDelta { delta } => {
            let bytes = general_purpose::STANDARD
                .decode(delta.as_bytes())
                .map_err(|e| Error::Decode(format!("invalid audio delta: {}", e)))?;
            ServerEvent::AudioDelta { bytes }
        }
        RawServerEvent::AudioDone {} => ServerEvent::AudioDone,
        RawServerEvent::ResponseDone { response } => {
            let output = response.output.into_iter().next().map(|item| match item {
                RawOutputItem::FunctionCall { name, arguments, call_id } => {
                    ResponseOutput::FunctionCall { name, arguments, call_id }
                }
                RawOutputItem::Message { content } => ResponseOutput::Message {
                    text: content.into_iter().next().and_then(|part| part.text),
                },
                RawOutputItem::Other => ResponseOutput::Other { kind: "unknown".to_string() },
            });
            ServerEvent::ResponseDone {
                status: response.status,
                output,
                status_details: response.status_details,
            }
        }
        // Function-call items and audio messages have other shapes; those
        // echoes carry nothing the engine needs.
        RawServerEvent::ItemCreated { item } => match serde_json::from_value::<WireItem>(item)
            .map_err(Error::from)
            .and_then(ConversationItem::try_from)
        {
            Ok(item) => ServerEvent::ItemCreated(item),
            Err(_) => ServerEvent::Ignored { event_type },
        },
        RawServerEvent::Unknown => ServerEvent::Ignored { event_type },
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool() -> ToolDefinition {
        ToolDefinition {
            name: "lookup_weather".to_string(),
            description: "Current weather".to_string(),
            parameters: json!({"type": "object"}),
        }
    }

    fn voice_settings() -> SessionSettings {
        let mut config = Config::default();
        config.voice.enabled = true;
        SessionSettings::from_config(&config, true)
    }

    fn to_value(event: &ClientEvent) -> Value {
        serde_json::from_str(&encode(event).unwrap()).unwrap()
    }

    #[test]
    fn test_text_session_update_omits_voice_fields() {
        let frame = to_value(&ClientEvent::session_update("be nice", vec![tool()], &SessionSettings::text(0.7)));
        assert_eq!(frame["type"], "session.update");
        assert_eq!(frame["session"]["instructions"], "be nice");
        assert_eq!(frame["session"]["modalities"], json!(["text"]));
        assert_eq!(frame["session"]["tools"][0]["type"], "function");
        assert_eq!(frame["session"]["tools"][0]["name"], "lookup_weather");
        let session = frame["session"].as_object().unwrap();
        for field in ["voice", "input_audio_format", "input_audio_transcription", "turn_detection"] {
            assert!(!session.contains_key(field), "unexpected {field}");
        }
    }

    #[test]
    fn test_voice_session_update_carries_voice_fields() {
        let frame = to_value(&ClientEvent::session_update("x", vec![], &voice_settings()));
        let session = &frame["session"];
        assert_eq!(session["modalities"], json!(["text", "audio"]));
        assert_eq!(session["voice"], "alloy");
        assert_eq!(session["input_audio_format"], "pcm16");
        assert_eq!(session["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(session["turn_detection"]["type"], "server_vad");
        assert_eq!(session["turn_detection"]["prefix_padding_ms"], 300);
    }

    #[test]
    fn test_response_request_shapes() {
        let event = ClientEvent::response_request(None, &SessionSettings::text(0.7));
        let text = to_value(&event);
        assert_eq!(text["type"], "response.create");
        assert_eq!(text["event_id"], event.event_id());
        assert_eq!(text["response"]["tool_choice"], "auto");
        assert!(text["response"].get("instructions").is_none());
        assert!(text["response"].get("voice").is_none());

        let voice = to_value(&ClientEvent::response_request(Some("done".to_string()), &voice_settings()));
        assert_eq!(voice["response"]["instructions"], "done");
        assert_eq!(voice["response"]["voice"], "alloy");
        assert_eq!(voice["response"]["output_audio_format"], "pcm16");
        assert_eq!(voice["response"]["max_output_tokens"], 4096);
        assert!(voice["response"]["temperature"].is_number());
    }

    #[test]
    fn test_conversation_item_content_kinds() {
        let audio = to_value(&ClientEvent::conversation_item(&ConversationItem::user_audio("UklGRg==")));
        assert_eq!(audio["item"]["type"], "message");
        assert_eq!(audio["item"]["role"], "user");
        assert_eq!(audio["item"]["content"][0], json!({"type": "input_audio", "audio": "UklGRg=="}));

        let system = to_value(&ClientEvent::conversation_item(&ConversationItem::system("note")));
        assert_eq!(system["item"]["content"][0], json!({"type": "input_text", "text": "note"}));
    }

    #[test]
    fn test_item_survives_synthetic_echo() {
        for item in [
            ConversationItem::user_text("weather in Paris"),
            ConversationItem::user_audio("AAECAw=="),
            ConversationItem::system("Error parsing function arguments"),
            ConversationItem::assistant("intent executed"),
        ] {
            let mut frame = to_value(&ClientEvent::conversation_item(&item));
            frame["type"] = json!("conversation.item.created");
            let decoded = decode_frame(&frame.to_string()).unwrap();
            assert_eq!(decoded, ServerEvent::ItemCreated(item));
        }
    }

    #[test]
    fn test_decode_error_frame() {
        let event = decode_frame(r#"{"type":"error","error":{"message":"Conversation already has an active response"}}"#).unwrap();
        assert!(event.is_active_response_race());

        let other = decode_frame(r#"{"type":"error","error":{"message":"bad"}}"#).unwrap();
        assert_eq!(other, ServerEvent::Error { message: "bad".to_string(), event_id: None });
        assert!(!other.is_active_response_race());

        let rejected = decode_frame(r#"{"type":"error","error":{"message":"bad","event_id":"evt_1"}}"#).unwrap();
        assert_eq!(rejected, ServerEvent::Error { message: "bad".to_string(), event_id: Some("evt_1".to_string()) });
    }

    #[test]
    fn test_decode_audio_frames() {
        let delta = decode_frame(r#"{"type":"response.audio.delta","delta":"AQID"}"#).unwrap();
        assert_eq!(delta, ServerEvent::AudioDelta { bytes: vec![1, 2, 3] });

        let done = decode_frame(r#"{"type":"response.audio.done","item_id":"i1"}"#).unwrap();
        assert_eq!(done, ServerEvent::AudioDone);

        let transcript = decode_frame(r#"{"type":"response.audio_transcript.done","transcript":"hello"}"#).unwrap();
        assert_eq!(transcript, ServerEvent::TranscriptDone { text: "hello".to_string() });
    }

    #[test]
    fn test_decode_function_call_response() {
        let raw = json!({
            "type": "response.done",
            "response": {
                "status": "completed",
                "output": [{"type": "function_call", "name": "lookup_weather", "call_id": "c1", "arguments": "{\"city\":\"Paris\"}"}]
            }
        });
        match decode_frame(&raw.to_string()).unwrap() {
            ServerEvent::ResponseDone { status, output: Some(ResponseOutput::FunctionCall { name, arguments, call_id }), .. } => {
                assert_eq!(status, ResponseStatus::Completed);
                assert_eq!(name, "lookup_weather");
                assert_eq!(arguments, r#"{"city":"Paris"}"#);
                assert_eq!(call_id.as_deref(), Some("c1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_message_and_failed_response() {
        let message = json!({
            "type": "response.done",
            "response": {"status": "completed", "output": [{"type": "message", "content": [{"type": "text", "text": "Hi"}]}]}
        });
        assert!(matches!(
            decode_frame(&message.to_string()).unwrap(),
            ServerEvent::ResponseDone { output: Some(ResponseOutput::Message { text: Some(ref t) }), .. } if t == "Hi"
        ));

        let failed = json!({
            "type": "response.done",
            "response": {"status": "failed", "status_details": {"error": {"code": "server_error"}}}
        });
        match decode_frame(&failed.to_string()).unwrap() {
            ServerEvent::ResponseDone { status, output, status_details } => {
                assert_eq!(status, ResponseStatus::Failed);
                assert!(output.is_none());
                assert_eq!(status_details.unwrap()["error"]["code"], "server_error");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_frames_are_ignored() {
        let event = decode_frame(r#"{"type":"session.created","session":{}}"#).unwrap();
        assert_eq!(event, ServerEvent::Ignored { event_type: "session.created".to_string() });

        let call_echo = decode_frame(r#"{"type":"conversation.item.created","item":{"type":"function_call","name":"x"}}"#).unwrap();
        assert!(matches!(call_echo, ServerEvent::Ignored { .. }));
        assert_eq!(call_echo.event_type(), "conversation.item.created");
        assert_eq!(ServerEvent::AudioDone.event_type(), "response.audio.done");
    }

    #[test]
    fn test_malformed_frames_are_decode_errors() {
        assert!(matches!(decode_frame("not json"), Err(Error::Decode(_))));
        assert!(matches!(decode_frame(r#"{"no_type":1}"#), Err(Error::Decode(_))));
        assert!(matches!(decode_frame(r#"{"type":"response.audio.delta","delta":"%%%"}"#), Err(Error::Decode(_))));
        assert!(matches!(decode_frame(r#"{"type":"response.done"}"#), Err(Error::Decode(_))));
    }
}
