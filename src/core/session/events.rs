//! Inbound event classification and de-duplication.
//!
//! The realtime service emits many overlapping event shapes. Each raw event is
//! classified into a [`TransportEvent`] and then routed: transcript deltas and
//! completions go to the transcript, finished assistant messages are handed to
//! speech playback at most once per item, tool and handoff calls go to the
//! controller, and everything else goes to the generic log path after
//! de-duplication by correlation id.

use std::collections::{HashSet, VecDeque};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::agent::HandoffTable;
use super::transcript::TranscriptRole;
use crate::core::realtime::openai::messages::{ApiError, ContentPart, ConversationItem};

/// Capacity of the seen-event window.
pub const SEEN_EVENTS_CAPACITY: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Event `{event_type}` is missing `{field}`")]
    MissingField {
        event_type: String,
        field: &'static str,
    },

    #[error("Malformed `{event_type}` payload: {reason}")]
    Malformed { event_type: String, reason: String },
}

pub type NormalizeResult<T> = Result<T, NormalizeError>;

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    /// Raw JSON argument string as sent by the model
    pub arguments: String,
}

/// Structured handoff request, resolved from the handoff tool table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffPayload {
    pub target_agent_name: String,
    pub tool_call_id: String,
}

/// Classified inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Delta {
        item_id: String,
        role: TranscriptRole,
        delta: String,
    },
    Completion {
        item_id: String,
        role: TranscriptRole,
        text: String,
    },
    /// `response.output_item.done` for an assistant message
    MessageDone { item_id: String, text: String },
    ToolStart(ToolCall),
    Handoff(HandoffPayload),
    SpeechStarted,
    Error { code: Option<String>, message: String },
    Generic(Value),
}

impl TransportEvent {
    /// Classify a raw server event.
    pub fn classify(event: &Value, handoffs: &HandoffTable) -> NormalizeResult<Self> {
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();

        match event_type {
            "response.input_audio_transcript.delta"
            | "conversation.item.input_audio_transcription.delta" => Ok(Self::Delta {
                item_id: required_str(event, event_type, "item_id")?,
                role: TranscriptRole::User,
                delta: str_field(event, "delta").unwrap_or_default(),
            }),

            "response.output_text.delta"
            | "response.text.delta"
            | "response.audio_transcript.delta" => {
                Ok(Self::Delta {
                    item_id: required_str(event, event_type, "item_id")?,
                    role: TranscriptRole::Assistant,
                    delta: str_field(event, "delta").unwrap_or_default(),
                })
            }

            "response.input_audio_transcript.done"
            | "conversation.item.input_audio_transcription.completed" => Ok(Self::Completion {
                item_id: required_str(event, event_type, "item_id")?,
                role: TranscriptRole::User,
                text: str_field(event, "transcript").unwrap_or_default(),
            }),

            "response.output_text.done" | "response.text.done" => Ok(Self::Completion {
                item_id: required_str(event, event_type, "item_id")?,
                role: TranscriptRole::Assistant,
                text: str_field(event, "text")
                    .or_else(|| str_field(event, "output_text"))
                    .unwrap_or_default(),
            }),

            "response.audio_transcript.done" => Ok(Self::Completion {
                item_id: required_str(event, event_type, "item_id")?,
                role: TranscriptRole::Assistant,
                text: str_field(event, "transcript").unwrap_or_default(),
            }),

            "response.output_item.done" => Self::classify_output_item(event, event_type, handoffs),

            "input_audio_buffer.speech_started" => Ok(Self::SpeechStarted),

            "error" => {
                let error = event
                    .get("error")
                    .cloned()
                    .and_then(|e| serde_json::from_value::<ApiError>(e).ok());
                Ok(match error {
                    Some(ApiError { code, message, .. }) if !message.is_empty() => {
                        Self::Error { code, message }
                    }
                    Some(ApiError { code, .. }) => Self::Error {
                        code,
                        message: "Unknown realtime error".to_string(),
                    },
                    None => Self::Error {
                        code: None,
                        message: "Unknown realtime error".to_string(),
                    },
                })
            }

            _ => Ok(Self::Generic(event.clone())),
        }
    }

    fn classify_output_item(
        event: &Value,
        event_type: &str,
        handoffs: &HandoffTable,
    ) -> NormalizeResult<Self> {
        let raw_item = event.get("item").ok_or_else(|| NormalizeError::MissingField {
            event_type: event_type.to_string(),
            field: "item",
        })?;
        let item: ConversationItem =
            serde_json::from_value(raw_item.clone()).map_err(|e| NormalizeError::Malformed {
                event_type: event_type.to_string(),
                reason: e.to_string(),
            })?;

        match item.item_type.as_str() {
            "message" if item.role.as_deref() == Some("assistant") => {
                let item_id = item.id.ok_or_else(|| NormalizeError::MissingField {
                    event_type: event_type.to_string(),
                    field: "item.id",
                })?;
                Ok(Self::MessageDone {
                    item_id,
                    text: extract_text(item.content.as_deref().unwrap_or_default()),
                })
            }
            "function_call" => {
                let missing = |field| NormalizeError::MissingField {
                    event_type: event_type.to_string(),
                    field,
                };
                let name = item.name.ok_or_else(|| missing("item.name"))?;
                let call_id = item.call_id.ok_or_else(|| missing("item.call_id"))?;

                Ok(match handoffs.target_for(&name) {
                    Some(target) => Self::Handoff(HandoffPayload {
                        target_agent_name: target.to_string(),
                        tool_call_id: call_id,
                    }),
                    None => Self::ToolStart(ToolCall {
                        call_id,
                        name,
                        arguments: item.arguments.unwrap_or_else(|| "{}".to_string()),
                    }),
                })
            }
            _ => Ok(Self::Generic(event.clone())),
        }
    }
}

fn str_field(event: &Value, field: &str) -> Option<String> {
    event.get(field).and_then(Value::as_str).map(str::to_string)
}

fn required_str(event: &Value, event_type: &str, field: &'static str) -> NormalizeResult<String> {
    str_field(event, field).ok_or_else(|| NormalizeError::MissingField {
        event_type: event_type.to_string(),
        field,
    })
}

/// Concatenate the readable text of a message's content parts.
///
/// `text`, `output_text` and `input_text` parts contribute their text; `audio`
/// parts contribute their transcript. Other parts are ignored.
pub fn extract_text(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .filter_map(|part| match part.content_type.as_str() {
            "text" | "output_text" | "input_text" => part.text.as_deref(),
            "audio" => part.transcript.as_deref(),
            _ => None,
        })
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Correlation id of an event: `event_id`, else `response.id`, else `item.id`.
pub fn correlation_id(event: &Value) -> Option<&str> {
    event
        .get("event_id")
        .and_then(Value::as_str)
        .or_else(|| event.pointer("/response/id").and_then(Value::as_str))
        .or_else(|| event.pointer("/item/id").and_then(Value::as_str))
        .filter(|id| !id.is_empty())
}

/// Bounded window of recently seen correlation ids.
///
/// Once the window grows past its capacity the oldest half is evicted in one
/// pass.
#[derive(Debug)]
pub struct SeenEvents {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity + 1),
            ids: HashSet::with_capacity(capacity + 1),
            capacity: capacity.max(1),
        }
    }

    /// Record `id`, returning `false` when it was already seen.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());

        if self.order.len() > self.capacity {
            let evict = self.order.len() / 2;
            for old in self.order.drain(..evict) {
                self.ids.remove(&old);
            }
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.ids.clear();
    }
}

impl Default for SeenEvents {
    fn default() -> Self {
        Self::new(SEEN_EVENTS_CAPACITY)
    }
}

/// Assistant item ids already handed to speech playback.
#[derive(Debug, Default)]
pub struct DeliveredSet(HashSet<String>);

impl DeliveredSet {
    /// Mark `item_id` as delivered. Returns `true` only the first time.
    pub fn mark(&mut self, item_id: &str) -> bool {
        self.0.insert(item_id.to_string())
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.0.contains(item_id)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// What the controller should do with one inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    AppendDelta {
        item_id: String,
        role: TranscriptRole,
        delta: String,
    },
    Finalize {
        item_id: String,
        role: TranscriptRole,
        text: String,
    },
    Speak { item_id: String, text: String },
    Tool(ToolCall),
    Handoff(HandoffPayload),
    BargeIn,
    Error { code: Option<String>, message: String },
    Log(Value),
}

/// Classifies events and applies the de-duplication and delivery-once rules.
#[derive(Debug)]
pub struct EventNormalizer {
    handoffs: HandoffTable,
    seen: SeenEvents,
    delivered: DeliveredSet,
}

impl EventNormalizer {
    pub fn new(handoffs: HandoffTable) -> Self {
        Self {
            handoffs,
            seen: SeenEvents::default(),
            delivered: DeliveredSet::default(),
        }
    }

    pub fn route(&mut self, event: &Value) -> NormalizeResult<Vec<Route>> {
        let routes = match TransportEvent::classify(event, &self.handoffs)? {
            TransportEvent::Delta {
                item_id,
                role,
                delta,
            } => vec![Route::AppendDelta {
                item_id,
                role,
                delta,
            }],

            TransportEvent::Completion {
                item_id,
                role,
                text,
            } => {
                let mut routes = Vec::with_capacity(2);
                if role == TranscriptRole::Assistant {
                    let spoken = text.trim();
                    if !spoken.is_empty() && self.delivered.mark(&item_id) {
                        routes.push(Route::Speak {
                            item_id: item_id.clone(),
                            text: spoken.to_string(),
                        });
                    }
                }
                routes.insert(
                    0,
                    Route::Finalize {
                        item_id,
                        role,
                        text,
                    },
                );
                routes
            }

            TransportEvent::MessageDone { item_id, text } => {
                let mut routes = Vec::with_capacity(2);
                if !text.is_empty() {
                    routes.push(Route::Finalize {
                        item_id: item_id.clone(),
                        role: TranscriptRole::Assistant,
                        text: text.clone(),
                    });
                    if self.delivered.mark(&item_id) {
                        routes.push(Route::Speak { item_id, text });
                    }
                }
                routes
            }

            TransportEvent::ToolStart(call) => vec![Route::Tool(call)],
            TransportEvent::Handoff(payload) => vec![Route::Handoff(payload)],
            TransportEvent::SpeechStarted => vec![Route::BargeIn],
            TransportEvent::Error { code, message } => vec![Route::Error { code, message }],

            TransportEvent::Generic(value) => match correlation_id(&value) {
                Some(id) if !self.seen.insert(id) => {
                    debug!(correlation_id = %id, "Dropping duplicate server event");
                    Vec::new()
                }
                _ => vec![Route::Log(value)],
            },
        };
        Ok(routes)
    }

    /// Forget every seen and delivered id.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.delivered.clear();
    }

    pub fn set_handoffs(&mut self, handoffs: HandoffTable) {
        self.handoffs = handoffs;
    }
}
