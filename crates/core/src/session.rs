//! Session Data Model
//!
//! This module defines the durable per-student-per-topic session record and
//! everything that hangs off it: conversation turns, concept chunks, chat
//! bubbles, and the typed patch used to update routing state. The session is
//! owned exclusively by the state machine while a call is in flight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One ordered unit of topic content representing a single teaching step.
///
/// Chunks are fetched once from the content repository when a session starts
/// and are never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConceptChunk {
    pub number: i32,
    pub title: String,
    pub content: String,
}

impl ConceptChunk {
    pub fn new(number: i32, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            number,
            title: title.into(),
            content: content.into(),
        }
    }

    /// Display title for this chunk, falling back to its number when the
    /// repository stored an untitled chunk.
    pub fn display_title(&self) -> String {
        if self.title.trim().is_empty() {
            format!("Concept {}", self.number)
        } else {
            self.title.clone()
        }
    }
}

/// Discriminates the kind of chat bubble the client should render.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    ConceptSection,
    Buttons,
    Question,
    Feedback,
    Response,
    Transition,
    QaResponse,
    CustomResponse,
    MasteryButtons,
    AdditionalCorrect,
    MasteryFeedback,
}

/// An interactive button offered to the student.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Button {
    pub text: String,
    pub action: String,
}

/// One discrete chat message within a (possibly multi-message) response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bubble {
    pub assistant_message: String,
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl Bubble {
    /// A plain text bubble with no buttons or section label.
    pub fn text(message: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            assistant_message: message.into(),
            message_type,
            buttons: Vec::new(),
            section: None,
        }
    }

    /// A labelled section of a structured explanation.
    pub fn section(
        message: impl Into<String>,
        message_type: MessageType,
        section: impl Into<String>,
    ) -> Self {
        Self {
            assistant_message: message.into(),
            message_type,
            buttons: Vec::new(),
            section: Some(section.into()),
        }
    }

    /// A bubble carrying interactive buttons.
    pub fn with_buttons(
        message: impl Into<String>,
        message_type: MessageType,
        buttons: Vec<Button>,
    ) -> Self {
        Self {
            assistant_message: message.into(),
            message_type,
            buttons,
            section: None,
        }
    }
}

/// An immutable entry in the session's conversation history.
///
/// `turn` numbers are strictly increasing and stay in lockstep with the
/// session's `conversation_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub turn: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_message: Option<String>,
    pub stage: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept_covered: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// The durable record of one tutoring session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    // Identity
    pub session_id: String,
    pub student_id: String,
    pub topic: String,
    pub started_at: DateTime<Utc>,

    // Progress
    pub conversation_count: u32,
    pub is_complete: bool,
    pub current_stage: String,

    // Content cursor
    pub concept_chunks: Vec<ConceptChunk>,
    pub current_chunk_index: usize,

    // Per-concept quiz state
    pub current_concept_correct_answers: u32,
    pub required_correct_answers: u32,
    pub current_concept_questions_asked: Vec<String>,
    pub current_expected_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_question: Option<String>,
    pub concept_mastered: bool,
    pub has_used_learning_support: bool,

    // Routing flags. Never both true; mutate through `apply`.
    pub expecting_answer: bool,
    pub expecting_button_action: bool,

    // Context for the concept currently being worked on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_question_concept: Option<String>,
    pub current_content: String,

    // History and outcomes
    pub conversation_history: Vec<ConversationTurn>,
    pub concepts_learned: Vec<String>,

    /// Input for the in-flight call only. Never persisted.
    #[serde(skip)]
    pub user_message: Option<String>,
}

impl Session {
    /// Creates a fresh session with an empty history and the chunk cursor at
    /// the start.
    pub fn new(
        session_id: impl Into<String>,
        student_id: impl Into<String>,
        topic: impl Into<String>,
        required_correct_answers: u32,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            student_id: student_id.into(),
            topic: topic.into(),
            started_at: Utc::now(),
            conversation_count: 0,
            is_complete: false,
            current_stage: String::new(),
            concept_chunks: Vec::new(),
            current_chunk_index: 0,
            current_concept_correct_answers: 0,
            required_correct_answers,
            current_concept_questions_asked: Vec::new(),
            current_expected_keywords: Vec::new(),
            current_question: None,
            concept_mastered: false,
            has_used_learning_support: false,
            expecting_answer: false,
            expecting_button_action: false,
            current_question_concept: None,
            current_content: String::new(),
            conversation_history: Vec::new(),
            concepts_learned: Vec::new(),
            user_message: None,
        }
    }

    /// The chunk under the cursor, if any remain.
    pub fn current_chunk(&self) -> Option<&ConceptChunk> {
        self.concept_chunks.get(self.current_chunk_index)
    }

    /// True once the cursor has walked past the last chunk.
    pub fn chunks_exhausted(&self) -> bool {
        self.current_chunk_index >= self.concept_chunks.len()
    }

    /// Resets the per-concept quiz counters when a new concept is presented.
    pub fn reset_concept_progress(&mut self) {
        self.current_concept_correct_answers = 0;
        self.current_concept_questions_asked.clear();
        self.current_expected_keywords.clear();
        self.current_question = None;
        self.concept_mastered = false;
        self.has_used_learning_support = false;
    }

    /// Appends the student's message as a history turn and advances the
    /// conversation count by one.
    pub fn record_user_turn(&mut self, text: &str) {
        self.conversation_history.push(ConversationTurn {
            turn: self.conversation_count + 1,
            user_message: Some(text.to_string()),
            assistant_message: None,
            stage: "user_input".to_string(),
            timestamp: Utc::now(),
            concept_covered: self.current_question_concept.clone(),
            message_type: None,
            buttons: Vec::new(),
            section: None,
        });
        self.conversation_count += 1;
    }

    /// Appends one history turn per bubble, numbered consecutively from the
    /// current conversation count, then advances the count by the number of
    /// bubbles. The user's message, when given, is attached to the first turn.
    pub fn record_bubbles(
        &mut self,
        stage: &str,
        concept: Option<&str>,
        user_message: Option<&str>,
        bubbles: &[Bubble],
    ) {
        for (i, bubble) in bubbles.iter().enumerate() {
            self.conversation_history.push(ConversationTurn {
                turn: self.conversation_count + 1 + i as u32,
                user_message: if i == 0 {
                    user_message.map(str::to_string)
                } else {
                    None
                },
                assistant_message: Some(bubble.assistant_message.clone()),
                stage: stage.to_string(),
                timestamp: Utc::now(),
                concept_covered: concept.map(str::to_string),
                message_type: Some(bubble.message_type),
                buttons: bubble.buttons.clone(),
                section: bubble.section.clone(),
            });
        }
        self.conversation_count += bubbles.len() as u32;
    }

    /// Renders the most recent `limit` turns, latest first, for prompt
    /// context.
    pub fn recent_history(&self, limit: usize) -> String {
        let start = self.conversation_history.len().saturating_sub(limit);
        self.conversation_history[start..]
            .iter()
            .rev()
            .enumerate()
            .map(|(i, turn)| {
                format!(
                    "[{}] user: {} | assistant: {}",
                    i,
                    turn.user_message.as_deref().unwrap_or(""),
                    turn.assistant_message.as_deref().unwrap_or("")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Applies a typed partial update.
    ///
    /// Routing flags go through here so the invariant holds: setting either
    /// expectation true clears the other, making a both-true session
    /// unrepresentable through normal updates.
    pub fn apply(&mut self, patch: SessionPatch) {
        if let Some(v) = patch.is_complete {
            self.is_complete = v;
        }
        if let Some(v) = patch.current_stage {
            self.current_stage = v;
        }
        if let Some(v) = patch.current_chunk_index {
            self.current_chunk_index = v;
        }
        if let Some(v) = patch.concept_mastered {
            self.concept_mastered = v;
        }
        if let Some(v) = patch.has_used_learning_support {
            self.has_used_learning_support = v;
        }
        if let Some(v) = patch.current_question {
            self.current_question = v;
        }
        if let Some(v) = patch.current_expected_keywords {
            self.current_expected_keywords = v;
        }
        if let Some(v) = patch.current_question_concept {
            self.current_question_concept = v;
        }
        if let Some(v) = patch.current_content {
            self.current_content = v;
        }
        if let Some(v) = patch.expecting_button_action {
            self.expecting_button_action = v;
            if v {
                self.expecting_answer = false;
            }
        }
        if let Some(v) = patch.expecting_answer {
            self.expecting_answer = v;
            if v {
                self.expecting_button_action = false;
            }
        }
    }
}

/// A typed partial update to a [`Session`].
///
/// Fields left `None` are untouched. Nested `Option`s distinguish "leave as
/// is" from "clear the value".
#[derive(Debug, Default)]
pub struct SessionPatch {
    pub is_complete: Option<bool>,
    pub current_stage: Option<String>,
    pub current_chunk_index: Option<usize>,
    pub concept_mastered: Option<bool>,
    pub has_used_learning_support: Option<bool>,
    pub current_question: Option<Option<String>>,
    pub current_expected_keywords: Option<Vec<String>>,
    pub current_question_concept: Option<Option<String>>,
    pub current_content: Option<String>,
    pub expecting_answer: Option<bool>,
    pub expecting_button_action: Option<bool>,
}
