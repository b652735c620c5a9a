//! API Models
//!
//! Request and response payloads for the REST endpoints, annotated for
//! OpenAPI documentation with `utoipa`.

use chrono::{DateTime, Utc};
use revise_core::TurnResponse;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct StartSessionPayload {
    #[schema(example = "Physics: Forces")]
    pub topic: String,
    #[schema(example = "student-42")]
    pub student_id: String,
    /// Resumes this session when given; a fresh id is generated otherwise.
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct ContinueSessionPayload {
    pub session_id: String,
    #[schema(example = "check_understanding")]
    pub query: String,
}

/// One tutoring turn as returned to the client: the state machine's response
/// plus request metadata.
#[derive(Serialize, ToSchema)]
pub struct RevisionResponse {
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub turn: TurnResponse,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RevisionResponse {
    pub fn new(turn: TurnResponse, session_id: String, topic: Option<String>) -> Self {
        Self {
            turn,
            session_id,
            topic,
            timestamp: Utc::now(),
        }
    }
}

/// The safe metadata view of a stored session.
#[derive(Serialize, ToSchema)]
pub struct SessionInfo {
    pub session_id: String,
    pub student_id: String,
    pub topic: String,
    pub started_at: DateTime<Utc>,
    pub conversation_count: u32,
    pub is_complete: bool,
    pub current_stage: String,
    pub concepts_learned: Vec<String>,
}

impl From<&revise_core::Session> for SessionInfo {
    fn from(session: &revise_core::Session) -> Self {
        Self {
            session_id: session.session_id.clone(),
            student_id: session.student_id.clone(),
            topic: session.topic.clone(),
            started_at: session.started_at,
            conversation_count: session.conversation_count,
            is_complete: session.is_complete,
            current_stage: session.current_stage.clone(),
            concepts_learned: session.concepts_learned.clone(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct TopicsResponse {
    pub topics: Vec<String>,
}

#[derive(Serialize, ToSchema)]
pub struct EndSessionResponse {
    pub message: String,
    pub session_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use revise_core::machine::{MessageFormat, ResponseBody};

    #[test]
    fn test_start_payload_deserialization() {
        let json = r#"{"topic": "Physics: Forces", "student_id": "s1"}"#;
        let payload: StartSessionPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.topic, "Physics: Forces");
        assert_eq!(payload.student_id, "s1");
        assert!(payload.session_id.is_none());

        let json = r#"{"topic": "Forces", "student_id": "s1", "session_id": "abc"}"#;
        let payload: StartSessionPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_start_payload_missing_field() {
        let json = r#"{"topic": "Forces"}"#;
        let result: Result<StartSessionPayload, _> = serde_json::from_str(json);
        assert!(result.is_err()); // student_id is required
    }

    #[test]
    fn test_continue_payload_deserialization() {
        let json = r#"{"session_id": "sess-1", "query": "more_examples"}"#;
        let payload: ContinueSessionPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.session_id, "sess-1");
        assert_eq!(payload.query, "more_examples");
    }

    #[test]
    fn test_revision_response_flattens_the_turn() {
        let turn = TurnResponse {
            messages: ResponseBody::Single("All done.".to_string()),
            message_format: MessageFormat::Single,
            is_session_complete: true,
            conversation_count: 7,
            current_stage: "conclusion".to_string(),
            current_concept: None,
        };
        let response = RevisionResponse::new(turn, "sess-1".to_string(), Some("Forces".into()));
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["messages"], "All done.");
        assert_eq!(json["message_format"], "single");
        assert_eq!(json["conversation_count"], 7);
        assert_eq!(json["session_id"], "sess-1");
        assert_eq!(json["topic"], "Forces");
    }

    #[test]
    fn test_session_info_from_session() {
        let mut session = revise_core::Session::new("sess-1", "s1", "Forces", 2);
        session.conversation_count = 9;
        session.concepts_learned.push("Balanced Forces".to_string());
        session.current_stage = "explain".to_string();

        let info = SessionInfo::from(&session);
        assert_eq!(info.session_id, "sess-1");
        assert_eq!(info.conversation_count, 9);
        assert_eq!(info.concepts_learned, vec!["Balanced Forces"]);
        assert!(!info.is_complete);
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            message: "Session not found".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(json, r#"{"message":"Session not found"}"#);
    }
}
