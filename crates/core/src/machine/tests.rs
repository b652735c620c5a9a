//! State machine tests against scripted collaborators.
//!
//! The generation service is a deterministic stub so every path through the
//! graph, including the degraded fallback paths, can be asserted without a
//! network.

use super::*;
use crate::content::StaticContentRepository;
use crate::generation::{AnswerEvaluation, Explanation, GenerationService};
use crate::session::ConceptChunk;
use crate::store::{InMemorySessionStore, MockSessionStore};
use anyhow::bail;
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Default)]
struct StubGeneration {
    intent: Option<Intent>,
    relevance: Option<Relevance>,
    verdicts: Mutex<Vec<Verdict>>,
    fail_explain: bool,
    fail_question: bool,
    fail_keywords: bool,
    fail_summary: bool,
}

impl StubGeneration {
    fn with_verdicts(verdicts: Vec<Verdict>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts),
            ..Default::default()
        }
    }
}

#[async_trait]
impl GenerationService for StubGeneration {
    async fn explain(&self, title: &str, _content: &str, _history: &str) -> Result<Explanation> {
        if self.fail_explain {
            bail!("explain unavailable");
        }
        Ok(Explanation {
            definition: format!("{title} is a core idea."),
            technical: "Here is the technical view.".to_string(),
            examples: "For example, pushing a cart.".to_string(),
        })
    }

    async fn example_text(&self, title: &str, _content: &str, _history: &str) -> Result<String> {
        Ok(format!("Another example of {title}."))
    }

    async fn re_explain_steps(
        &self,
        title: &str,
        _content: &str,
        _history: &str,
        steps: usize,
    ) -> Result<Vec<String>> {
        Ok((1..=steps).map(|i| format!("{i}. {title}, step {i}.")).collect())
    }

    async fn check_question(&self, title: &str, _content: &str, _history: &str) -> Result<String> {
        if self.fail_question {
            bail!("question unavailable");
        }
        Ok(format!("What is {title}?"))
    }

    async fn extract_keywords(
        &self,
        _title: &str,
        _content: &str,
        _question: &str,
    ) -> Result<Vec<String>> {
        if self.fail_keywords {
            bail!("keywords unavailable");
        }
        Ok(vec!["force".to_string()])
    }

    async fn evaluate_answer(&self, _request: &AnswerEvaluation) -> Result<Evaluation> {
        let mut verdicts = self.verdicts.lock().unwrap();
        let verdict = if verdicts.is_empty() {
            Verdict::Correct
        } else {
            verdicts.remove(0)
        };
        Ok(Evaluation {
            verdict,
            justification: "You named the key term.".to_string(),
            correction: "The key term is balance.".to_string(),
        })
    }

    async fn answer_question(
        &self,
        question: &str,
        _concept: &str,
        _content: &str,
        _history: &str,
    ) -> Result<String> {
        Ok(format!("Here is the answer to: {question}"))
    }

    async fn classify_intent(
        &self,
        _input: &str,
        _concept: &str,
        _history: &str,
    ) -> Result<Intent> {
        match self.intent {
            Some(intent) => Ok(intent),
            None => bail!("intent classifier unavailable"),
        }
    }

    async fn classify_relevance(
        &self,
        _input: &str,
        _concept: &str,
        _content: &str,
    ) -> Result<Relevance> {
        match self.relevance {
            Some(relevance) => Ok(relevance),
            None => bail!("relevance classifier unavailable"),
        }
    }

    async fn summarize(&self, mastered: usize, total: usize, _history: &str) -> Result<String> {
        if self.fail_summary {
            bail!("summary unavailable");
        }
        Ok(format!("Summary: mastered {mastered} of {total}."))
    }
}

fn forces_content() -> StaticContentRepository {
    StaticContentRepository::new().with_topic(
        "Forces",
        vec![
            ConceptChunk::new(1, "Balanced Forces", "Forces that cancel out leave motion unchanged."),
            ConceptChunk::new(2, "Friction", "Friction resists relative motion between surfaces."),
        ],
    )
}

fn single_chunk_content() -> StaticContentRepository {
    StaticContentRepository::new().with_topic(
        "Forces",
        vec![ConceptChunk::new(1, "Balanced Forces", "Forces that cancel out.")],
    )
}

fn machine_with(
    content: StaticContentRepository,
    generation: StubGeneration,
) -> (StateMachine, Arc<InMemorySessionStore>) {
    let store = Arc::new(InMemorySessionStore::new());
    let machine = StateMachine::new(
        store.clone(),
        Arc::new(content),
        Arc::new(generation),
        MachineConfig::default(),
    );
    (machine, store)
}

async fn stored(store: &InMemorySessionStore, session_id: &str) -> Session {
    store.get(session_id).await.unwrap().expect("session should exist")
}

fn assert_flags_exclusive(session: &Session) {
    assert!(
        !(session.expecting_answer && session.expecting_button_action),
        "both routing flags are set"
    );
}

#[tokio::test]
async fn test_start_presents_first_concept_with_buttons() {
    let (machine, store) = machine_with(forces_content(), StubGeneration::default());
    let response = machine.start("Forces", "s1", "sess1").await.unwrap();

    assert_eq!(response.current_stage, "explain");
    assert_eq!(response.message_format, MessageFormat::MultipleBubbles);
    assert!(!response.is_session_complete);
    assert_eq!(response.current_concept.as_deref(), Some("Balanced Forces"));

    let ResponseBody::Bubbles(bubbles) = &response.messages else {
        panic!("expected bubble payload");
    };
    assert_eq!(bubbles.len(), 4);
    assert!(bubbles[..3]
        .iter()
        .all(|b| b.message_type == MessageType::ConceptSection));
    assert_eq!(bubbles[3].message_type, MessageType::Buttons);
    // The quiz entry is not offered before any learning support was used.
    assert_eq!(bubbles[3].buttons.len(), 2);

    let session = stored(&store, "sess1").await;
    assert!(session.expecting_button_action);
    assert!(!session.expecting_answer);
    assert_eq!(session.conversation_count, 4);
    assert_flags_exclusive(&session);
}

#[tokio::test]
async fn test_start_falls_back_to_flat_content() {
    let content = StaticContentRepository::new().with_flat_topic(
        "Chemistry: Solutions",
        vec![ConceptChunk::new(1, "Solutes", "A solute dissolves in a solvent.")],
    );
    let (machine, _) = machine_with(content, StubGeneration::default());
    let response = machine
        .start("Chemistry: Solutions", "s1", "sess1")
        .await
        .unwrap();
    assert_eq!(response.current_concept.as_deref(), Some("Solutes"));
}

#[tokio::test]
async fn test_start_with_no_content_concludes_immediately() {
    let (machine, _) = machine_with(StaticContentRepository::new(), StubGeneration::default());
    let response = machine.start("Unknown", "s1", "sess1").await.unwrap();
    assert!(response.is_session_complete);
    assert_eq!(response.current_stage, "conclusion");
}

#[tokio::test]
async fn test_check_understanding_enters_quiz_mode() {
    let (machine, store) = machine_with(forces_content(), StubGeneration::default());
    machine.start("Forces", "s1", "sess1").await.unwrap();

    let response = machine.handle("sess1", "check_understanding").await.unwrap();
    assert_eq!(response.current_stage, "quiz_question");
    assert_eq!(response.message_format, MessageFormat::Single);
    let ResponseBody::Single(message) = &response.messages else {
        panic!("expected single message");
    };
    assert!(message.contains("Question 1:"));
    assert!(message.contains("What is Balanced Forces?"));

    let session = stored(&store, "sess1").await;
    assert!(session.expecting_answer);
    assert!(!session.expecting_button_action);
    assert_eq!(session.current_expected_keywords, vec!["force"]);
    assert_eq!(session.current_concept_questions_asked.len(), 1);
    assert_flags_exclusive(&session);
}

#[tokio::test]
async fn test_two_correct_answers_master_the_concept() {
    let (machine, store) = machine_with(forces_content(), StubGeneration::default());
    machine.start("Forces", "s1", "sess1").await.unwrap();
    machine.handle("sess1", "check_understanding").await.unwrap();

    let first = machine.handle("sess1", "they cancel out").await.unwrap();
    assert_eq!(first.current_stage, "next_question");
    let ResponseBody::Single(message) = &first.messages else {
        panic!("expected single message");
    };
    assert!(message.contains("**Progress: 1/2 correct answers**"));
    assert!(message.contains("Question 2:"));

    let second = machine.handle("sess1", "net force is zero").await.unwrap();
    assert_eq!(second.current_stage, "concept_mastered");
    let ResponseBody::Bubbles(bubbles) = &second.messages else {
        panic!("expected bubbles");
    };
    assert_eq!(bubbles[0].message_type, MessageType::MasteryFeedback);
    assert_eq!(bubbles[1].message_type, MessageType::MasteryButtons);

    let session = stored(&store, "sess1").await;
    assert!(session.concept_mastered);
    assert_eq!(
        session
            .concepts_learned
            .iter()
            .filter(|c| c.as_str() == "Balanced Forces")
            .count(),
        1
    );
    assert!(session.expecting_button_action);
    assert_flags_exclusive(&session);
}

#[tokio::test]
async fn test_wrong_answer_gets_feedback_and_retry_options() {
    let generation = StubGeneration::with_verdicts(vec![Verdict::Wrong]);
    let (machine, store) = machine_with(forces_content(), generation);
    machine.start("Forces", "s1", "sess1").await.unwrap();
    machine.handle("sess1", "check_understanding").await.unwrap();

    let response = machine.handle("sess1", "no idea").await.unwrap();
    assert_eq!(response.current_stage, "wrong_answer_feedback");
    let ResponseBody::Bubbles(bubbles) = &response.messages else {
        panic!("expected bubbles");
    };
    assert_eq!(bubbles[0].message_type, MessageType::Feedback);
    assert!(bubbles[0].assistant_message.contains("The key term is balance."));
    assert_eq!(bubbles[1].buttons.len(), 3);

    let session = stored(&store, "sess1").await;
    assert!(session.expecting_button_action);
    assert!(!session.expecting_answer);
    assert_eq!(session.current_concept_correct_answers, 0);
}

#[tokio::test]
async fn test_partial_answer_does_not_advance_progress() {
    let generation = StubGeneration::with_verdicts(vec![Verdict::Partial]);
    let (machine, store) = machine_with(forces_content(), generation);
    machine.start("Forces", "s1", "sess1").await.unwrap();
    machine.handle("sess1", "check_understanding").await.unwrap();

    let response = machine.handle("sess1", "something vague").await.unwrap();
    assert_eq!(response.current_stage, "wrong_answer_feedback");
    let session = stored(&store, "sess1").await;
    assert_eq!(session.current_concept_correct_answers, 0);
    assert!(!session.concept_mastered);
}

#[tokio::test]
async fn test_next_concept_on_last_chunk_completes_the_session() {
    let (machine, store) = machine_with(single_chunk_content(), StubGeneration::default());
    machine.start("Forces", "s1", "sess1").await.unwrap();
    machine.handle("sess1", "check_understanding").await.unwrap();
    machine.handle("sess1", "answer one").await.unwrap();
    machine.handle("sess1", "answer two").await.unwrap();

    let response = machine.handle("sess1", "next_concept").await.unwrap();
    assert!(response.is_session_complete);
    assert_eq!(response.current_stage, "conclusion");
    let ResponseBody::Single(summary) = &response.messages else {
        panic!("expected summary string");
    };
    assert_eq!(summary, "Summary: mastered 1 of 1.");

    let session = stored(&store, "sess1").await;
    assert!(session.is_complete);
    assert_flags_exclusive(&session);
}

#[tokio::test]
async fn test_next_concept_presents_the_following_chunk_with_transition() {
    let (machine, store) = machine_with(forces_content(), StubGeneration::default());
    machine.start("Forces", "s1", "sess1").await.unwrap();
    machine.handle("sess1", "check_understanding").await.unwrap();
    machine.handle("sess1", "answer one").await.unwrap();
    machine.handle("sess1", "answer two").await.unwrap();

    let response = machine.handle("sess1", "next_concept").await.unwrap();
    assert_eq!(response.current_stage, "explain");
    assert_eq!(response.current_concept.as_deref(), Some("Friction"));
    let ResponseBody::Bubbles(bubbles) = &response.messages else {
        panic!("expected bubbles");
    };
    assert_eq!(bubbles.len(), 5);
    assert_eq!(bubbles[0].message_type, MessageType::Transition);
    assert_eq!(bubbles[4].message_type, MessageType::Buttons);

    let session = stored(&store, "sess1").await;
    assert_eq!(session.current_chunk_index, 1);
    assert!(!session.concept_mastered);
    assert_eq!(session.current_concept_correct_answers, 0);
}

#[tokio::test]
async fn test_more_questions_after_mastery_does_not_duplicate_learning() {
    let (machine, store) = machine_with(forces_content(), StubGeneration::default());
    machine.start("Forces", "s1", "sess1").await.unwrap();
    machine.handle("sess1", "check_understanding").await.unwrap();
    machine.handle("sess1", "answer one").await.unwrap();
    machine.handle("sess1", "answer two").await.unwrap();

    let response = machine.handle("sess1", "more_questions").await.unwrap();
    assert_eq!(response.current_stage, "additional_question");
    let ResponseBody::Single(message) = &response.messages else {
        panic!("expected single message");
    };
    assert!(message.contains("Additional Question 3:"));

    // A bonus correct answer keeps the mastery options without re-counting.
    let bonus = machine.handle("sess1", "still balanced").await.unwrap();
    assert_eq!(bonus.current_stage, "additional_correct");
    let session = stored(&store, "sess1").await;
    assert_eq!(session.current_concept_correct_answers, 2);
    assert_eq!(session.concepts_learned.len(), 1);
    assert!(session.expecting_button_action);
}

#[tokio::test]
async fn test_learning_support_unlocks_quiz_button() {
    let (machine, store) = machine_with(forces_content(), StubGeneration::default());
    machine.start("Forces", "s1", "sess1").await.unwrap();

    let response = machine.handle("sess1", "I need more examples").await.unwrap();
    assert_eq!(response.current_stage, "button_response");
    let ResponseBody::Bubbles(bubbles) = &response.messages else {
        panic!("expected bubbles");
    };
    assert!(bubbles[0].assistant_message.contains("Another example"));
    assert_eq!(bubbles[1].buttons.len(), 3);
    assert_eq!(bubbles[1].buttons[2].action, "check_understanding");

    let session = stored(&store, "sess1").await;
    assert!(session.has_used_learning_support);
}

#[tokio::test]
async fn test_re_explain_joins_numbered_steps() {
    let (machine, _) = machine_with(forces_content(), StubGeneration::default());
    machine.start("Forces", "s1", "sess1").await.unwrap();

    let response = machine.handle("sess1", "re_explain").await.unwrap();
    let ResponseBody::Bubbles(bubbles) = &response.messages else {
        panic!("expected bubbles");
    };
    assert!(bubbles[0]
        .assistant_message
        .starts_with("Let me explain this concept again in a different way:"));
    assert!(bubbles[0].assistant_message.contains("step 4"));
}

#[tokio::test]
async fn test_irrelevant_question_redirects_to_current_concept() {
    let generation = StubGeneration {
        intent: Some(Intent::AskingQuestion),
        relevance: Some(Relevance::Irrelevant),
        ..Default::default()
    };
    let (machine, store) = machine_with(forces_content(), generation);

    // Build a session that is waiting on free-form input rather than a
    // button, so intent detection runs.
    let mut session = Session::new("sess1", "s1", "Forces", 2);
    session.concept_chunks =
        vec![ConceptChunk::new(1, "Balanced Forces", "Forces that cancel out.")];
    session.current_question_concept = Some("Balanced Forces".to_string());
    session.current_content = "Forces that cancel out.".to_string();
    store.save(&session).await.unwrap();

    let response = machine
        .handle("sess1", "who won the match yesterday?")
        .await
        .unwrap();
    assert_eq!(response.current_stage, "qa");
    let ResponseBody::Bubbles(bubbles) = &response.messages else {
        panic!("expected bubbles");
    };
    assert_eq!(bubbles[0].message_type, MessageType::QaResponse);
    assert!(bubbles[0].assistant_message.contains("Balanced Forces"));
    assert!(bubbles[0].assistant_message.contains("stay focused"));

    let session = stored(&store, "sess1").await;
    assert!(session.expecting_button_action);
    assert!(!session.expecting_answer);
}

#[tokio::test]
async fn test_relevant_question_is_answered() {
    let generation = StubGeneration {
        intent: Some(Intent::AskingQuestion),
        relevance: Some(Relevance::Relevant),
        ..Default::default()
    };
    let (machine, store) = machine_with(forces_content(), generation);

    let mut session = Session::new("sess1", "s1", "Forces", 2);
    session.concept_chunks =
        vec![ConceptChunk::new(1, "Balanced Forces", "Forces that cancel out.")];
    session.current_question_concept = Some("Balanced Forces".to_string());
    store.save(&session).await.unwrap();

    let response = machine
        .handle("sess1", "why do the forces cancel?")
        .await
        .unwrap();
    let ResponseBody::Bubbles(bubbles) = &response.messages else {
        panic!("expected bubbles");
    };
    assert!(bubbles[0]
        .assistant_message
        .contains("Here is the answer to: why do the forces cancel?"));
    assert_eq!(bubbles[1].buttons.len(), 3);
}

#[tokio::test]
async fn test_acknowledgement_gets_a_nudge() {
    let generation = StubGeneration {
        intent: Some(Intent::Acknowledgement),
        ..Default::default()
    };
    let (machine, store) = machine_with(forces_content(), generation);

    let mut session = Session::new("sess1", "s1", "Forces", 2);
    session.concept_chunks = vec![ConceptChunk::new(1, "Balanced Forces", "...")];
    store.save(&session).await.unwrap();

    let response = machine.handle("sess1", "ok got it").await.unwrap();
    assert_eq!(response.current_stage, "ack");
    let ResponseBody::Single(message) = &response.messages else {
        panic!("expected single message");
    };
    assert!(message.contains("When you're ready"));
}

#[tokio::test]
async fn test_intent_failure_falls_back_to_custom_handling() {
    let generation = StubGeneration {
        intent: None,
        relevance: Some(Relevance::Irrelevant),
        ..Default::default()
    };
    let (machine, store) = machine_with(forces_content(), generation);

    let mut session = Session::new("sess1", "s1", "Forces", 2);
    session.concept_chunks = vec![ConceptChunk::new(1, "Balanced Forces", "...")];
    session.current_question_concept = Some("Balanced Forces".to_string());
    store.save(&session).await.unwrap();

    let response = machine.handle("sess1", "hmm").await.unwrap();
    assert_eq!(response.current_stage, "custom_input");
}

#[tokio::test]
async fn test_unknown_session_returns_terminal_response() {
    let (machine, store) = machine_with(forces_content(), StubGeneration::default());
    let response = machine.handle("missing", "hello").await.unwrap();

    assert!(response.is_session_complete);
    assert_eq!(response.conversation_count, 0);
    assert_eq!(response.current_stage, "session_not_found");
    let ResponseBody::Single(message) = &response.messages else {
        panic!("expected single message");
    };
    assert!(message.contains("Session not found"));
    // No session record is created as a side effect.
    assert!(store.get("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_start_on_complete_session_is_idempotent() {
    let (machine, store) = machine_with(single_chunk_content(), StubGeneration::default());
    machine.start("Forces", "s1", "sess1").await.unwrap();
    machine.handle("sess1", "check_understanding").await.unwrap();
    machine.handle("sess1", "answer one").await.unwrap();
    machine.handle("sess1", "answer two").await.unwrap();
    machine.handle("sess1", "next_concept").await.unwrap();

    let before = stored(&store, "sess1").await;
    assert!(before.is_complete);
    let history_len = before.conversation_history.len();

    let response = machine.start("Forces", "s1", "sess1").await.unwrap();
    assert!(response.is_session_complete);
    assert_eq!(response.current_stage, "conclusion");

    let after = stored(&store, "sess1").await;
    assert_eq!(after.conversation_history.len(), history_len);
}

#[tokio::test]
async fn test_conversation_count_is_monotonic() {
    let (machine, store) = machine_with(forces_content(), StubGeneration::default());
    machine.start("Forces", "s1", "sess1").await.unwrap();

    let mut last = stored(&store, "sess1").await.conversation_count;
    for input in ["more_examples", "re_explain", "check_understanding", "an answer"] {
        machine.handle("sess1", input).await.unwrap();
        let session = stored(&store, "sess1").await;
        assert!(session.conversation_count > last);
        assert!(session.current_chunk_index <= session.concept_chunks.len());
        assert_flags_exclusive(&session);
        last = session.conversation_count;
    }
}

#[tokio::test]
async fn test_explanation_failure_degrades_to_stored_content() {
    let generation = StubGeneration {
        fail_explain: true,
        ..Default::default()
    };
    let (machine, _) = machine_with(forces_content(), generation);
    let response = machine.start("Forces", "s1", "sess1").await.unwrap();

    let ResponseBody::Bubbles(bubbles) = &response.messages else {
        panic!("expected bubbles");
    };
    // One combined content bubble plus the buttons bubble.
    assert_eq!(bubbles.len(), 2);
    assert!(bubbles[0].assistant_message.contains("Balanced Forces"));
    assert!(bubbles[0]
        .assistant_message
        .contains("Forces that cancel out leave motion unchanged."));
}

#[tokio::test]
async fn test_keyword_failure_falls_back_to_title_words() {
    let generation = StubGeneration {
        fail_keywords: true,
        ..Default::default()
    };
    let (machine, store) = machine_with(forces_content(), generation);
    machine.start("Forces", "s1", "sess1").await.unwrap();
    machine.handle("sess1", "check_understanding").await.unwrap();

    let session = stored(&store, "sess1").await;
    assert_eq!(session.current_expected_keywords, vec!["balanced", "forces"]);
}

#[tokio::test]
async fn test_question_failure_falls_back_to_templated_question() {
    let generation = StubGeneration {
        fail_question: true,
        ..Default::default()
    };
    let (machine, _) = machine_with(forces_content(), generation);
    machine.start("Forces", "s1", "sess1").await.unwrap();

    let response = machine.handle("sess1", "check_understanding").await.unwrap();
    let ResponseBody::Single(message) = &response.messages else {
        panic!("expected single message");
    };
    assert!(message.contains("In your own words, explain the key idea of Balanced Forces."));
}

#[tokio::test]
async fn test_summary_failure_falls_back_to_template() {
    let generation = StubGeneration {
        fail_summary: true,
        ..Default::default()
    };
    let (machine, _) = machine_with(single_chunk_content(), generation);
    machine.start("Forces", "s1", "sess1").await.unwrap();
    machine.handle("sess1", "check_understanding").await.unwrap();
    machine.handle("sess1", "answer one").await.unwrap();
    machine.handle("sess1", "answer two").await.unwrap();

    let response = machine.handle("sess1", "next_concept").await.unwrap();
    let ResponseBody::Single(summary) = &response.messages else {
        panic!("expected summary string");
    };
    assert!(summary.contains("mastered 1 of 1"));
}

#[tokio::test]
async fn test_store_failure_propagates() {
    let mut store = MockSessionStore::new();
    store
        .expect_get()
        .returning(|_| Err(anyhow::anyhow!("database unavailable")));

    let machine = StateMachine::new(
        Arc::new(store),
        Arc::new(forces_content()),
        Arc::new(StubGeneration::default()),
        MachineConfig::default(),
    );
    assert!(machine.handle("sess1", "hello").await.is_err());
}

#[test]
fn test_entry_routing() {
    let mut session = Session::new("s", "st", "t", 2);
    assert_eq!(entry_node(&session), Node::PresentConcept);
    session.user_message = Some("hi".into());
    assert_eq!(entry_node(&session), Node::HandleInput);
}

#[test]
fn test_routing_after_input_prefers_completion() {
    let mut session = Session::new("s", "st", "t", 2);
    session.is_complete = true;
    session.expecting_button_action = true;
    assert_eq!(route_after_input(&session), Node::Conclusion);

    session.is_complete = false;
    assert_eq!(route_after_input(&session), Node::HandleButton);

    session.expecting_button_action = false;
    session.expecting_answer = true;
    assert_eq!(route_after_input(&session), Node::EvaluateAnswer);

    session.expecting_answer = false;
    assert_eq!(route_after_input(&session), Node::DetectIntent);
}

#[test]
fn test_intent_routing() {
    assert_eq!(route_intent(Intent::Acknowledgement), Node::HandleAck);
    assert_eq!(route_intent(Intent::AskingQuestion), Node::HandleQa);
    assert_eq!(route_intent(Intent::Other), Node::HandleCustom);
}
