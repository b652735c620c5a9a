//! Conversation State Machine
//!
//! The core of the tutor: an explicit finite-state dispatcher that loads a
//! session, runs exactly one pass through the node graph, persists the
//! mutated session, and returns the chat bubbles for this turn. Nodes are an
//! enum; routing between them is decided by small pure predicates so the
//! graph is testable without any runtime machinery.
//!
//! Generation failures never surface to the student: every call site
//! substitutes a deterministic degraded output. Only persistence failures
//! propagate.

pub mod buttons;

#[cfg(test)]
mod tests;

use crate::content::ContentRepository;
use crate::generation::{
    AnswerEvaluation, Evaluation, GenerationService, Intent, Relevance, Verdict,
};
use crate::session::{Bubble, MessageType, Session, SessionPatch};
use crate::store::SessionStore;
use anyhow::Result;
use self::buttons::ButtonAction;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const NEXT_PROMPT: &str = "What would you like to do next?";
const RETRY_PROMPT: &str = "Let's try a different approach. What would you like to do?";
const ACK_NUDGE: &str =
    "Great! When you're ready, please choose one of the options above or ask me anything.";
const SESSION_NOT_FOUND: &str = "Session not found. Start a new revision session.";

/// Tunable parameters for the state machine.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Correct answers needed to master one concept.
    pub required_correct_answers: u32,
    /// How many recent turns are rendered into prompt context.
    pub history_window: usize,
    /// Number of steps requested when re-explaining a concept.
    pub re_explain_steps: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            required_correct_answers: 2,
            history_window: 10,
            re_explain_steps: 4,
        }
    }
}

/// How the response payload should be rendered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    Single,
    MultipleBubbles,
}

/// The message payload: either a single legacy string or a bubble list.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Single(String),
    Bubbles(Vec<Bubble>),
}

/// The result of one pass through the graph.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub messages: ResponseBody,
    pub message_format: MessageFormat,
    pub is_session_complete: bool,
    pub conversation_count: u32,
    pub current_stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_concept: Option<String>,
}

/// The nodes of the conversation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Entry,
    HandleInput,
    DetectIntent,
    HandleAck,
    HandleQa,
    HandleCustom,
    HandleButton,
    EvaluateAnswer,
    PresentConcept,
    Conclusion,
}

/// Entry routing: no user message means this is a presentation pass.
pub(crate) fn entry_node(session: &Session) -> Node {
    if session.user_message.is_none() {
        Node::PresentConcept
    } else {
        Node::HandleInput
    }
}

/// Routing after the user's turn has been recorded.
pub(crate) fn route_after_input(session: &Session) -> Node {
    if session.is_complete {
        Node::Conclusion
    } else if session.expecting_button_action {
        Node::HandleButton
    } else if session.expecting_answer {
        Node::EvaluateAnswer
    } else {
        Node::DetectIntent
    }
}

/// Routing after intent classification.
pub(crate) fn route_intent(intent: Intent) -> Node {
    match intent {
        Intent::Acknowledgement => Node::HandleAck,
        Intent::AskingQuestion => Node::HandleQa,
        Intent::Other => Node::HandleCustom,
    }
}

/// The outcome of the button node: either a finished turn, or a transition
/// bubble to carry into the next concept's presentation.
enum ButtonFlow {
    Done(TurnResponse),
    Advance(Bubble),
}

fn respond(session: &Session, body: ResponseBody, format: MessageFormat) -> TurnResponse {
    TurnResponse {
        messages: body,
        message_format: format,
        is_session_complete: session.is_complete,
        conversation_count: session.conversation_count,
        current_stage: session.current_stage.clone(),
        current_concept: session.current_question_concept.clone(),
    }
}

fn redirect_message(concept: &str) -> String {
    format!(
        "That's an interesting thought, but let's stay focused on **{concept}** for now. \
         Ask me something about it, or pick one of the options above."
    )
}

fn qa_unavailable(concept: &str) -> String {
    format!(
        "I can't answer that right now. Let's keep working on **{concept}** \
         and you can ask again in a moment."
    )
}

fn fallback_question(title: &str) -> String {
    format!("In your own words, explain the key idea of {title}.")
}

fn feedback_text(evaluation: &Evaluation) -> String {
    let correction = if evaluation.correction.is_empty() {
        "Let's go over the idea once more."
    } else {
        evaluation.correction.as_str()
    };
    match evaluation.verdict {
        Verdict::Partial => {
            format!("You're on the right track, but not quite there yet.\n\n{correction}")
        }
        _ => format!("Not quite right.\n\n{correction}"),
    }
}

/// Drives a tutoring conversation one turn at a time.
///
/// All collaborators are injected; the machine holds no global state and no
/// state of its own beyond configuration.
pub struct StateMachine {
    store: Arc<dyn SessionStore>,
    content: Arc<dyn ContentRepository>,
    generation: Arc<dyn GenerationService>,
    config: MachineConfig,
}

impl StateMachine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        content: Arc<dyn ContentRepository>,
        generation: Arc<dyn GenerationService>,
        config: MachineConfig,
    ) -> Self {
        Self {
            store,
            content,
            generation,
            config,
        }
    }

    /// Starts (or resumes) a session and presents the current concept.
    ///
    /// An already-complete session gets its completion summary back and its
    /// history is left untouched. Otherwise concept chunks are fetched (the
    /// flatter content source is consulted when the primary subtopic lookup
    /// returns nothing) and the cursor is reset to the first chunk.
    pub async fn start(
        &self,
        topic: &str,
        student_id: &str,
        session_id: &str,
    ) -> Result<TurnResponse> {
        let mut session = match self.store.get(session_id).await? {
            Some(existing) => existing,
            None => Session::new(
                session_id,
                student_id,
                topic,
                self.config.required_correct_answers,
            ),
        };

        if session.is_complete {
            let response = self.finish_session(&mut session).await;
            self.store.save(&session).await?;
            return Ok(response);
        }

        let topic_title = topic.rsplit(": ").next().unwrap_or(topic);
        let mut chunks = self.content.concept_chunks(topic_title).await?;
        if chunks.is_empty() {
            chunks = self.content.flat_content(topic).await?;
        }
        info!(
            %topic,
            session_id = %session.session_id,
            chunks = chunks.len(),
            "starting revision session"
        );
        session.concept_chunks = chunks;
        session.current_chunk_index = 0;
        session.user_message = None;

        let response = self.dispatch(&mut session).await;
        session.user_message = None;
        self.store.save(&session).await?;
        Ok(response)
    }

    /// Handles one user message against an existing session.
    ///
    /// An unknown session id yields a terminal "not found" response; no
    /// session is created.
    pub async fn handle(&self, session_id: &str, user_text: &str) -> Result<TurnResponse> {
        let Some(mut session) = self.store.get(session_id).await? else {
            warn!(%session_id, "handle called for unknown session");
            return Ok(TurnResponse {
                messages: ResponseBody::Single(SESSION_NOT_FOUND.to_string()),
                message_format: MessageFormat::Single,
                is_session_complete: true,
                conversation_count: 0,
                current_stage: "session_not_found".to_string(),
                current_concept: None,
            });
        };

        session.user_message = Some(user_text.to_string());
        let response = self.dispatch(&mut session).await;
        session.user_message = None;
        self.store.save(&session).await?;
        Ok(response)
    }

    /// Runs one pass through the node graph to a terminal response.
    async fn dispatch(&self, session: &mut Session) -> TurnResponse {
        let mut node = Node::Entry;
        let mut carry: Vec<Bubble> = Vec::new();
        loop {
            debug!(session_id = %session.session_id, ?node, "dispatching");
            node = match node {
                Node::Entry => entry_node(session),
                Node::HandleInput => {
                    let text = session.user_message.clone().unwrap_or_default();
                    session.record_user_turn(&text);
                    route_after_input(session)
                }
                Node::DetectIntent => {
                    let text = session.user_message.clone().unwrap_or_default();
                    let concept = session.current_question_concept.clone().unwrap_or_default();
                    let history = session.recent_history(self.config.history_window);
                    let intent = match self
                        .generation
                        .classify_intent(&text, &concept, &history)
                        .await
                    {
                        Ok(intent) => intent,
                        Err(error) => {
                            warn!(%error, "intent classification failed; treating as free-form input");
                            Intent::Other
                        }
                    };
                    route_intent(intent)
                }
                Node::HandleAck => return self.handle_ack(session),
                Node::HandleQa => return self.handle_qa(session).await,
                Node::HandleCustom => return self.handle_custom(session).await,
                Node::EvaluateAnswer => return self.evaluate_answer(session).await,
                Node::PresentConcept => {
                    return self
                        .present_concept(session, std::mem::take(&mut carry))
                        .await;
                }
                Node::Conclusion => return self.finish_session(session).await,
                Node::HandleButton => match self.handle_button(session).await {
                    ButtonFlow::Done(response) => return response,
                    ButtonFlow::Advance(transition) => {
                        carry.push(transition);
                        Node::PresentConcept
                    }
                },
            };
        }
    }

    /// Presents the chunk under the cursor, or concludes when none remain.
    ///
    /// `carry` holds bubbles emitted by an earlier node this turn (the
    /// concept transition); they are prepended to the payload but were
    /// already recorded as history turns by their emitting node.
    async fn present_concept(&self, session: &mut Session, carry: Vec<Bubble>) -> TurnResponse {
        let Some(chunk) = session.current_chunk().cloned() else {
            return self.finish_session(session).await;
        };
        let title = chunk.display_title();
        let content = chunk.content.clone();

        session.reset_concept_progress();
        let history = session.recent_history(self.config.history_window);

        let sections = match self.generation.explain(&title, &content, &history).await {
            Ok(explanation) => vec![
                Bubble::section(explanation.definition, MessageType::ConceptSection, "definition"),
                Bubble::section(explanation.technical, MessageType::ConceptSection, "technical"),
                Bubble::section(explanation.examples, MessageType::ConceptSection, "examples"),
            ],
            Err(error) => {
                warn!(%error, concept = %title, "explanation generation failed; using stored content");
                vec![Bubble::text(
                    format!("**{title}**\n\n{content}"),
                    MessageType::ConceptSection,
                )]
            }
        };

        let carried = carry.len();
        let mut bubbles = carry;
        bubbles.extend(sections);
        bubbles.push(Bubble::with_buttons(
            NEXT_PROMPT,
            MessageType::Buttons,
            buttons::learning_buttons(false),
        ));
        session.record_bubbles("explain", Some(&title), None, &bubbles[carried..]);
        session.apply(SessionPatch {
            expecting_button_action: Some(true),
            current_question_concept: Some(Some(title.clone())),
            current_content: Some(content),
            current_stage: Some("explain".to_string()),
            ..Default::default()
        });

        info!(concept = %title, bubbles = bubbles.len(), "presented concept");
        respond(
            session,
            ResponseBody::Bubbles(bubbles),
            MessageFormat::MultipleBubbles,
        )
    }

    /// Terminal summary for a finished session. Appends no history turns, so
    /// repeated calls are idempotent.
    async fn finish_session(&self, session: &mut Session) -> TurnResponse {
        let summary = self.summary_or_fallback(session).await;
        session.apply(SessionPatch {
            is_complete: Some(true),
            expecting_answer: Some(false),
            expecting_button_action: Some(false),
            current_stage: Some("conclusion".to_string()),
            ..Default::default()
        });
        respond(session, ResponseBody::Single(summary), MessageFormat::Single)
    }

    fn handle_ack(&self, session: &mut Session) -> TurnResponse {
        session.record_bubbles(
            "ack",
            None,
            None,
            &[Bubble::text(ACK_NUDGE, MessageType::Response)],
        );
        session.current_stage = "ack".to_string();
        respond(
            session,
            ResponseBody::Single(ACK_NUDGE.to_string()),
            MessageFormat::Single,
        )
    }

    async fn handle_qa(&self, session: &mut Session) -> TurnResponse {
        let reply = self.relevance_gated_reply(session).await;
        let bubbles = vec![
            Bubble::text(reply, MessageType::QaResponse),
            Bubble::with_buttons(NEXT_PROMPT, MessageType::Buttons, buttons::learning_buttons(true)),
        ];
        session.record_bubbles("qa", None, None, &bubbles);
        session.apply(SessionPatch {
            expecting_button_action: Some(true),
            current_stage: Some("qa".to_string()),
            ..Default::default()
        });
        respond(
            session,
            ResponseBody::Bubbles(bubbles),
            MessageFormat::MultipleBubbles,
        )
    }

    /// Handles input whose intent was ambiguous: same relevance-gated reply
    /// as Q&A, but the quiz entry button stays gated on prior support use.
    async fn handle_custom(&self, session: &mut Session) -> TurnResponse {
        let reply = self.relevance_gated_reply(session).await;
        let bubbles = vec![
            Bubble::text(reply, MessageType::CustomResponse),
            Bubble::with_buttons(
                NEXT_PROMPT,
                MessageType::Buttons,
                buttons::learning_buttons(session.has_used_learning_support),
            ),
        ];
        session.record_bubbles("custom_input", None, None, &bubbles);
        session.apply(SessionPatch {
            expecting_button_action: Some(true),
            current_stage: Some("custom_input".to_string()),
            ..Default::default()
        });
        respond(
            session,
            ResponseBody::Bubbles(bubbles),
            MessageFormat::MultipleBubbles,
        )
    }

    /// Answers a relevant question, or redirects back to the current concept.
    async fn relevance_gated_reply(&self, session: &Session) -> String {
        let text = session.user_message.clone().unwrap_or_default();
        let concept = session.current_question_concept.clone().unwrap_or_default();
        let content = session
            .current_chunk()
            .map(|c| c.content.clone())
            .unwrap_or_default();
        let history = session.recent_history(self.config.history_window);

        let relevance = match self
            .generation
            .classify_relevance(&text, &concept, &content)
            .await
        {
            Ok(relevance) => relevance,
            Err(error) => {
                warn!(%error, "relevance check failed; redirecting to the current concept");
                Relevance::Irrelevant
            }
        };

        match relevance {
            Relevance::Relevant => self
                .generation
                .answer_question(&text, &concept, &content, &history)
                .await
                .unwrap_or_else(|error| {
                    warn!(%error, "question answering failed");
                    qa_unavailable(&concept)
                }),
            Relevance::Irrelevant => redirect_message(&concept),
        }
    }

    async fn handle_button(&self, session: &mut Session) -> ButtonFlow {
        let Some(chunk) = session.current_chunk().cloned() else {
            session.apply(SessionPatch {
                is_complete: Some(true),
                expecting_button_action: Some(false),
                current_stage: Some("complete".to_string()),
                ..Default::default()
            });
            return ButtonFlow::Done(respond(
                session,
                ResponseBody::Single("No more concepts to explore.".to_string()),
                MessageFormat::Single,
            ));
        };
        let title = chunk.display_title();
        let content = chunk.content.clone();
        let input = session.user_message.clone().unwrap_or_default();
        let action = ButtonAction::parse(&input);
        debug!(?action, mastered = session.concept_mastered, "button dispatch");

        if session.concept_mastered {
            match action {
                Some(ButtonAction::MoreQuestions) => {
                    return ButtonFlow::Done(self.more_questions(session, &title, &content).await);
                }
                Some(ButtonAction::NextConcept) => {
                    let transition = Bubble::text(
                        "Perfect! Moving to the next concept...",
                        MessageType::Transition,
                    );
                    session.record_bubbles(
                        "concept_transition",
                        None,
                        None,
                        std::slice::from_ref(&transition),
                    );
                    session.apply(SessionPatch {
                        concept_mastered: Some(false),
                        current_chunk_index: Some(session.current_chunk_index + 1),
                        expecting_answer: Some(false),
                        expecting_button_action: Some(false),
                        current_question_concept: Some(None),
                        current_stage: Some("concept_transition".to_string()),
                        ..Default::default()
                    });
                    return ButtonFlow::Advance(transition);
                }
                _ => {}
            }
        }

        match action {
            Some(ButtonAction::MoreExamples) => {
                let history = session.recent_history(self.config.history_window);
                let reply = self
                    .generation
                    .example_text(&title, &content, &history)
                    .await
                    .unwrap_or_else(|error| {
                        warn!(%error, "example generation failed; reusing stored content");
                        format!("Here is the key idea once more:\n\n{content}")
                    });
                session.apply(SessionPatch {
                    has_used_learning_support: Some(true),
                    ..Default::default()
                });
                ButtonFlow::Done(self.continue_with_buttons(session, reply, MessageType::Response))
            }
            Some(ButtonAction::ReExplain) => {
                let history = session.recent_history(self.config.history_window);
                let reply = match self
                    .generation
                    .re_explain_steps(&title, &content, &history, self.config.re_explain_steps)
                    .await
                {
                    Ok(steps) => format!(
                        "Let me explain this concept again in a different way:\n\n{}",
                        steps.join("\n")
                    ),
                    Err(error) => {
                        warn!(%error, "re-explanation failed; reusing stored content");
                        format!("Let me restate it plainly:\n\n{content}")
                    }
                };
                session.apply(SessionPatch {
                    has_used_learning_support: Some(true),
                    ..Default::default()
                });
                ButtonFlow::Done(self.continue_with_buttons(session, reply, MessageType::Response))
            }
            Some(ButtonAction::CheckUnderstanding) => {
                ButtonFlow::Done(self.start_quiz(session, &title, &content).await)
            }
            _ => {
                // Not a recognized action: treat it as a possible question.
                let reply = self.relevance_gated_reply(session).await;
                ButtonFlow::Done(self.continue_with_buttons(session, reply, MessageType::Response))
            }
        }
    }

    /// Emits a response bubble followed by the learning-support options and
    /// keeps the session waiting on a button.
    fn continue_with_buttons(
        &self,
        session: &mut Session,
        reply: String,
        message_type: MessageType,
    ) -> TurnResponse {
        let bubbles = vec![
            Bubble::text(reply, message_type),
            Bubble::with_buttons(
                NEXT_PROMPT,
                MessageType::Buttons,
                buttons::learning_buttons(session.has_used_learning_support),
            ),
        ];
        let concept = session.current_question_concept.clone();
        session.record_bubbles("button_response", concept.as_deref(), None, &bubbles);
        session.apply(SessionPatch {
            expecting_button_action: Some(true),
            current_stage: Some("button_response".to_string()),
            ..Default::default()
        });
        respond(
            session,
            ResponseBody::Bubbles(bubbles),
            MessageFormat::MultipleBubbles,
        )
    }

    /// Enters quiz mode: ask the first (or next) check question and start
    /// expecting an answer.
    async fn start_quiz(&self, session: &mut Session, title: &str, content: &str) -> TurnResponse {
        let question = self.question_or_fallback(session, title, content).await;
        session.current_concept_questions_asked.push(question.clone());

        let correct = session.current_concept_correct_answers;
        let required = session.required_correct_answers;
        let message = format!(
            "Great! Let's test your understanding. You need to answer {required} questions \
             correctly to master this concept.\n\n\
             **Progress: {correct}/{required} correct answers**\n\n\
             **Question {}:**\n{question}",
            correct + 1
        );

        let keywords = self.keywords_or_fallback(title, content, &question).await;
        session.record_bubbles(
            "quiz_question",
            Some(title),
            None,
            &[Bubble::text(message.clone(), MessageType::Question)],
        );
        session.apply(SessionPatch {
            expecting_answer: Some(true),
            current_expected_keywords: Some(keywords),
            current_question: Some(Some(question)),
            current_stage: Some("quiz_question".to_string()),
            ..Default::default()
        });
        respond(session, ResponseBody::Single(message), MessageFormat::Single)
    }

    /// Continues quizzing a concept the student has already mastered.
    async fn more_questions(
        &self,
        session: &mut Session,
        title: &str,
        content: &str,
    ) -> TurnResponse {
        let question = self.question_or_fallback(session, title, content).await;
        session.current_concept_questions_asked.push(question.clone());

        let number = session.current_concept_correct_answers + 1;
        let message = format!(
            "Great! Let's continue with more questions to deepen your understanding.\n\n\
             **Additional Question {number}:**\n{question}"
        );

        let keywords = self.keywords_or_fallback(title, content, &question).await;
        session.record_bubbles(
            "additional_question",
            Some(title),
            None,
            &[Bubble::text(message.clone(), MessageType::Question)],
        );
        session.apply(SessionPatch {
            expecting_answer: Some(true),
            current_expected_keywords: Some(keywords),
            current_question: Some(Some(question)),
            current_stage: Some("additional_question".to_string()),
            ..Default::default()
        });
        respond(session, ResponseBody::Single(message), MessageFormat::Single)
    }

    /// Grades the student's answer and advances the mastery algorithm.
    async fn evaluate_answer(&self, session: &mut Session) -> TurnResponse {
        let answer = session.user_message.clone().unwrap_or_default();
        let title = session.current_question_concept.clone().unwrap_or_default();
        let content = session
            .current_chunk()
            .map(|c| c.content.clone())
            .unwrap_or_default();
        let history = session.recent_history(self.config.history_window);

        let request = AnswerEvaluation {
            answer: answer.clone(),
            expected_keywords: session.current_expected_keywords.clone(),
            question: session.current_question.clone().unwrap_or_default(),
            title: title.clone(),
            content: content.clone(),
            history,
        };
        let evaluation = match self.generation.evaluate_answer(&request).await {
            Ok(evaluation) => evaluation,
            Err(error) => {
                warn!(%error, "answer evaluation failed; grading as wrong");
                Evaluation {
                    verdict: Verdict::Wrong,
                    justification: "I couldn't grade that answer.".to_string(),
                    correction: "Let's revisit the concept and try again.".to_string(),
                }
            }
        };
        debug!(verdict = ?evaluation.verdict, concept = %title, "answer evaluated");

        if evaluation.verdict != Verdict::Correct {
            let bubbles = vec![
                Bubble::text(feedback_text(&evaluation), MessageType::Feedback),
                Bubble::with_buttons(
                    RETRY_PROMPT,
                    MessageType::Buttons,
                    buttons::learning_buttons(true),
                ),
            ];
            session.record_bubbles("wrong_answer_feedback", Some(&title), Some(&answer), &bubbles);
            session.apply(SessionPatch {
                expecting_button_action: Some(true),
                current_stage: Some("wrong_answer_feedback".to_string()),
                ..Default::default()
            });
            return respond(
                session,
                ResponseBody::Bubbles(bubbles),
                MessageFormat::MultipleBubbles,
            );
        }

        let required = session.required_correct_answers;

        // A correct answer past the threshold on a mastered concept is a
        // bonus round and does not re-increment progress.
        if session.concept_mastered && session.current_concept_correct_answers >= required {
            return self.additional_correct(session, &answer, &evaluation);
        }

        session.current_concept_correct_answers += 1;
        let correct = session.current_concept_correct_answers;
        let mut feedback = format!(
            "CORRECT!\nGreat job! Your answer is absolutely right. You covered all the key \
             points:\n\n**Progress: {correct}/{required} correct answers**"
        );

        if correct >= required {
            if !session.concepts_learned.contains(&title) {
                session.concepts_learned.push(title.clone());
            }
            feedback.push_str(&format!(
                "\n\n**Concept Mastered!**\nYou've successfully answered {required} questions \
                 correctly."
            ));
            let bubbles = vec![
                Bubble::text(feedback, MessageType::MasteryFeedback),
                Bubble::with_buttons(
                    NEXT_PROMPT,
                    MessageType::MasteryButtons,
                    buttons::mastery_buttons(),
                ),
            ];
            session.record_bubbles("concept_mastered", Some(&title), Some(&answer), &bubbles);
            session.apply(SessionPatch {
                concept_mastered: Some(true),
                expecting_button_action: Some(true),
                current_question: Some(None),
                current_stage: Some("concept_mastered".to_string()),
                ..Default::default()
            });
            info!(concept = %title, "concept mastered");
            return respond(
                session,
                ResponseBody::Bubbles(bubbles),
                MessageFormat::MultipleBubbles,
            );
        }

        // Still short of the threshold: ask the next question in the same
        // message.
        let question = self.question_or_fallback(session, &title, &content).await;
        session.current_concept_questions_asked.push(question.clone());
        let message = format!(
            "{feedback}\n\nLet's try another question:\n\n**Question {}:**\n{question}",
            correct + 1
        );
        let keywords = self.keywords_or_fallback(&title, &content, &question).await;
        session.record_bubbles(
            "next_question",
            Some(&title),
            Some(&answer),
            &[Bubble::text(message.clone(), MessageType::Question)],
        );
        session.apply(SessionPatch {
            expecting_answer: Some(true),
            current_expected_keywords: Some(keywords),
            current_question: Some(Some(question)),
            current_stage: Some("next_question".to_string()),
            ..Default::default()
        });
        respond(session, ResponseBody::Single(message), MessageFormat::Single)
    }

    fn additional_correct(
        &self,
        session: &mut Session,
        answer: &str,
        evaluation: &Evaluation,
    ) -> TurnResponse {
        let justification = if evaluation.justification.is_empty() {
            "Great explanation!"
        } else {
            evaluation.justification.as_str()
        };
        let feedback = format!(
            "CORRECT!\nExcellent! You continue to demonstrate strong understanding of this \
             concept.\n\nWhat you got right:\n{justification}"
        );
        let bubbles = vec![
            Bubble::text(feedback, MessageType::AdditionalCorrect),
            Bubble::with_buttons(
                NEXT_PROMPT,
                MessageType::MasteryButtons,
                buttons::mastery_buttons(),
            ),
        ];
        let concept = session.current_question_concept.clone();
        session.record_bubbles("additional_correct", concept.as_deref(), Some(answer), &bubbles);
        session.apply(SessionPatch {
            expecting_button_action: Some(true),
            current_question: Some(None),
            current_stage: Some("additional_correct".to_string()),
            ..Default::default()
        });
        respond(
            session,
            ResponseBody::Bubbles(bubbles),
            MessageFormat::MultipleBubbles,
        )
    }

    async fn question_or_fallback(
        &self,
        session: &Session,
        title: &str,
        content: &str,
    ) -> String {
        let history = session.recent_history(self.config.history_window);
        match self.generation.check_question(title, content, &history).await {
            Ok(question) => question,
            Err(error) => {
                warn!(%error, "check question generation failed; using templated question");
                fallback_question(title)
            }
        }
    }

    async fn keywords_or_fallback(
        &self,
        title: &str,
        content: &str,
        question: &str,
    ) -> Vec<String> {
        match self
            .generation
            .extract_keywords(title, content, question)
            .await
        {
            Ok(keywords) => keywords,
            Err(error) => {
                warn!(%error, "keyword extraction failed; falling back to title words");
                title
                    .split_whitespace()
                    .take(3)
                    .map(str::to_lowercase)
                    .collect()
            }
        }
    }

    async fn summary_or_fallback(&self, session: &Session) -> String {
        let mastered = session.concepts_learned.len();
        let total = session.concept_chunks.len();
        let history = session.recent_history(self.config.history_window);
        match self.generation.summarize(mastered, total, &history).await {
            Ok(summary) => summary,
            Err(error) => {
                warn!(%error, "summary generation failed; using templated summary");
                format!(
                    "You've completed this revision session and mastered {mastered} of {total} \
                     concepts. Well done!"
                )
            }
        }
    }
}
