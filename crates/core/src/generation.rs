//! Generation Service
//!
//! This module defines the contract for the text-generation collaborator: ten
//! black-box operations the state machine calls to produce explanations,
//! questions, verdicts, and classifications. The trait keeps the machine
//! decoupled from any provider; an OpenAI-compatible implementation is
//! provided for production use.
//!
//! Every operation is fallible and potentially slow. The state machine, not
//! this module, owns the fallback applied when a call fails or returns
//! something unparseable.

use crate::parse;
use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use std::collections::HashMap;

/// The evaluation outcome of a free-text answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Correct,
    Partial,
    Wrong,
}

/// A graded answer with the grader's reasoning.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub justification: String,
    pub correction: String,
}

/// A structured three-part concept explanation.
#[derive(Debug, Clone, PartialEq)]
pub struct Explanation {
    pub definition: String,
    pub technical: String,
    pub examples: String,
}

/// What the student's free-text input is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Acknowledgement,
    AskingQuestion,
    Other,
}

/// Whether a question belongs to the concept currently being revised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relevance {
    Relevant,
    Irrelevant,
}

/// Full context for grading one quiz answer.
#[derive(Debug, Clone)]
pub struct AnswerEvaluation {
    pub answer: String,
    pub expected_keywords: Vec<String>,
    pub question: String,
    pub title: String,
    pub content: String,
    pub history: String,
}

/// The text-generation operations the conversation state machine depends on.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Produces the three-section explanation for a concept.
    async fn explain(&self, title: &str, content: &str, history: &str) -> Result<Explanation>;

    /// Produces additional worked examples for the current concept.
    async fn example_text(&self, title: &str, content: &str, history: &str) -> Result<String>;

    /// Re-explains the concept as a list of numbered steps.
    async fn re_explain_steps(
        &self,
        title: &str,
        content: &str,
        history: &str,
        steps: usize,
    ) -> Result<Vec<String>>;

    /// Produces one short check question for the concept.
    async fn check_question(&self, title: &str, content: &str, history: &str) -> Result<String>;

    /// Extracts the minimal keywords a correct answer should contain.
    async fn extract_keywords(
        &self,
        title: &str,
        content: &str,
        question: &str,
    ) -> Result<Vec<String>>;

    /// Grades a free-text answer against the full quiz context.
    async fn evaluate_answer(&self, request: &AnswerEvaluation) -> Result<Evaluation>;

    /// Answers an on-topic student question.
    async fn answer_question(
        &self,
        question: &str,
        concept: &str,
        content: &str,
        history: &str,
    ) -> Result<String>;

    /// Classifies what the student's input is trying to do.
    async fn classify_intent(&self, input: &str, concept: &str, history: &str) -> Result<Intent>;

    /// Decides whether a question belongs to the current concept.
    async fn classify_relevance(
        &self,
        input: &str,
        concept: &str,
        content: &str,
    ) -> Result<Relevance>;

    /// Produces the end-of-session summary.
    async fn summarize(&self, mastered: usize, total: usize, history: &str) -> Result<String>;
}

const TUTOR_SYSTEM_PROMPT: &str = "You are a patient, encouraging revision tutor.";

/// An implementation of [`GenerationService`] for any OpenAI-compatible chat
/// API.
///
/// Prompt templates are supplied as a map of `{placeholder}`-style strings;
/// the wording lives outside the core and can be swapped without touching
/// this code.
pub struct OpenAiGenerationService {
    client: Client<OpenAIConfig>,
    model: String,
    prompts: HashMap<String, String>,
}

impl OpenAiGenerationService {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - API configuration, including key and base URL.
    /// * `model` - Chat model identifier (e.g. "gpt-4o").
    /// * `prompts` - Template map; must contain the keys `explain`,
    ///   `examples`, `re_explain`, `check_question`, `keywords`, `evaluate`,
    ///   `qa_response`, `intent`, `relevance`, and `conclusion`.
    pub fn new(config: OpenAIConfig, model: String, prompts: HashMap<String, String>) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            prompts,
        }
    }

    /// Renders the named template and runs one chat completion over it.
    async fn complete(&self, key: &str, substitutions: &[(&str, &str)]) -> Result<String> {
        let template = self
            .prompts
            .get(key)
            .with_context(|| format!("Missing prompt template: '{key}'"))?;
        let mut prompt = template.clone();
        for (placeholder, value) in substitutions {
            prompt = prompt.replace(&format!("{{{placeholder}}}"), value);
        }

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(TUTOR_SYSTEM_PROMPT)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;
        let answer = response
            .choices
            .first()
            .context("No response choice from the model")?
            .message
            .content
            .as_ref()
            .context("No content in model response")?;
        Ok(answer.trim().to_string())
    }
}

#[async_trait]
impl GenerationService for OpenAiGenerationService {
    async fn explain(&self, title: &str, content: &str, history: &str) -> Result<Explanation> {
        let text = self
            .complete(
                "explain",
                &[
                    ("title", title),
                    ("content", content),
                    ("conversation_history", history),
                ],
            )
            .await?;
        parse::split_sections(&text).context("explanation did not contain three sections")
    }

    async fn example_text(&self, title: &str, content: &str, history: &str) -> Result<String> {
        self.complete(
            "examples",
            &[
                ("title", title),
                ("content", content),
                ("conversation_history", history),
            ],
        )
        .await
    }

    async fn re_explain_steps(
        &self,
        title: &str,
        content: &str,
        history: &str,
        steps: usize,
    ) -> Result<Vec<String>> {
        let steps_str = steps.to_string();
        let text = self
            .complete(
                "re_explain",
                &[
                    ("title", title),
                    ("content", content),
                    ("conversation_history", history),
                    ("steps", steps_str.as_str()),
                ],
            )
            .await?;
        let lines: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(steps)
            .map(str::to_string)
            .collect();
        anyhow::ensure!(!lines.is_empty(), "re-explanation came back empty");
        Ok(lines)
    }

    async fn check_question(&self, title: &str, content: &str, history: &str) -> Result<String> {
        let question = self
            .complete(
                "check_question",
                &[
                    ("title", title),
                    ("content", content),
                    ("conversation_history", history),
                ],
            )
            .await?;
        anyhow::ensure!(!question.is_empty(), "check question came back empty");
        Ok(question)
    }

    async fn extract_keywords(
        &self,
        title: &str,
        content: &str,
        question: &str,
    ) -> Result<Vec<String>> {
        let text = self
            .complete(
                "keywords",
                &[("title", title), ("content", content), ("question", question)],
            )
            .await?;
        parse::parse_keywords(&text).context("keyword list was not a JSON array of strings")
    }

    async fn evaluate_answer(&self, request: &AnswerEvaluation) -> Result<Evaluation> {
        let keywords = request.expected_keywords.join(", ");
        let text = self
            .complete(
                "evaluate",
                &[
                    ("title", request.title.as_str()),
                    ("content", request.content.as_str()),
                    ("check_question", request.question.as_str()),
                    ("user_answer", request.answer.as_str()),
                    ("expected_keywords", keywords.as_str()),
                    ("conversation_history", request.history.as_str()),
                ],
            )
            .await?;
        Ok(parse::parse_evaluation(&text))
    }

    async fn answer_question(
        &self,
        question: &str,
        concept: &str,
        content: &str,
        history: &str,
    ) -> Result<String> {
        self.complete(
            "qa_response",
            &[
                ("user_question", question),
                ("current_concept", concept),
                ("content", content),
                ("conversation_history", history),
            ],
        )
        .await
    }

    async fn classify_intent(&self, input: &str, concept: &str, history: &str) -> Result<Intent> {
        let text = self
            .complete(
                "intent",
                &[
                    ("user_input", input),
                    ("current_concept", concept),
                    ("conversation_history", history),
                ],
            )
            .await?;
        Ok(parse::parse_intent(&text))
    }

    async fn classify_relevance(
        &self,
        input: &str,
        concept: &str,
        content: &str,
    ) -> Result<Relevance> {
        let text = self
            .complete(
                "relevance",
                &[
                    ("user_input", input),
                    ("current_concept", concept),
                    ("content", content),
                ],
            )
            .await?;
        Ok(parse::parse_relevance(&text))
    }

    async fn summarize(&self, mastered: usize, total: usize, history: &str) -> Result<String> {
        let mastered_str = mastered.to_string();
        let total_str = total.to_string();
        self.complete(
            "conclusion",
            &[
                ("correct", mastered_str.as_str()),
                ("total", total_str.as_str()),
                ("conversation_history", history),
            ],
        )
        .await
    }
}
