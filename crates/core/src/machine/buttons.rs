//! Button Action Matching
//!
//! Button clicks arrive as free text: either the canonical action token the
//! client sends (`more_examples`) or the human-readable label the student may
//! have typed ("I need more examples"). An exact, case-insensitive token match
//! wins; otherwise the input is scanned for the action's key phrase.

use crate::session::Button;

/// The interactive actions the tutor can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    MoreExamples,
    ReExplain,
    CheckUnderstanding,
    MoreQuestions,
    NextConcept,
}

impl ButtonAction {
    const ALL: [ButtonAction; 5] = [
        ButtonAction::MoreExamples,
        ButtonAction::ReExplain,
        ButtonAction::CheckUnderstanding,
        ButtonAction::MoreQuestions,
        ButtonAction::NextConcept,
    ];

    /// The canonical action token sent by the client.
    pub fn token(&self) -> &'static str {
        match self {
            ButtonAction::MoreExamples => "more_examples",
            ButtonAction::ReExplain => "re_explain",
            ButtonAction::CheckUnderstanding => "check_understanding",
            ButtonAction::MoreQuestions => "more_questions",
            ButtonAction::NextConcept => "next_concept",
        }
    }

    /// The phrase matched inside typed input.
    fn phrase(&self) -> &'static str {
        match self {
            ButtonAction::MoreExamples => "more examples",
            ButtonAction::ReExplain => "re-explain",
            ButtonAction::CheckUnderstanding => "check my understanding",
            ButtonAction::MoreQuestions => "more questions",
            ButtonAction::NextConcept => "next concept",
        }
    }

    /// The label rendered on the button itself.
    pub fn label(&self) -> &'static str {
        match self {
            ButtonAction::MoreExamples => "I need more examples",
            ButtonAction::ReExplain => "Can you re-explain?",
            ButtonAction::CheckUnderstanding => "Let me check my understanding with some Q&A",
            ButtonAction::MoreQuestions => "Could you provide a few more questions?",
            ButtonAction::NextConcept => "Can you move to the next concept?",
        }
    }

    /// Matches free text against the known actions.
    ///
    /// A canonical token match takes precedence over phrase containment, so
    /// input like "more_questions" is never misread through a longer phrase.
    pub fn parse(input: &str) -> Option<ButtonAction> {
        let normalized = input.trim().to_lowercase();
        Self::ALL
            .iter()
            .find(|action| normalized == action.token())
            .or_else(|| {
                Self::ALL
                    .iter()
                    .find(|action| normalized.contains(action.phrase()))
            })
            .copied()
    }

    /// Renders this action as a clickable button.
    pub fn button(&self) -> Button {
        Button {
            text: self.label().to_string(),
            action: self.token().to_string(),
        }
    }
}

/// The learning-support button set offered while a concept is being studied.
/// The quiz entry point appears only once the student has used support at
/// least once.
pub fn learning_buttons(include_check: bool) -> Vec<Button> {
    let mut buttons = vec![
        ButtonAction::MoreExamples.button(),
        ButtonAction::ReExplain.button(),
    ];
    if include_check {
        buttons.push(ButtonAction::CheckUnderstanding.button());
    }
    buttons
}

/// The options offered after a concept has been mastered.
pub fn mastery_buttons() -> Vec<Button> {
    vec![
        ButtonAction::MoreQuestions.button(),
        ButtonAction::NextConcept.button(),
    ]
}
