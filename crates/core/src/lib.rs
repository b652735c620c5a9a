//! Revise Core
//!
//! The conversation engine behind an adaptive revision tutor: a typed session
//! model, narrow traits for the persistence / content / generation
//! collaborators, and the state machine that walks a student through concept
//! explanations, check questions, and mastery, one turn at a time.

pub mod content;
pub mod generation;
pub mod machine;
pub mod parse;
pub mod session;
pub mod store;

pub use machine::{MachineConfig, MessageFormat, ResponseBody, StateMachine, TurnResponse};
pub use session::{Bubble, Button, ConceptChunk, ConversationTurn, MessageType, Session};
