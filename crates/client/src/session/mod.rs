//! Client event model and dispatch loop

pub mod client;
pub mod events;

pub use client::{ClientHandle, QuizClient};
pub use events::{ClientCommand, ConsumerEvent, EventSender, QuizStage, SessionEvent};
