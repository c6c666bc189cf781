//! Control channel: data channel wrapper, message types and protocol

pub mod data_channel;
pub mod messages;
pub mod protocol;

pub use data_channel::{DataChannel, DataChannelState};
pub use messages::{
    ControlMessage, HandStatus, HandsDownTime, Question, QuestionImage, QuizResult,
    QUIZ_START_COMMAND,
};
pub use protocol::ControlProtocol;

use crate::Result;
use async_trait::async_trait;

/// Text channel carrying control messages
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Channel label
    fn label(&self) -> &str;

    /// Whether the channel reports open
    fn is_open(&self) -> bool;

    /// Send one text message
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Close the channel
    async fn close(&self) -> Result<()>;
}
