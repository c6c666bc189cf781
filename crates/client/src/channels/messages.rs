//! Control channel message types
//!
//! Messages are JSON objects discriminated by a `message` field, except the
//! quiz start command which travels as the bare string `quiz_start`.

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Literal command string that starts the quiz
pub const QUIZ_START_COMMAND: &str = "quiz_start";

/// Maximum number of answer choices per question
pub const MAX_CHOICES: usize = 4;

/// Message exchanged over the control channel
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Hand visibility status from the remote peer
    HandStatus(HandStatus),
    /// Next question from the remote peer
    NewQuestion(Question),
    /// Final result from the remote peer
    QuizFinished(QuizResult),
    /// Start command from the local side
    QuizStart,
}

/// Hand visibility status bar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandStatus {
    /// Whether both hands are visible
    pub seen: bool,
    /// Text to display
    pub text: String,
    /// Display color (CSS color string)
    pub color: String,
}

impl HandStatus {
    /// Status reported when hands are visible
    pub fn seen() -> Self {
        Self {
            seen: true,
            text: "Hands detected".to_string(),
            color: "#49ff34".to_string(),
        }
    }

    /// Status reported when hands are not visible
    pub fn unseen() -> Self {
        Self {
            seen: false,
            text: "Show both hands!".to_string(),
            color: "yellow".to_string(),
        }
    }
}

impl Default for HandStatus {
    /// Status shown before the remote peer reports anything
    fn default() -> Self {
        Self {
            seen: false,
            text: "Use your hands".to_string(),
            color: "yellow".to_string(),
        }
    }
}

/// One quiz question
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    /// Display label such as "Question 1"
    pub label: Option<String>,
    /// Question text
    pub text: String,
    /// Answer choices by position; slot `i` is choice `i + 1` on the wire
    pub choices: [Option<String>; MAX_CHOICES],
    /// Optional visual aid
    pub image: Option<QuestionImage>,
}

impl Question {
    /// Choice at a 1-based position
    pub fn choice(&self, position: usize) -> Option<&str> {
        position
            .checked_sub(1)
            .and_then(|i| self.choices.get(i))
            .and_then(|choice| choice.as_deref())
    }

    /// Present choices with their 1-based positions
    pub fn choices(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.choices
            .iter()
            .enumerate()
            .filter_map(|(i, choice)| choice.as_deref().map(|text| (i + 1, text)))
    }
}

/// Still image attached to a question
#[derive(Clone, PartialEq)]
pub struct QuestionImage {
    /// Encoded image bytes
    pub bytes: Vec<u8>,
    /// Format detected from the bytes
    pub format: ImageFormat,
}

impl QuestionImage {
    /// Decode a base64 payload (bare or `data:` URL) into a recognised still image
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let payload = match encoded.trim().strip_prefix("data:") {
            Some(rest) => rest
                .split_once(";base64,")
                .map(|(_, data)| data)
                .ok_or_else(|| {
                    Error::ProtocolError("Image data URL is not base64 encoded".to_string())
                })?,
            None => encoded.trim(),
        };

        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| Error::ProtocolError(format!("Image is not valid base64: {}", e)))?;
        let format = image::guess_format(&bytes)
            .map_err(|e| Error::ProtocolError(format!("Unrecognised image format: {}", e)))?;

        Ok(Self { bytes, format })
    }

    /// MIME type of the image
    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    /// Base64 encoding of the image bytes
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// `data:` URL suitable for direct rendering
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), self.to_base64())
    }
}

impl fmt::Debug for QuestionImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuestionImage")
            .field("format", &self.format)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Final quiz result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuizResult {
    /// Score percentage in 0..=100
    pub score: f64,
    /// Cumulative time the hands were not visible
    pub hands_down: HandsDownTime,
}

/// Hands-down time, held in hundredths of a second
///
/// Reported seconds are scaled by 100 and rounded half away from zero as
/// an `f64`. Halfway inputs that binary floating point cannot represent
/// exactly land on whichever side their stored value falls: 12.345 s
/// becomes `12.35`, 1.005 s becomes `1.00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct HandsDownTime {
    centis: u64,
}

impl HandsDownTime {
    /// Build from reported seconds
    ///
    /// # Errors
    ///
    /// Returns `Error::ProtocolError` for negative or non-finite values.
    pub fn from_seconds(seconds: f64) -> Result<Self> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(Error::ProtocolError(format!(
                "hands_unseen must be a non-negative number, got {}",
                seconds
            )));
        }
        Ok(Self {
            centis: (seconds * 100.0).round() as u64,
        })
    }

    /// Build from hundredths of a second
    pub fn from_centis(centis: u64) -> Self {
        Self { centis }
    }

    /// Whole hundredths of a second
    pub fn centis(&self) -> u64 {
        self.centis
    }

    /// Seconds as a float
    pub fn as_secs_f64(&self) -> f64 {
        self.centis as f64 / 100.0
    }
}

impl fmt::Display for HandsDownTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.centis / 100, self.centis % 100)
    }
}

/// JSON shape on the wire
#[derive(Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "snake_case")]
enum WireMessage {
    HandSeen {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
    HandUnseen {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
    NewQuestion {
        question: String,
        #[serde(default, rename = "qNo", skip_serializing_if = "Option::is_none")]
        q_no: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        choice1: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        choice2: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        choice3: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        choice4: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<String>,
    },
    QuizFinished {
        score: f64,
        hands_unseen: f64,
    },
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    /// Short name for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::HandStatus(status) if status.seen => "hand_seen",
            ControlMessage::HandStatus(_) => "hand_unseen",
            ControlMessage::NewQuestion(_) => "new_question",
            ControlMessage::QuizFinished(_) => "quiz_finished",
            ControlMessage::QuizStart => QUIZ_START_COMMAND,
        }
    }

    /// Parse one control channel text message
    ///
    /// Returns `Ok(None)` for an unrecognised `message` tag.
    pub fn parse(text: &str) -> Result<Option<Self>> {
        if text.trim() == QUIZ_START_COMMAND {
            return Ok(Some(ControlMessage::QuizStart));
        }

        let wire: WireMessage = serde_json::from_str(text)
            .map_err(|e| Error::ProtocolError(format!("Invalid control message: {}", e)))?;

        let message = match wire {
            WireMessage::HandSeen { text, color } => {
                let default = HandStatus::seen();
                ControlMessage::HandStatus(HandStatus {
                    seen: true,
                    text: text.unwrap_or(default.text),
                    color: color.unwrap_or(default.color),
                })
            }
            WireMessage::HandUnseen { text, color } => {
                let default = HandStatus::unseen();
                ControlMessage::HandStatus(HandStatus {
                    seen: false,
                    text: text.unwrap_or(default.text),
                    color: color.unwrap_or(default.color),
                })
            }
            WireMessage::NewQuestion {
                question,
                q_no,
                choice1,
                choice2,
                choice3,
                choice4,
                image,
            } => {
                // Blank choices are absent; the rest keep their positions
                let choices = [choice1, choice2, choice3, choice4]
                    .map(|choice| choice.filter(|text| !text.trim().is_empty()));
                if choices.iter().all(Option::is_none) {
                    return Err(Error::ProtocolError(
                        "new_question carries no choices".to_string(),
                    ));
                }

                let image = image
                    .filter(|encoded| !encoded.trim().is_empty())
                    .and_then(|encoded| match QuestionImage::from_base64(&encoded) {
                        Ok(image) => Some(image),
                        Err(e) => {
                            warn!("Dropping question image: {}", e);
                            None
                        }
                    });

                ControlMessage::NewQuestion(Question {
                    label: q_no,
                    text: question,
                    choices,
                    image,
                })
            }
            WireMessage::QuizFinished {
                score,
                hands_unseen,
            } => {
                if !score.is_finite() || !(0.0..=100.0).contains(&score) {
                    return Err(Error::ProtocolError(format!(
                        "quiz_finished score must be within 0..=100, got {}",
                        score
                    )));
                }
                ControlMessage::QuizFinished(QuizResult {
                    score,
                    hands_down: HandsDownTime::from_seconds(hands_unseen)?,
                })
            }
            WireMessage::Unknown => return Ok(None),
        };

        Ok(Some(message))
    }

    /// Encode for the control channel
    pub fn to_wire(&self) -> Result<String> {
        let wire = match self {
            ControlMessage::QuizStart => return Ok(QUIZ_START_COMMAND.to_string()),
            ControlMessage::HandStatus(status) if status.seen => WireMessage::HandSeen {
                text: Some(status.text.clone()),
                color: Some(status.color.clone()),
            },
            ControlMessage::HandStatus(status) => WireMessage::HandUnseen {
                text: Some(status.text.clone()),
                color: Some(status.color.clone()),
            },
            ControlMessage::NewQuestion(question) => {
                if question.choices().next().is_none() {
                    return Err(Error::ProtocolError(
                        "A question needs at least one choice".to_string(),
                    ));
                }
                let [choice1, choice2, choice3, choice4] = question.choices.clone();
                WireMessage::NewQuestion {
                    question: question.text.clone(),
                    q_no: question.label.clone(),
                    choice1,
                    choice2,
                    choice3,
                    choice4,
                    image: question.image.as_ref().map(QuestionImage::to_base64),
                }
            }
            ControlMessage::QuizFinished(result) => WireMessage::QuizFinished {
                score: result.score,
                hands_unseen: result.hands_down.as_secs_f64(),
            },
        };

        serde_json::to_string(&wire).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize control message: {}", e))
        })
    }
}
