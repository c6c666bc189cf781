//! Signaling relay wire format
//!
//! One JSON object per relay message, discriminated by its `type` field:
//!
//! ```text
//! {"type":"login","username":"u1","password":"1234"}
//! {"type":"login","valid":"1"}
//! {"type":"offer","offer":{"sdp":"...","type":"offer"}}
//! {"type":"answer","answer":{"sdp":"...","type":"answer"}}
//! {"type":"ice_candidate","candidate":{"component":1,"foundation":"...", ...}}
//! ```
//!
//! Decoding never fails on an unknown `type`; such messages decode to `None`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};

/// SDP description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Offer from the initiating peer
    Offer,
    /// Answer from the responding peer
    Answer,
    /// Provisional answer
    Pranswer,
    /// Rollback of a pending description
    Rollback,
}

/// Session description as carried in `offer` and `answer` envelopes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// SDP body
    pub sdp: String,

    /// Description type
    #[serde(rename = "type")]
    pub kind: SdpKind,
}

impl SessionDescription {
    /// Create an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpKind::Offer,
        }
    }

    /// Create an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpKind::Answer,
        }
    }
}

/// Credentials forwarded opaquely to the remote authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// User identifier
    pub username: String,

    /// Passcode (sent as `password` on the wire)
    #[serde(rename = "password")]
    pub passcode: String,
}

/// Remote authority verdict on a login request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginResult {
    /// Whether the credentials were accepted
    pub valid: bool,
}

/// Signaling envelope exchanged with the relay
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEnvelope {
    /// Login credentials (client -> authority)
    Login(LoginRequest),
    /// Login verdict (authority -> client)
    LoginResult(LoginResult),
    /// SDP offer
    Offer(SessionDescription),
    /// SDP answer
    Answer(SessionDescription),
    /// One trickled ICE candidate
    IceCandidate(IceCandidateDescriptor),
}

/// Borrowed serialization shape; `login` is shared by request and result
#[derive(Serialize)]
#[serde(tag = "type")]
enum WireEnvelope<'a> {
    #[serde(rename = "login")]
    Login {
        username: &'a str,
        password: &'a str,
    },
    #[serde(rename = "login")]
    LoginResult { valid: &'static str },
    #[serde(rename = "offer")]
    Offer { offer: &'a SessionDescription },
    #[serde(rename = "answer")]
    Answer { answer: &'a SessionDescription },
    #[serde(rename = "ice_candidate")]
    IceCandidate { candidate: &'a IceCandidateDescriptor },
}

impl SignalingEnvelope {
    /// Wire name of this envelope's kind
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingEnvelope::Login(_) | SignalingEnvelope::LoginResult(_) => "login",
            SignalingEnvelope::Offer(_) => "offer",
            SignalingEnvelope::Answer(_) => "answer",
            SignalingEnvelope::IceCandidate(_) => "ice_candidate",
        }
    }

    /// Convert envelope to JSON string
    pub fn to_json(&self) -> Result<String> {
        let wire = match self {
            SignalingEnvelope::Login(req) => WireEnvelope::Login {
                username: &req.username,
                password: &req.passcode,
            },
            SignalingEnvelope::LoginResult(result) => WireEnvelope::LoginResult {
                valid: if result.valid { "1" } else { "0" },
            },
            SignalingEnvelope::Offer(offer) => WireEnvelope::Offer { offer },
            SignalingEnvelope::Answer(answer) => WireEnvelope::Answer { answer },
            SignalingEnvelope::IceCandidate(candidate) => WireEnvelope::IceCandidate { candidate },
        };

        serde_json::to_string(&wire).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize signaling envelope: {}", e))
        })
    }

    /// Parse envelope from JSON string
    ///
    /// Returns `Ok(None)` for unknown kinds and for end-of-candidates markers.
    /// Malformed payloads of a known kind are a protocol error.
    pub fn from_json(json: &str) -> Result<Option<Self>> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| Error::ProtocolError(format!("Signaling message is not JSON: {}", e)))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::ProtocolError("Signaling message has no type".to_string()))?;

        let envelope = match kind {
            "login" => match value.get("valid") {
                Some(valid) => SignalingEnvelope::LoginResult(LoginResult {
                    valid: is_truthy(valid),
                }),
                None => SignalingEnvelope::Login(decode(value.clone(), "login")?),
            },
            "offer" => SignalingEnvelope::Offer(decode_field(&value, "offer")?),
            "answer" => SignalingEnvelope::Answer(decode_field(&value, "answer")?),
            "ice_candidate" => match value.get("candidate") {
                None | Some(Value::Null) => {
                    debug!("End-of-candidates marker received");
                    return Ok(None);
                }
                Some(_) => SignalingEnvelope::IceCandidate(decode_field(&value, "candidate")?),
            },
            other => {
                debug!("Ignoring unknown signaling message type: {}", other);
                return Ok(None);
            }
        };

        Ok(Some(envelope))
    }
}

/// Loose login verdict: `"1"`, `1` and `true` are accepted, anything else rejects
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::String(s) => s == "1",
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

fn decode<T: for<'de> Deserialize<'de>>(value: Value, kind: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::ProtocolError(format!("Invalid {} payload: {}", kind, e)))
}

fn decode_field<T: for<'de> Deserialize<'de>>(value: &Value, field: &str) -> Result<T> {
    let inner = value
        .get(field)
        .cloned()
        .ok_or_else(|| Error::ProtocolError(format!("Missing '{}' payload", field)))?;
    decode(inner, field)
}

/// ICE component a candidate belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceComponent {
    /// Media/data component (1)
    Rtp,
    /// Control component (2)
    Rtcp,
}

impl IceComponent {
    /// Map a numeric component id; anything but 1 and 2 is absent
    pub fn from_id(id: u64) -> Option<Self> {
        match id {
            1 => Some(IceComponent::Rtp),
            2 => Some(IceComponent::Rtcp),
            _ => None,
        }
    }

    /// Map a component name as browsers report it
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rtp" | "1" => Some(IceComponent::Rtp),
            "rtcp" | "2" => Some(IceComponent::Rtcp),
            _ => None,
        }
    }

    /// Numeric id used on the wire
    pub fn id(self) -> u16 {
        match self {
            IceComponent::Rtp => 1,
            IceComponent::Rtcp => 2,
        }
    }
}

mod component_codec {
    use super::IceComponent;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S>(component: &Option<IceComponent>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match component {
            Some(c) => serializer.serialize_u16(c.id()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<IceComponent>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Number(n) => n.as_u64().and_then(IceComponent::from_id),
            Value::String(s) => IceComponent::from_name(&s),
            _ => None,
        })
    }
}

/// The relay peer sends `sdpMid` as a number, browsers as a string
fn lenient_mid<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "sdpMid must be a string or number, got {}",
            other
        ))),
    }
}

/// One discovered network path, as exchanged in `ice_candidate` envelopes
///
/// Inbound descriptors may carry either the raw SDP candidate line or only
/// structured geometry; every geometry field is therefore optional on decode
/// and checked when the candidate is applied.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateDescriptor {
    /// Raw `candidate:...` SDP attribute value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,

    /// Normalized component (null when unknown)
    #[serde(default, with = "component_codec")]
    pub component: Option<IceComponent>,

    /// Candidate foundation
    #[serde(default)]
    pub foundation: Option<String>,

    /// Candidate address (`ip` is accepted as an alias)
    #[serde(default, alias = "ip")]
    pub address: Option<String>,

    /// Candidate port
    #[serde(default)]
    pub port: Option<u16>,

    /// Candidate priority
    #[serde(default)]
    pub priority: Option<u32>,

    /// Transport protocol (udp/tcp)
    #[serde(default)]
    pub protocol: Option<String>,

    /// Candidate type (host/srflx/prflx/relay)
    #[serde(default, rename = "type")]
    pub candidate_type: Option<String>,

    /// Related address for reflexive/relay candidates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_address: Option<String>,

    /// Related port for reflexive/relay candidates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_port: Option<u16>,

    /// Media stream identification tag
    #[serde(default, deserialize_with = "lenient_mid")]
    pub sdp_mid: Option<String>,

    /// Media line index
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidateDescriptor {
    /// Build a descriptor for a locally gathered candidate
    ///
    /// The component is normalized to {1, 2, absent} before transmission.
    pub fn from_local(candidate: &RTCIceCandidate) -> Result<Self> {
        let init = candidate.to_json().map_err(|e| {
            Error::IceCandidateError(format!("Failed to encode local candidate: {}", e))
        })?;

        Ok(Self {
            candidate: Some(init.candidate),
            component: IceComponent::from_id(u64::from(candidate.component)),
            foundation: Some(candidate.foundation.clone()),
            address: Some(candidate.address.clone()),
            port: Some(candidate.port),
            priority: Some(candidate.priority),
            protocol: Some(candidate.protocol.to_string()),
            candidate_type: Some(candidate.typ.to_string()),
            related_address: non_empty(&candidate.related_address),
            related_port: non_empty(&candidate.related_address).map(|_| candidate.related_port),
            sdp_mid: init.sdp_mid,
            sdp_m_line_index: init.sdp_mline_index,
        })
    }

    /// Whether this descriptor only marks the end of trickled candidates
    pub fn is_end_of_candidates(&self) -> bool {
        match &self.candidate {
            Some(line) => line.trim().is_empty() && self.address.is_none(),
            None => {
                self.foundation.is_none()
                    && self.address.is_none()
                    && self.port.is_none()
                    && self.candidate_type.is_none()
            }
        }
    }

    /// SDP candidate line for this descriptor
    ///
    /// A raw line wins over structured geometry. Either way the line must
    /// carry foundation, component, protocol, priority, address, port and type.
    pub fn candidate_line(&self) -> Result<String> {
        if let Some(line) = self.candidate.as_deref().filter(|l| !l.trim().is_empty()) {
            let body = line.trim().strip_prefix("candidate:").unwrap_or(line.trim());
            let fields: Vec<&str> = body.split_whitespace().collect();
            if fields.len() < 8 || fields[6] != "typ" {
                return Err(Error::IceCandidateError(format!(
                    "Malformed candidate line: {}",
                    line
                )));
            }
            return Ok(format!("candidate:{}", body));
        }

        let missing = |field: &str| {
            Error::IceCandidateError(format!("Candidate is missing required field '{}'", field))
        };
        let foundation = self.foundation.as_deref().ok_or_else(|| missing("foundation"))?;
        let address = self.address.as_deref().ok_or_else(|| missing("address"))?;
        let port = self.port.ok_or_else(|| missing("port"))?;
        let priority = self.priority.ok_or_else(|| missing("priority"))?;
        let protocol = self.protocol.as_deref().ok_or_else(|| missing("protocol"))?;
        let typ = self.candidate_type.as_deref().ok_or_else(|| missing("type"))?;
        let component = self.component.unwrap_or(IceComponent::Rtp).id();

        let mut line = format!(
            "candidate:{} {} {} {} {} {} typ {}",
            foundation,
            component,
            protocol.to_lowercase(),
            priority,
            address,
            port,
            typ
        );
        if let (Some(raddr), Some(rport)) = (&self.related_address, self.related_port) {
            line.push_str(&format!(" raddr {} rport {}", raddr, rport));
        }

        Ok(line)
    }

    /// Convert to the form the ICE agent accepts
    pub fn to_candidate_init(&self) -> Result<RTCIceCandidateInit> {
        Ok(RTCIceCandidateInit {
            candidate: self.candidate_line()?,
            sdp_mid: self.sdp_mid.clone(),
            sdp_mline_index: self.sdp_m_line_index,
            username_fragment: None,
        })
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
