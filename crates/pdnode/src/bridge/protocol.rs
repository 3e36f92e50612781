//! Wire protocol types for host-child communication.
//!
//! One JSON object per line:
//! - **Host → child**: `message` envelopes carrying an inlet index, selector, and atoms
//! - **Child → host**: `ready`, `outlet`, `log`, `error`
//!
//! Inbound frames are validated once into a typed [`InboundEvent`]; anything that
//! does not fit the schema becomes a [`ProtocolError`] and is never partially applied.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single message argument: a number or a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Atom {
    Float(f64),
    Symbol(String),
}

impl From<f64> for Atom {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Atom {
    fn from(value: &str) -> Self {
        Self::Symbol(value.to_string())
    }
}

impl From<String> for Atom {
    fn from(value: String) -> Self {
        Self::Symbol(value)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{}", v),
            Self::Symbol(s) => f.write_str(s),
        }
    }
}

/// Messages from host to child (stdin).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostRequest {
    Message {
        inlet: usize,
        selector: String,
        args: Vec<Atom>,
    },
}

impl HostRequest {
    pub fn message(inlet: usize, selector: impl Into<String>, args: Vec<Atom>) -> Self {
        Self::Message {
            inlet,
            selector: selector.into(),
            args,
        }
    }

    /// Serialize to a single JSON line body (no trailing newline).
    ///
    /// serde_json escapes control characters inside strings, so the output never
    /// contains a raw `\n`. NaN and infinities have no JSON number form and are
    /// rejected rather than written as `null`.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let Self::Message { args, .. } = self;
        if let Some(index) = args
            .iter()
            .position(|a| matches!(a, Atom::Float(v) if !v.is_finite()))
        {
            return Err(ProtocolError::NonFiniteArg { index });
        }
        Ok(serde_json::to_string(self)?)
    }
}

/// Raw envelope as it appears on the child's stdout.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChildEnvelope {
    Ready,
    Outlet {
        outlet: usize,
        selector: String,
        #[serde(default)]
        args: Vec<Atom>,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Typed payload of an `outlet` envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum OutletMessage {
    Bang,
    Float(f64),
    Symbol(String),
    List(Vec<Atom>),
}

impl OutletMessage {
    pub fn selector(&self) -> &'static str {
        match self {
            Self::Bang => "bang",
            Self::Float(_) => "float",
            Self::Symbol(_) => "symbol",
            Self::List(_) => "list",
        }
    }

    fn from_parts(selector: String, mut args: Vec<Atom>) -> Result<Self, ProtocolError> {
        let invalid = |selector: String, reason: &str| ProtocolError::InvalidOutlet {
            selector,
            reason: reason.to_string(),
        };

        match selector.as_str() {
            "bang" => Ok(Self::Bang),
            "float" => match args.as_slice() {
                [Atom::Float(f)] => Ok(Self::Float(*f)),
                [_] => Err(invalid(selector, "argument is not a number")),
                _ => Err(invalid(selector, "expected exactly one argument")),
            },
            "symbol" => match args.pop() {
                Some(Atom::Symbol(s)) if args.is_empty() => Ok(Self::Symbol(s)),
                Some(Atom::Float(_)) if args.is_empty() => {
                    Err(invalid(selector, "argument is not a string"))
                }
                _ => Err(invalid(selector, "expected exactly one argument")),
            },
            "list" => Ok(Self::List(args)),
            _ => Err(invalid(selector, "unsupported selector")),
        }
    }
}

/// A validated event from the child.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Child finished initializing and accepts messages.
    Ready,
    Outlet {
        outlet: usize,
        message: OutletMessage,
    },
    Log {
        text: String,
    },
    Error {
        text: String,
    },
}

impl InboundEvent {
    /// Decode one frame (without its newline).
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: ChildEnvelope = serde_json::from_slice(frame)
            .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?;

        Ok(match envelope {
            ChildEnvelope::Ready => Self::Ready,
            ChildEnvelope::Outlet {
                outlet,
                selector,
                args,
            } => Self::Outlet {
                outlet,
                message: OutletMessage::from_parts(selector, args)?,
            },
            ChildEnvelope::Log { message } => Self::Log { text: message },
            ChildEnvelope::Error { message } => Self::Error { text: message },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("invalid `{selector}` outlet message: {reason}")]
    InvalidOutlet { selector: String, reason: String },

    #[error("frame exceeds {max} bytes")]
    FrameTooLong { max: usize },

    #[error("argument {index} is not a finite number")]
    NonFiniteArg { index: usize },

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Encode a host → child message body.
pub fn encode_outbound(
    inlet: usize,
    selector: &str,
    args: &[Atom],
) -> Result<String, ProtocolError> {
    HostRequest::message(inlet, selector, args.to_vec()).encode()
}

/// Decode a child → host frame.
pub fn decode_inbound(frame: &[u8]) -> Result<InboundEvent, ProtocolError> {
    InboundEvent::decode(frame)
}
