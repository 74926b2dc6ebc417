//! Command/response text grammar
//!
//! Requests are a verb followed by space-separated arguments:
//! `vset /object/<id>/location 0 0 100`. Path-like arguments are carried
//! verbatim. Replies start with a status token, `ok` or `error`, followed by
//! an optional payload. `key=value` tokens in the payload are exposed as
//! fields (`ok id=42`).
//!
//! When the wire profile tags requests, every payload is prefixed `<n>:` and
//! the engine echoes the tag in its reply.

use crate::framing::{Framing, LineFraming, UnrealCvFraming};
use placer_core::{ObjectId, PlacerError, Result, Rotator, TransformComponent, Vec3};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A single request to the engine. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: String,
    args: Vec<String>,
    raw: String,
}

impl Command {
    /// Build a command from a verb and its arguments
    pub fn new<I, S>(verb: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let verb = verb.into();
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let mut raw = verb.clone();
        for arg in &args {
            raw.push(' ');
            raw.push_str(arg);
        }
        Self { verb, args, raw }
    }

    /// Parse an operator-typed command line verbatim
    pub fn raw(line: &str) -> Result<Self> {
        let line = line.trim();
        let mut tokens = line.split_whitespace();
        let verb = tokens
            .next()
            .ok_or_else(|| PlacerError::Setup("empty command".into()))?;
        Ok(Self {
            verb: verb.to_string(),
            args: tokens.map(str::to_string).collect(),
            raw: line.to_string(),
        })
    }

    /// `vset /objects/spawn <class> x y z`
    pub fn spawn(class_path: &str, location: Vec3) -> Self {
        let mut args = vec!["/objects/spawn".to_string(), class_path.to_string()];
        args.extend(location.to_args());
        Self::new("vset", args)
    }

    /// `vset /object/<id>/location x y z`
    pub fn set_location(id: &str, location: Vec3) -> Self {
        Self::set_component(id, TransformComponent::Location, location.to_args())
    }

    /// `vset /object/<id>/rotation pitch yaw roll`
    pub fn set_rotation(id: &str, rotation: Rotator) -> Self {
        Self::set_component(id, TransformComponent::Rotation, rotation.to_args())
    }

    /// `vset /object/<id>/scale x y z`
    pub fn set_scale(id: &str, scale: Vec3) -> Self {
        Self::set_component(id, TransformComponent::Scale, scale.to_args())
    }

    /// `vget /object/<id>/location`
    pub fn get_location(id: &str) -> Self {
        Self::new("vget", [object_property(id, TransformComponent::Location)])
    }

    /// `vget /unrealcv/status`, a no-op used as a health check
    pub fn status() -> Self {
        Self::new("vget", ["/unrealcv/status"])
    }

    fn set_component(id: &str, component: TransformComponent, values: [String; 3]) -> Self {
        let mut args = vec![object_property(id, component)];
        args.extend(values);
        Self::new("vset", args)
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Encoded request text, without framing
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn object_property(id: &str, component: TransformComponent) -> String {
    format!("/object/{}/{}", id, component.as_str())
}

/// Leading status token of a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// A parsed reply. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub status: Status,
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, String>,
}

impl Response {
    /// Parse reply text. A missing or unknown status token is a protocol error.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (head, rest) = match text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (text, ""),
        };

        let status = match head.to_ascii_lowercase().as_str() {
            "ok" => Status::Ok,
            "error" => Status::Error,
            "" => return Err(PlacerError::Protocol("Empty reply".into())),
            other => {
                return Err(PlacerError::Protocol(format!(
                    "Reply missing status token (got '{}')",
                    preview(other)
                )));
            }
        };

        let fields = rest
            .split_whitespace()
            .filter_map(|token| token.split_once('='))
            .filter(|(k, _)| !k.is_empty())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Ok(Self {
            status,
            payload: (!rest.is_empty()).then(|| rest.to_string()),
            fields,
        })
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Object identifier carried by a spawn reply: the `id` field, or the
    /// first payload token when the engine replies with a bare name.
    pub fn object_id(&self) -> Option<ObjectId> {
        if let Some(id) = self.field("id") {
            return (!id.is_empty()).then(|| id.to_string());
        }
        self.payload
            .as_deref()
            .and_then(|p| p.split_whitespace().next())
            .filter(|token| !token.contains('='))
            .map(str::to_string)
    }

    /// Three floats from the payload, separated by spaces and/or commas
    pub fn vector(&self) -> Result<Vec3> {
        let payload = self
            .payload
            .as_deref()
            .ok_or_else(|| PlacerError::Protocol("Reply has no payload".into()))?;
        let values: Vec<f64> = payload
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(|t| {
                t.parse::<f64>()
                    .map_err(|_| PlacerError::Protocol(format!("'{}' is not a number", t)))
            })
            .collect::<Result<_>>()?;

        match values.as_slice() {
            [x, y, z] => Ok(Vec3::new(*x, *y, *z)),
            _ => Err(PlacerError::Protocol(format!(
                "Expected three values, got {}",
                values.len()
            ))),
        }
    }

    /// Human-readable message of an error reply
    pub fn message(&self) -> &str {
        self.payload.as_deref().unwrap_or("")
    }
}

fn preview(s: &str) -> String {
    s.chars().take(40).collect()
}

/// Framing and tagging convention used on the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireProfile {
    /// UnrealCV: magic + length framing, `<n>:` request tags
    #[default]
    UnrealCv,
    /// Newline framing, untagged
    Line,
}

impl WireProfile {
    pub fn framing(self) -> Arc<dyn Framing> {
        match self {
            WireProfile::UnrealCv => Arc::new(UnrealCvFraming),
            WireProfile::Line => Arc::new(LineFraming),
        }
    }

    pub fn tags_requests(self) -> bool {
        matches!(self, WireProfile::UnrealCv)
    }

    /// The server announces itself with one frame right after accept
    pub fn greets_on_connect(self) -> bool {
        matches!(self, WireProfile::UnrealCv)
    }
}

impl FromStr for WireProfile {
    type Err = PlacerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "unrealcv" => Ok(WireProfile::UnrealCv),
            "line" => Ok(WireProfile::Line),
            other => Err(PlacerError::Setup(format!(
                "unknown wire profile '{}' (expected unrealcv or line)",
                other
            ))),
        }
    }
}

impl fmt::Display for WireProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireProfile::UnrealCv => f.write_str("unrealcv"),
            WireProfile::Line => f.write_str("line"),
        }
    }
}

/// Outcome of decoding one frame against the request in flight
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// The reply to the current request
    Reply(Response),
    /// A reply to an earlier, abandoned request
    Stale { tag: u32 },
}

/// Encodes commands into frame payloads and decodes payloads into replies
#[derive(Debug)]
pub struct Codec {
    tagged: bool,
    next_tag: u32,
}

impl Codec {
    pub fn new(profile: WireProfile) -> Self {
        Self {
            tagged: profile.tags_requests(),
            next_tag: 0,
        }
    }

    /// Encode a command; returns the tag the reply must carry, if any
    pub fn encode(&mut self, command: &Command) -> (Option<u32>, Vec<u8>) {
        if !self.tagged {
            return (None, command.as_str().as_bytes().to_vec());
        }
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);
        (Some(tag), format!("{}:{}", tag, command).into_bytes())
    }

    /// Decode a frame payload for the request tagged `expected`
    pub fn decode(&self, expected: Option<u32>, payload: &[u8]) -> Result<Decoded> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| PlacerError::Protocol("Reply is not valid UTF-8".into()))?;

        let Some(expected) = expected else {
            return Response::parse(text).map(Decoded::Reply);
        };

        let (tag, body) = text
            .split_once(':')
            .and_then(|(tag, body)| tag.trim().parse::<u32>().ok().map(|t| (t, body)))
            .ok_or_else(|| {
                PlacerError::Protocol(format!("Reply missing request tag: '{}'", preview(text)))
            })?;

        if tag != expected {
            return Ok(Decoded::Stale { tag });
        }
        Response::parse(body).map(Decoded::Reply)
    }
}
