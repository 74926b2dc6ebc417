//! Operator requests and their replies
//!
//! One request per input line:
//!
//! ```text
//! move <id> X,Y,Z
//! rotate <id> P,Y,R
//! scale <id> X,Y,Z
//! retry <id>
//! list
//! verify
//! quit | exit
//! vget ... | vset ... | vrun ...   (sent verbatim)
//! ```

use crate::registry::Placement;
use placer_bridge::{Command, Response};
use placer_core::{ObjectId, PlacerError, Result, Rotator, SpawnedObject, Transform, Vec3};
use serde::Serialize;
use std::str::FromStr;

/// Verbs passed through to the engine untouched
const RAW_VERBS: [&str; 3] = ["vget", "vset", "vrun"];

/// A request submitted to the session loop
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    Move { id: ObjectId, location: Vec3 },
    Rotate { id: ObjectId, rotation: Rotator },
    Scale { id: ObjectId, scale: Vec3 },
    /// Re-issue the unconfirmed components of an object
    Retry { id: ObjectId },
    /// Spawn a blueprint
    Place { blueprint: String, transform: Transform },
    /// Operator-typed protocol command
    Raw(Command),
    List,
    /// Re-check stale objects against the engine
    Verify,
    Quit,
}

impl ControlRequest {
    /// Whether the request mutates or queries the engine
    pub fn needs_connection(&self) -> bool {
        !matches!(self, ControlRequest::List | ControlRequest::Quit)
    }
}

impl FromStr for ControlRequest {
    type Err = PlacerError;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let lowered = verb.to_ascii_lowercase();
        if RAW_VERBS.contains(&lowered.as_str()) {
            let normalized = format!("{}{}", lowered, &line[verb.len()..]);
            return Command::raw(&normalized).map(ControlRequest::Raw);
        }

        match lowered.as_str() {
            "" => Err(PlacerError::Setup("empty request".into())),
            "list" => no_args(verb, rest, ControlRequest::List),
            "verify" => no_args(verb, rest, ControlRequest::Verify),
            "quit" | "exit" => no_args(verb, rest, ControlRequest::Quit),
            "retry" => {
                let id = single_id(verb, rest)?;
                Ok(ControlRequest::Retry { id })
            }
            "move" => {
                let (id, triple) = id_and_triple(verb, rest)?;
                Ok(ControlRequest::Move {
                    id,
                    location: triple.parse()?,
                })
            }
            "rotate" => {
                let (id, triple) = id_and_triple(verb, rest)?;
                Ok(ControlRequest::Rotate {
                    id,
                    rotation: triple.parse()?,
                })
            }
            "scale" => {
                let (id, triple) = id_and_triple(verb, rest)?;
                Ok(ControlRequest::Scale {
                    id,
                    scale: triple.parse()?,
                })
            }
            other => Err(PlacerError::Setup(format!(
                "unknown request '{}' (expected move, rotate, scale, retry, list, verify, quit or a vget/vset/vrun command)",
                other
            ))),
        }
    }
}

fn no_args(verb: &str, rest: &str, request: ControlRequest) -> Result<ControlRequest> {
    if rest.is_empty() {
        Ok(request)
    } else {
        Err(PlacerError::Setup(format!("'{}' takes no arguments", verb)))
    }
}

fn single_id(verb: &str, rest: &str) -> Result<ObjectId> {
    match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
        [id] => Ok(id.to_string()),
        _ => Err(PlacerError::Setup(format!("usage: {} <id>", verb))),
    }
}

/// Split `<id> X,Y,Z`; the triple may contain spaces after the commas
fn id_and_triple<'a>(verb: &str, rest: &'a str) -> Result<(ObjectId, &'a str)> {
    match rest.split_once(char::is_whitespace) {
        Some((id, triple)) if !triple.trim().is_empty() => Ok((id.to_string(), triple.trim())),
        _ => Err(PlacerError::Setup(format!("usage: {} <id> X,Y,Z", verb))),
    }
}

/// What the session loop sends back for a request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ControlReply {
    Placement(Placement),
    Raw(Response),
    Objects { objects: Vec<SpawnedObject> },
    /// Identifiers that could not be re-verified
    Verified { stale: Vec<ObjectId> },
    Terminated,
}
