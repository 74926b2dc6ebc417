//! Transform types: location, rotation and scale of a placed object

use crate::error::{PlacerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 3-component vector used for location and scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Wire arguments in engine order
    pub fn to_args(self) -> [String; 3] {
        [self.x.to_string(), self.y.to_string(), self.z.to_string()]
    }
}

impl From<[f64; 3]> for Vec3 {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

impl FromStr for Vec3 {
    type Err = PlacerError;

    fn from_str(s: &str) -> Result<Self> {
        parse_triple(s).map(Vec3::from)
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// Rotation in degrees, engine order (pitch, yaw, roll)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rotator {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

impl Rotator {
    pub const fn new(pitch: f64, yaw: f64, roll: f64) -> Self {
        Self { pitch, yaw, roll }
    }

    /// Wire arguments in engine order
    pub fn to_args(self) -> [String; 3] {
        [
            self.pitch.to_string(),
            self.yaw.to_string(),
            self.roll.to_string(),
        ]
    }
}

impl From<[f64; 3]> for Rotator {
    fn from([pitch, yaw, roll]: [f64; 3]) -> Self {
        Self { pitch, yaw, roll }
    }
}

impl FromStr for Rotator {
    type Err = PlacerError;

    fn from_str(s: &str) -> Result<Self> {
        parse_triple(s).map(Rotator::from)
    }
}

impl fmt::Display for Rotator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.pitch, self.yaw, self.roll)
    }
}

/// Full transform of a placed object
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub location: Vec3,
    pub rotation: Rotator,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            location: Vec3::new(0.0, 0.0, 100.0),
            rotation: Rotator::new(0.0, 0.0, 0.0),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Build a transform from the three operator-facing coordinate strings
    pub fn parse(location: &str, rotation: &str, scale: &str) -> Result<Self> {
        Ok(Self {
            location: location.parse()?,
            rotation: rotation.parse()?,
            scale: scale.parse()?,
        })
    }
}

/// One independently-settable part of a transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformComponent {
    Location,
    Rotation,
    Scale,
}

impl TransformComponent {
    /// All components, in the order follow-up commands are issued
    pub const ALL: [TransformComponent; 3] = [
        TransformComponent::Location,
        TransformComponent::Rotation,
        TransformComponent::Scale,
    ];

    /// Property name used in the engine's object paths
    pub fn as_str(self) -> &'static str {
        match self {
            TransformComponent::Location => "location",
            TransformComponent::Rotation => "rotation",
            TransformComponent::Scale => "scale",
        }
    }
}

impl fmt::Display for TransformComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse an `a,b,c` coordinate string into three finite floats
pub fn parse_triple(s: &str) -> Result<[f64; 3]> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(PlacerError::Setup(format!(
            "expected three comma-separated values, got '{}'",
            s
        )));
    }

    let mut out = [0.0; 3];
    for (slot, part) in out.iter_mut().zip(&parts) {
        let value: f64 = part
            .parse()
            .map_err(|_| PlacerError::Setup(format!("'{}' is not a number in '{}'", part, s)))?;
        if !value.is_finite() {
            return Err(PlacerError::Setup(format!(
                "'{}' is not a finite number in '{}'",
                part, s
            )));
        }
        *slot = value;
    }
    Ok(out)
}
