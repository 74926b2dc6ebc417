//! Objects spawned into the running engine and their confirmation state

use crate::transform::{Rotator, Transform, TransformComponent, Vec3};
use serde::{Deserialize, Serialize};

/// Engine-assigned identifier of a spawned object
pub type ObjectId = String;

/// Which transform components the engine has acknowledged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub location: bool,
    pub rotation: bool,
    pub scale: bool,
}

impl Confirmation {
    pub fn get(&self, component: TransformComponent) -> bool {
        match component {
            TransformComponent::Location => self.location,
            TransformComponent::Rotation => self.rotation,
            TransformComponent::Scale => self.scale,
        }
    }

    pub fn set(&mut self, component: TransformComponent, confirmed: bool) {
        match component {
            TransformComponent::Location => self.location = confirmed,
            TransformComponent::Rotation => self.rotation = confirmed,
            TransformComponent::Scale => self.scale = confirmed,
        }
    }

    pub fn all(&self) -> bool {
        self.location && self.rotation && self.scale
    }
}

/// An object spawned through the protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnedObject {
    /// Identifier returned by the spawn reply
    pub id: ObjectId,
    /// Blueprint class path the object was spawned from
    pub blueprint: String,
    /// Last values the engine acknowledged
    pub transform: Transform,
    /// Values most recently requested by the operator
    pub target: Transform,
    /// Per-component acknowledgement
    pub confirmed: Confirmation,
    /// Set after a reconnect until the object is re-verified
    #[serde(default)]
    pub stale: bool,
}

impl SpawnedObject {
    /// A freshly spawned object; nothing is confirmed yet.
    ///
    /// The spawn command carries the location, so that is the last known
    /// value; rotation and scale start at the engine's actor defaults.
    pub fn new(id: impl Into<ObjectId>, blueprint: impl Into<String>, target: Transform) -> Self {
        Self {
            id: id.into(),
            blueprint: blueprint.into(),
            transform: Transform {
                location: target.location,
                rotation: Rotator::new(0.0, 0.0, 0.0),
                scale: Vec3::new(1.0, 1.0, 1.0),
            },
            target,
            confirmed: Confirmation::default(),
            stale: false,
        }
    }

    /// Components still waiting for an Ok from the engine
    pub fn unconfirmed(&self) -> Vec<TransformComponent> {
        TransformComponent::ALL
            .into_iter()
            .filter(|c| !self.confirmed.get(*c))
            .collect()
    }

    pub fn is_fully_confirmed(&self) -> bool {
        self.confirmed.all()
    }

    /// Record a new requested value for a component and clear its confirmation
    pub fn request(&mut self, update: &TransformUpdate) {
        if let Some(location) = update.location {
            self.target.location = location;
            self.confirmed.location = false;
        }
        if let Some(rotation) = update.rotation {
            self.target.rotation = rotation;
            self.confirmed.rotation = false;
        }
        if let Some(scale) = update.scale {
            self.target.scale = scale;
            self.confirmed.scale = false;
        }
    }

    /// Mark a component acknowledged, promoting the requested value
    pub fn confirm(&mut self, component: TransformComponent) {
        match component {
            TransformComponent::Location => self.transform.location = self.target.location,
            TransformComponent::Rotation => self.transform.rotation = self.target.rotation,
            TransformComponent::Scale => self.transform.scale = self.target.scale,
        }
        self.confirmed.set(component, true);
    }
}

/// A partial transform change; absent components are left untouched
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformUpdate {
    pub location: Option<Vec3>,
    pub rotation: Option<Rotator>,
    pub scale: Option<Vec3>,
}

impl TransformUpdate {
    pub fn location(location: Vec3) -> Self {
        Self {
            location: Some(location),
            ..Default::default()
        }
    }

    pub fn rotation(rotation: Rotator) -> Self {
        Self {
            rotation: Some(rotation),
            ..Default::default()
        }
    }

    pub fn scale(scale: Vec3) -> Self {
        Self {
            scale: Some(scale),
            ..Default::default()
        }
    }

    /// Components carried by this update, in issue order
    pub fn components(&self) -> Vec<TransformComponent> {
        let mut out = Vec::new();
        if self.location.is_some() {
            out.push(TransformComponent::Location);
        }
        if self.rotation.is_some() {
            out.push(TransformComponent::Rotation);
        }
        if self.scale.is_some() {
            out.push(TransformComponent::Scale);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.location.is_none() && self.rotation.is_none() && self.scale.is_none()
    }
}

impl From<Transform> for TransformUpdate {
    fn from(t: Transform) -> Self {
        Self {
            location: Some(t.location),
            rotation: Some(t.rotation),
            scale: Some(t.scale),
        }
    }
}
