//! Client-side registry of spawned objects
//!
//! An object enters the registry only after the engine acknowledged its spawn
//! with an identifier. Each transform component is then set with its own
//! command and confirmed independently, so an object may legitimately be
//! registered with some components unconfirmed.

use placer_bridge::{Command, Dispatcher};
use placer_core::blueprint;
use placer_core::{
    ObjectId, PlacerError, Result, SpawnedObject, Transform, TransformComponent, TransformUpdate,
};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

/// A transform component the engine did not acknowledge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentFailure {
    pub component: TransformComponent,
    pub reason: String,
    /// The failure was a lost connection rather than an engine rejection
    pub connection_lost: bool,
}

/// Whether every requested component was confirmed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum PlacementOutcome {
    Complete,
    Partial { failures: Vec<ComponentFailure> },
}

/// Result of a spawn or transform update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placement {
    pub object: SpawnedObject,
    #[serde(flatten)]
    pub outcome: PlacementOutcome,
}

impl Placement {
    pub fn is_complete(&self) -> bool {
        self.outcome == PlacementOutcome::Complete
    }

    pub fn is_partial(&self) -> bool {
        !self.is_complete()
    }

    pub fn failures(&self) -> &[ComponentFailure] {
        match &self.outcome {
            PlacementOutcome::Complete => &[],
            PlacementOutcome::Partial { failures } => failures,
        }
    }

    pub fn connection_lost(&self) -> bool {
        self.failures().iter().any(|f| f.connection_lost)
    }
}

/// Registry of objects spawned during a session
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    objects: HashMap<ObjectId, SpawnedObject>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a blueprint, register it, then set each transform component.
    ///
    /// Fails `Spawn` (registering nothing) when the engine rejects the spawn
    /// or its reply carries no identifier. Follow-up failures yield a
    /// `Partial` placement with the object still registered.
    pub async fn spawn(
        &mut self,
        dispatcher: &Dispatcher,
        blueprint_path: &str,
        transform: Transform,
    ) -> Result<Placement> {
        let class_path = blueprint::class_path(blueprint_path);
        info!("Spawning blueprint: {}", class_path);

        let response = dispatcher
            .send(&Command::spawn(&class_path, transform.location))
            .await?;
        if !response.is_ok() {
            return Err(PlacerError::Spawn(format!(
                "engine rejected spawn of {}: {}",
                class_path,
                response.message()
            )));
        }
        let id = response.object_id().ok_or_else(|| {
            PlacerError::Spawn(format!(
                "spawn of {} returned no identifier: '{}'",
                class_path,
                response.message()
            ))
        })?;

        info!("Object spawned with ID: {}", id);
        let fresh = SpawnedObject::new(id.clone(), class_path, transform);
        if self.objects.contains_key(&id) {
            warn!("Engine reused identifier {}; replacing registry entry", id);
        }
        let object = self.objects.entry(id).insert_entry(fresh).into_mut();

        let failures = apply_components(dispatcher, object, &TransformComponent::ALL).await;
        Ok(placement(object, failures))
    }

    /// Re-issue the set-commands for the components present in `update`
    pub async fn update(
        &mut self,
        dispatcher: &Dispatcher,
        id: &str,
        update: &TransformUpdate,
    ) -> Result<Placement> {
        let object = self
            .objects
            .get_mut(id)
            .ok_or_else(|| PlacerError::Update(format!("unknown object '{}'", id)))?;
        if !dispatcher.is_connected().await {
            return Err(PlacerError::Update(format!(
                "cannot update '{}': connection unavailable",
                id
            )));
        }

        object.request(update);
        let components = update.components();
        let failures = apply_components(dispatcher, object, &components).await;
        settle_update(object, &components, failures)
    }

    /// Re-issue set-commands for the components not yet confirmed
    pub async fn retry_unconfirmed(&mut self, dispatcher: &Dispatcher, id: &str) -> Result<Placement> {
        let object = self
            .objects
            .get_mut(id)
            .ok_or_else(|| PlacerError::Update(format!("unknown object '{}'", id)))?;
        if !dispatcher.is_connected().await {
            return Err(PlacerError::Update(format!(
                "cannot retry '{}': connection unavailable",
                id
            )));
        }

        let components = object.unconfirmed();
        if components.is_empty() {
            return Ok(placement(object, Vec::new()));
        }
        info!("Retrying {:?} for {}", components, id);
        let failures = apply_components(dispatcher, object, &components).await;
        settle_update(object, &components, failures)
    }

    /// Flag every object as unverified against the engine
    pub fn mark_stale(&mut self) {
        for object in self.objects.values_mut() {
            object.stale = true;
        }
    }

    /// Query each stale object's location. Objects the engine still knows are
    /// refreshed and un-flagged; the ids that remain stale are returned.
    pub async fn reverify(&mut self, dispatcher: &Dispatcher) -> Result<Vec<ObjectId>> {
        let mut still_stale = Vec::new();
        for object in self.objects.values_mut().filter(|o| o.stale) {
            let response = dispatcher.send(&Command::get_location(&object.id)).await;
            match response.and_then(|r| {
                if r.is_ok() {
                    r.vector()
                } else {
                    Err(PlacerError::Update(r.message().to_string()))
                }
            }) {
                Ok(location) => {
                    object.transform.location = location;
                    object.stale = false;
                }
                Err(e) if e.is_connection_loss() => return Err(e),
                Err(e) => {
                    warn!("Could not re-verify {}: {}", object.id, e);
                    still_stale.push(object.id.clone());
                }
            }
        }
        still_stale.sort();
        Ok(still_stale)
    }

    pub fn get(&self, id: &str) -> Option<&SpawnedObject> {
        self.objects.get(id)
    }

    /// All objects, ordered by identifier
    pub fn list(&self) -> Vec<&SpawnedObject> {
        let mut objects: Vec<_> = self.objects.values().collect();
        objects.sort_by(|a, b| a.id.cmp(&b.id));
        objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

fn set_command(object: &SpawnedObject, component: TransformComponent) -> Command {
    match component {
        TransformComponent::Location => Command::set_location(&object.id, object.target.location),
        TransformComponent::Rotation => Command::set_rotation(&object.id, object.target.rotation),
        TransformComponent::Scale => Command::set_scale(&object.id, object.target.scale),
    }
}

/// Issue one set-command per component, in order. After a lost connection
/// the remaining components are reported failed without being sent.
async fn apply_components(
    dispatcher: &Dispatcher,
    object: &mut SpawnedObject,
    components: &[TransformComponent],
) -> Vec<ComponentFailure> {
    let mut failures = Vec::new();
    let mut lost: Option<String> = None;

    for &component in components {
        if let Some(reason) = &lost {
            failures.push(ComponentFailure {
                component,
                reason: reason.clone(),
                connection_lost: true,
            });
            continue;
        }

        match dispatcher.send(&set_command(object, component)).await {
            Ok(response) if response.is_ok() => object.confirm(component),
            Ok(response) => {
                warn!(
                    "Engine rejected {} for {}: {}",
                    component,
                    object.id,
                    response.message()
                );
                failures.push(ComponentFailure {
                    component,
                    reason: response.message().to_string(),
                    connection_lost: false,
                });
            }
            Err(e) => {
                warn!("Setting {} for {} failed: {}", component, object.id, e);
                let connection_lost = e.is_connection_loss();
                if connection_lost {
                    lost = Some(e.to_string());
                }
                failures.push(ComponentFailure {
                    component,
                    reason: e.to_string(),
                    connection_lost,
                });
            }
        }
    }
    failures
}

fn placement(object: &SpawnedObject, failures: Vec<ComponentFailure>) -> Placement {
    let outcome = if failures.is_empty() {
        PlacementOutcome::Complete
    } else {
        PlacementOutcome::Partial { failures }
    };
    Placement {
        object: object.clone(),
        outcome,
    }
}

/// An update where nothing was confirmed is an error, not a partial placement
fn settle_update(
    object: &SpawnedObject,
    components: &[TransformComponent],
    failures: Vec<ComponentFailure>,
) -> Result<Placement> {
    if components.is_empty() || failures.len() < components.len() {
        return Ok(placement(object, failures));
    }

    let reasons = failures
        .iter()
        .map(|f| format!("{}: {}", f.component, f.reason))
        .collect::<Vec<_>>()
        .join("; ");
    if failures.iter().any(|f| f.connection_lost) {
        Err(PlacerError::Connection(format!(
            "update of '{}' interrupted ({})",
            object.id, reasons
        )))
    } else {
        Err(PlacerError::Update(format!(
            "engine rejected update of '{}' ({})",
            object.id, reasons
        )))
    }
}
