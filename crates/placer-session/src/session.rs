//! Session controller
//!
//! Owns the dispatcher and the object registry and drives the lifecycle:
//!
//! ```text
//! Idle -> Connected -> ObjectPlaced -> InteractiveControl -> Terminated
//!           \______________\_______________/
//!                          |  connection lost
//!                    Disconnected -> Reconnecting -> (prior state | Terminated)
//! ```
//!
//! Requests reach the session through an mpsc queue; the single consumer
//! loop applies them in order, so registry mutations never race.

use crate::control::{ControlReply, ControlRequest};
use crate::registry::{ObjectRegistry, Placement};
use placer_bridge::{BridgeConfig, Dispatcher};
use placer_core::{PlacerError, Result, SpawnedObject, Transform, TransformUpdate};
use serde::Serialize;
use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connected,
    ObjectPlaced,
    InteractiveControl,
    Disconnected,
    Reconnecting,
    Terminated,
}

impl SessionState {
    /// States in which the wire is expected to be usable
    fn is_live(self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::ObjectPlaced | SessionState::InteractiveControl
        )
    }
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Full connect rounds attempted after a lost connection
    pub reconnect_rounds: u32,
    /// Capacity of the request queue
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_rounds: 3,
            queue_capacity: 32,
        }
    }
}

/// A queued request and where to send its outcome
pub type Envelope = (ControlRequest, oneshot::Sender<Result<ControlReply>>);

/// Producer side of the session queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Envelope>,
}

impl SessionHandle {
    /// Queue a request and wait for the session to apply it
    pub async fn submit(&self, request: ControlRequest) -> Result<ControlReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .await
            .map_err(|_| PlacerError::InvalidState("session has terminated".into()))?;
        reply_rx
            .await
            .map_err(|_| PlacerError::InvalidState("session dropped the request".into()))?
    }
}

/// Create a request queue for [`Session::run`]
pub fn request_queue(capacity: usize) -> (SessionHandle, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (SessionHandle { tx }, rx)
}

/// Summary produced when a session ends
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub state: SessionState,
    pub objects: Vec<SpawnedObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// One placement session against one engine
pub struct Session {
    dispatcher: Dispatcher,
    registry: ObjectRegistry,
    config: SessionConfig,
    state: SessionState,
    last_error: Option<String>,
    fatal: Option<PlacerError>,
}

impl Session {
    pub fn new(bridge: BridgeConfig, config: SessionConfig) -> Self {
        Self::with_dispatcher(Dispatcher::new(bridge), config)
    }

    pub fn with_dispatcher(dispatcher: Dispatcher, config: SessionConfig) -> Self {
        Self {
            dispatcher,
            registry: ObjectRegistry::new(),
            config,
            state: SessionState::Idle,
            last_error: None,
            fatal: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Idle -> Connected. A failed connect terminates the session.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(PlacerError::InvalidState(format!(
                "connect from {:?}",
                self.state
            )));
        }
        match self.dispatcher.connect().await {
            Ok(()) => {
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.state = SessionState::Terminated;
                Err(e)
            }
        }
    }

    /// Spawn a blueprint. The first placement moves Connected -> ObjectPlaced,
    /// including a partial one.
    pub async fn place(&mut self, blueprint: &str, transform: Transform) -> Result<Placement> {
        let result = self.spawn(blueprint, transform).await;
        self.after_command(result).await
    }

    /// ObjectPlaced -> InteractiveControl
    pub fn enter_interactive(&mut self) -> Result<()> {
        match self.state {
            SessionState::ObjectPlaced => {
                self.state = SessionState::InteractiveControl;
                info!("Entering interactive control");
                Ok(())
            }
            SessionState::InteractiveControl => Ok(()),
            other => Err(PlacerError::InvalidState(format!(
                "interactive control from {:?}",
                other
            ))),
        }
    }

    /// Apply one operator request
    pub async fn apply(&mut self, request: ControlRequest) -> Result<ControlReply> {
        if self.state == SessionState::Terminated {
            return Err(PlacerError::InvalidState("session has terminated".into()));
        }
        if request.needs_connection() && !self.state.is_live() {
            return Err(PlacerError::InvalidState(format!(
                "cannot handle request while {:?}",
                self.state
            )));
        }

        debug!("Applying {:?}", request);
        let result = self.dispatch(request).await;
        self.after_command(result).await
    }

    async fn dispatch(&mut self, request: ControlRequest) -> Result<ControlReply> {
        match request {
            ControlRequest::Move { id, location } => self
                .registry
                .update(&self.dispatcher, &id, &TransformUpdate::location(location))
                .await
                .map(ControlReply::Placement),
            ControlRequest::Rotate { id, rotation } => self
                .registry
                .update(&self.dispatcher, &id, &TransformUpdate::rotation(rotation))
                .await
                .map(ControlReply::Placement),
            ControlRequest::Scale { id, scale } => self
                .registry
                .update(&self.dispatcher, &id, &TransformUpdate::scale(scale))
                .await
                .map(ControlReply::Placement),
            ControlRequest::Retry { id } => self
                .registry
                .retry_unconfirmed(&self.dispatcher, &id)
                .await
                .map(ControlReply::Placement),
            ControlRequest::Place {
                blueprint,
                transform,
            } => self
                .spawn(&blueprint, transform)
                .await
                .map(ControlReply::Placement),
            ControlRequest::Raw(command) => self
                .dispatcher
                .send(&command)
                .await
                .map(ControlReply::Raw),
            ControlRequest::List => Ok(ControlReply::Objects {
                objects: self.registry.list().into_iter().cloned().collect(),
            }),
            ControlRequest::Verify => self
                .registry
                .reverify(&self.dispatcher)
                .await
                .map(|stale| ControlReply::Verified { stale }),
            ControlRequest::Quit => {
                self.terminate().await;
                Ok(ControlReply::Terminated)
            }
        }
    }

    async fn spawn(&mut self, blueprint: &str, transform: Transform) -> Result<Placement> {
        if !self.state.is_live() {
            return Err(PlacerError::InvalidState(format!(
                "place from {:?}",
                self.state
            )));
        }
        let placement = self
            .registry
            .spawn(&self.dispatcher, blueprint, transform)
            .await?;
        if self.state == SessionState::Connected {
            self.state = SessionState::ObjectPlaced;
        }
        Ok(placement)
    }

    /// Record failures and recover a lost connection. A failed recovery
    /// replaces the command's own result with the fatal error.
    async fn after_command<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }
        if self.state.is_live() && !self.dispatcher.is_connected().await {
            self.recover().await?;
        }
        result
    }

    /// Disconnected -> Reconnecting rounds -> prior state, or Terminated
    async fn recover(&mut self) -> Result<()> {
        let resume = self.state;
        self.state = SessionState::Disconnected;
        warn!("Connection to engine lost while {:?}", resume);

        let rounds = self.config.reconnect_rounds;
        for round in 1..=rounds {
            self.state = SessionState::Reconnecting;
            info!("Reconnecting to engine, round {}/{}", round, rounds);

            if let Err(e) = self.dispatcher.connect().await {
                warn!("Reconnect round {} failed: {}", round, e);
                continue;
            }
            if !self.dispatcher.is_healthy().await {
                warn!("Reconnect round {}: engine not responding to status", round);
                self.dispatcher.disconnect().await;
                continue;
            }

            self.registry.mark_stale();
            match self.registry.reverify(&self.dispatcher).await {
                Ok(stale) => {
                    if !stale.is_empty() {
                        warn!("Objects not re-verified after reconnect: {:?}", stale);
                    }
                    self.state = resume;
                    info!("Reconnected; resuming {:?}", resume);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Re-verification interrupted: {}", e);
                    self.dispatcher.disconnect().await;
                }
            }
        }

        let message = format!("engine unreachable after {} reconnect rounds", rounds);
        self.last_error = Some(message.clone());
        self.terminate().await;
        self.fatal = Some(PlacerError::Connection(message.clone()));
        Err(PlacerError::Connection(message))
    }

    /// Close the connection and end the session. Idempotent.
    pub async fn terminate(&mut self) {
        if self.state == SessionState::Terminated {
            return;
        }
        self.dispatcher.disconnect().await;
        self.state = SessionState::Terminated;
        info!("Session terminated");
    }

    /// Consume queued requests until `Quit`, end of input or a fatal
    /// connection loss. Returns the fatal error in the last case.
    pub async fn run(&mut self, requests: mpsc::Receiver<Envelope>) -> Result<()> {
        self.run_until(requests, std::future::pending()).await
    }

    /// Like [`Session::run`], but also ends as soon as `shutdown` resolves,
    /// abandoning any request that is still waiting on the engine.
    pub async fn run_until<F>(
        &mut self,
        requests: mpsc::Receiver<Envelope>,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let finished = tokio::select! {
            outcome = self.serve(requests) => Some(outcome),
            () = shutdown => None,
        };
        match finished {
            Some(outcome) => outcome,
            None => {
                info!("Shutdown requested, abandoning pending requests");
                self.terminate().await;
                Ok(())
            }
        }
    }

    async fn serve(&mut self, mut requests: mpsc::Receiver<Envelope>) -> Result<()> {
        while let Some((request, reply)) = requests.recv().await {
            let result = self.apply(request).await;
            if reply.send(result).is_err() {
                debug!("Requester went away before its reply");
            }
            if self.state == SessionState::Terminated {
                requests.close();
                break;
            }
        }

        self.terminate().await;
        match self.fatal.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            state: self.state,
            objects: self.registry.list().into_iter().cloned().collect(),
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEngine, Reply};
    use placer_core::Vec3;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn session_for(engine: &FakeEngine) -> Session {
        Session::new(engine.config(), SessionConfig::default())
    }

    async fn placed(engine: &FakeEngine) -> Session {
        let mut session = session_for(engine);
        session.connect().await.unwrap();
        session
            .place("/Game/Meshes/MeshBP", Transform::default())
            .await
            .unwrap();
        session.enter_interactive().unwrap();
        session
    }

    #[tokio::test]
    async fn test_lifecycle_to_interactive() {
        let engine = FakeEngine::accepting("42").await;
        let mut session = session_for(&engine);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.enter_interactive().is_err());

        session.connect().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);

        let placement = session
            .place("/Game/Meshes/MeshBP", Transform::default())
            .await
            .unwrap();
        assert!(placement.is_complete());
        assert_eq!(session.state(), SessionState::ObjectPlaced);

        session.enter_interactive().unwrap();
        assert_eq!(session.state(), SessionState::InteractiveControl);

        let reply = session
            .apply("move 42 1,2,3".parse().unwrap())
            .await
            .unwrap();
        match reply {
            ControlReply::Placement(p) => assert_eq!(p.object.transform.location, Vec3::new(1.0, 2.0, 3.0)),
            other => panic!("expected placement, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_failure_terminates() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let config = BridgeConfig {
            max_attempts: 2,
            initial_backoff: std::time::Duration::from_millis(10),
            wire: placer_bridge::WireProfile::Line,
            ..BridgeConfig::with_address("127.0.0.1", port)
        };

        let mut session = Session::new(config, SessionConfig::default());
        assert!(matches!(
            session.connect().await,
            Err(PlacerError::Connection(_))
        ));
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn test_partial_placement_still_advances() {
        let engine = FakeEngine::start(|line| {
            if line.starts_with("vset /objects/spawn") {
                Reply::Send("ok id=7".into())
            } else if line.contains("/scale") {
                Reply::Send("error scale locked".into())
            } else {
                Reply::Send("ok".into())
            }
        })
        .await;
        let mut session = session_for(&engine);
        session.connect().await.unwrap();

        let placement = session
            .place("/Game/Meshes/MeshBP", Transform::default())
            .await
            .unwrap();
        assert!(placement.is_partial());
        assert_eq!(session.state(), SessionState::ObjectPlaced);
        assert_eq!(session.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_socket_closed_mid_command_exhausts_reconnects() {
        let engine = FakeEngine::start(|line| {
            if line.starts_with("vset /objects/spawn") {
                Reply::Send("ok id=42".into())
            } else if line == "vset /object/42/location 5 5 5" {
                Reply::Die
            } else {
                Reply::Send("ok".into())
            }
        })
        .await;
        let mut session = placed(&engine).await;

        let (handle, rx) = request_queue(4);
        let runner = tokio::spawn(async move {
            let outcome = session.run(rx).await;
            (session, outcome)
        });

        let reply = handle.submit("move 42 5,5,5".parse().unwrap()).await;
        match reply {
            Err(PlacerError::Connection(msg)) => assert!(msg.contains("3 reconnect rounds")),
            other => panic!("expected fatal connection error, got {:?}", other),
        }

        let (session, outcome) = runner.await.unwrap();
        assert!(matches!(outcome, Err(PlacerError::Connection(_))));
        assert_eq!(session.state(), SessionState::Terminated);
        // Initial connection plus one per reconnect round
        assert_eq!(engine.accepts(), 4);
        // Later requests are refused
        assert!(handle.submit(ControlRequest::List).await.is_err());

        let report = session.report();
        assert_eq!(report.state, SessionState::Terminated);
        assert_eq!(report.objects.len(), 1);
        assert!(report.last_error.unwrap().contains("unreachable"));
    }

    #[tokio::test]
    async fn test_reconnect_resumes_and_reverifies() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = dropped.clone();
        let engine = FakeEngine::start(move |line| {
            if line.starts_with("vset /objects/spawn") {
                Reply::Send("ok id=42".into())
            } else if line == "vset /object/42/location 5 5 5" && !flag.swap(true, Ordering::SeqCst) {
                Reply::Close
            } else if line == "vget /object/42/location" {
                Reply::Send("ok 0 0 100".into())
            } else {
                Reply::Send("ok".into())
            }
        })
        .await;
        let mut session = placed(&engine).await;

        let first = session.apply("move 42 5,5,5".parse().unwrap()).await;
        assert!(matches!(first, Err(PlacerError::Connection(_))));
        assert_eq!(session.state(), SessionState::InteractiveControl);
        assert_eq!(engine.accepts(), 2);

        let object = session.registry().get("42").unwrap();
        assert!(!object.stale);
        assert!(!object.confirmed.location);
        assert!(
            engine
                .requests()
                .contains(&"vget /object/42/location".to_string())
        );

        // The object survived; retry pushes the pending location
        let retried = session.apply("retry 42".parse().unwrap()).await.unwrap();
        match retried {
            ControlReply::Placement(p) => {
                assert!(p.is_complete());
                assert_eq!(p.object.transform.location, Vec3::new(5.0, 5.0, 5.0));
            }
            other => panic!("expected placement, got {:?}", other),
        }
        assert!(session.last_error().is_some());
    }

    #[tokio::test]
    async fn test_queue_serves_many_producers() {
        let engine = FakeEngine::accepting("42").await;
        let mut session = placed(&engine).await;

        let (handle, rx) = request_queue(2);
        let runner = tokio::spawn(async move {
            session.run(rx).await.unwrap();
            session
        });

        let mut producers = Vec::new();
        for i in 1..=5 {
            let handle = handle.clone();
            producers.push(tokio::spawn(async move {
                let request = format!("move 42 {},0,0", i).parse().unwrap();
                handle.submit(request).await.unwrap()
            }));
        }
        for producer in producers {
            assert!(matches!(
                producer.await.unwrap(),
                ControlReply::Placement(p) if p.is_complete()
            ));
        }

        match handle.submit(ControlRequest::List).await.unwrap() {
            ControlReply::Objects { objects } => assert_eq!(objects.len(), 1),
            other => panic!("expected objects, got {:?}", other),
        }
        assert_eq!(
            handle.submit(ControlRequest::Quit).await.unwrap(),
            ControlReply::Terminated
        );

        let session = runner.await.unwrap();
        assert_eq!(session.state(), SessionState::Terminated);
        let moves = engine
            .requests()
            .iter()
            .filter(|r| r.starts_with("vset /object/42/location") && !r.ends_with("0 0 100"))
            .count();
        assert_eq!(moves, 5);
    }

    #[tokio::test]
    async fn test_end_of_input_terminates() {
        let engine = FakeEngine::accepting("42").await;
        let mut session = placed(&engine).await;

        let (handle, rx) = request_queue(1);
        drop(handle);
        session.run(rx).await.unwrap();
        assert_eq!(session.state(), SessionState::Terminated);

        // Terminating twice is harmless
        session.terminate().await;
        assert!(matches!(
            session.apply(ControlRequest::List).await,
            Err(PlacerError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_pending_request() {
        let engine = FakeEngine::start(|line| {
            if line.starts_with("vset /objects/spawn") {
                Reply::Send("ok id=42".into())
            } else if line.starts_with("vset /object/42/location") {
                Reply::Ignore
            } else {
                Reply::Send("ok".into())
            }
        })
        .await;
        let mut session = Session::new(
            BridgeConfig {
                command_timeout: std::time::Duration::from_secs(30),
                ..engine.config()
            },
            SessionConfig::default(),
        );
        session.connect().await.unwrap();
        session
            .place("/Game/Meshes/MeshBP", Transform::default())
            .await
            .unwrap();
        session.enter_interactive().unwrap();

        let (handle, rx) = request_queue(4);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let operator = tokio::spawn(async move {
            let pending = handle.submit("move 42 1,2,3".parse().unwrap()).await;
            let after = handle.submit(ControlRequest::List).await;
            (pending, after)
        });
        let trigger = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            let _ = stop_tx.send(());
        });

        let shutdown = async {
            let _ = stop_rx.await;
        };
        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            session.run_until(rx, shutdown),
        )
        .await
        .expect("shutdown did not interrupt the pending move");
        outcome.unwrap();
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(!session.dispatcher.is_connected().await);

        let (pending, after) = operator.await.unwrap();
        assert!(matches!(pending, Err(PlacerError::InvalidState(_))));
        assert!(matches!(after, Err(PlacerError::InvalidState(_))));
        trigger.await.unwrap();
    }
}
