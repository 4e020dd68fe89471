//! Command dispatch and reply correlation
//!
//! ```text
//! submit(command, [CP1, CP2, CP3])
//!   │
//!   ├─ TaskRegistry::create  (all targets Pending)
//!   │
//!   ├─ CP1: transport.send ──► one-shot ──► reply task ──► Success / Failure
//!   ├─ CP2: transport.send ──► Err(NotConnected) ──► Failure(NotConnected)
//!   └─ CP3: transport.send ──► one-shot ──► (no reply) ──► Failure(Timeout)
//! ```
//!
//! `submit` never waits for a reply. Each one-shot is consumed by exactly one
//! spawned task which settles that target's cell, so every target leaves
//! `Pending` once, either on reply, transport error, or the delivery timeout.
//!
//! `submit` spawns onto the current Tokio runtime and must be called from
//! within one.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::DispatcherConfig;
use crate::error::{DeliveryError, DispatchError};
use crate::task::{Task, TaskRegistry, TaskSnapshot};
use crate::types::*;

/// Single-fire completion of one delivery attempt
pub type Completion = oneshot::Receiver<Result<Value, DeliveryError>>;

/// Live connections to stations
pub trait StationTransport: Send + Sync {
    /// Start delivering `command` to `station_id`.
    ///
    /// Fails synchronously when no attempt can be made (e.g. `NotConnected`).
    /// Otherwise the returned completion fires once with the station's reply
    /// payload or a transport error. Dropping it abandons the reply.
    fn send(&self, station_id: &str, command: &StationCommand) -> Result<Completion, DeliveryError>;
}

/// Fans commands out to stations and tracks the outcomes
pub struct Dispatcher {
    config: DispatcherConfig,
    transport: Arc<dyn StationTransport>,
    registry: Arc<TaskRegistry>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        transport: Arc<dyn StationTransport>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            config,
            transport,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Create a task for `command` and attempt delivery to every target
    pub fn submit(
        &self,
        command: StationCommand,
        targets: Vec<StationId>,
    ) -> Result<TaskId, DispatchError> {
        validate_command(&command)?;
        validate_targets(&targets)?;

        let task = self.registry.create(command.clone(), targets);
        info!(
            "Task {}: dispatching {} to {} station(s)",
            task.id(),
            command.action(),
            task.targets().len()
        );

        for station_id in task.targets() {
            match self.transport.send(station_id, &command) {
                Ok(completion) => {
                    debug!("Task {}: sent to {}", task.id(), station_id);
                    tokio::spawn(await_reply(
                        task.clone(),
                        station_id.clone(),
                        completion,
                        self.config.delivery_timeout,
                    ));
                }
                Err(e) => {
                    warn!("Task {}: delivery to {} failed: {}", task.id(), station_id, e);
                    task.resolve(station_id, Outcome::Failure(e.into()));
                }
            }
        }

        Ok(task.id())
    }

    /// Current snapshot of a task
    pub fn poll(&self, task_id: TaskId) -> Option<TaskSnapshot> {
        self.registry.poll(task_id)
    }

    /// Remote start of a session on one station
    pub fn start_session(
        &self,
        station_id: impl Into<StationId>,
        id_tag: impl Into<TagId>,
        connector_id: Option<u32>,
    ) -> Result<TaskId, DispatchError> {
        self.submit(
            StationCommand::RemoteStartTransaction {
                id_tag: id_tag.into(),
                connector_id,
            },
            vec![station_id.into()],
        )
    }

    /// Remote stop of a session on one station
    pub fn stop_session(
        &self,
        station_id: impl Into<StationId>,
        transaction_id: TransactionId,
    ) -> Result<TaskId, DispatchError> {
        self.submit(
            StationCommand::RemoteStopTransaction { transaction_id },
            vec![station_id.into()],
        )
    }

    /// Ask stations to re-send their connector status
    pub fn heartbeat_probe(&self, station_ids: Vec<StationId>) -> Result<TaskId, DispatchError> {
        self.submit(
            StationCommand::TriggerMessage {
                requested_message: MessageTrigger::StatusNotification,
                connector_id: None,
            },
            station_ids,
        )
    }
}

/// Settle one target from its completion, bounded by the delivery timeout
async fn await_reply(
    task: Arc<Task>,
    station_id: StationId,
    completion: Completion,
    timeout: std::time::Duration,
) {
    let outcome = match tokio::time::timeout(timeout, completion).await {
        Ok(Ok(Ok(payload))) => Outcome::Success { payload },
        Ok(Ok(Err(e))) => Outcome::Failure(e.into()),
        Ok(Err(_)) => Outcome::Failure(FailureReason::ConnectionClosed),
        Err(_) => Outcome::Failure(DeliveryError::Timeout.into()),
    };

    if let Outcome::Failure(ref reason) = outcome {
        warn!("Task {}: {} failed: {}", task.id(), station_id, reason);
    } else {
        info!("Task {}: {} replied", task.id(), station_id);
    }

    task.resolve(&station_id, outcome);
}

fn validate_command(command: &StationCommand) -> Result<(), DispatchError> {
    match command {
        StationCommand::RemoteStartTransaction { id_tag, connector_id } => {
            if id_tag.trim().is_empty() {
                return Err(DispatchError::MalformedCommand("id tag is empty".to_string()));
            }
            if *connector_id == Some(0) {
                return Err(DispatchError::MalformedCommand(
                    "remote start needs a connector id above 0".to_string(),
                ));
            }
        }
        StationCommand::RemoteStopTransaction { transaction_id } => {
            if *transaction_id <= 0 {
                return Err(DispatchError::MalformedCommand(format!(
                    "invalid transaction id {}",
                    transaction_id
                )));
            }
        }
        StationCommand::TriggerMessage { .. } => {}
    }
    Ok(())
}

fn validate_targets(targets: &[StationId]) -> Result<(), DispatchError> {
    if targets.is_empty() {
        return Err(DispatchError::EmptyTargets);
    }

    let mut seen = HashSet::new();
    for station_id in targets {
        if station_id.is_empty() {
            return Err(DispatchError::MalformedCommand("empty station id".to_string()));
        }
        if !seen.insert(station_id.as_str()) {
            return Err(DispatchError::DuplicateTarget(station_id.clone()));
        }
    }
    Ok(())
}
