//! Central system facade
//!
//! Bundles the decision engine (station-facing side) with the dispatcher
//! and task registry (operator-facing side) behind one handle.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{DispatcherConfig, EngineConfig};
use crate::dispatch::{Dispatcher, StationTransport};
use crate::engine::DecisionEngine;
use crate::error::DispatchError;
use crate::storage::Stores;
use crate::task::{TaskRegistry, TaskSnapshot};
use crate::types::*;

/// Engine plus dispatcher sharing one set of collaborators
pub struct CentralSystem {
    engine: Arc<DecisionEngine>,
    dispatcher: Dispatcher,
}

impl CentralSystem {
    pub fn new(
        engine_config: EngineConfig,
        dispatcher_config: DispatcherConfig,
        stores: Stores,
        transport: Arc<dyn StationTransport>,
    ) -> Self {
        Self::with_engine(
            Arc::new(DecisionEngine::new(engine_config, stores)),
            dispatcher_config,
            transport,
        )
    }

    /// Wrap an already built engine
    pub fn with_engine(
        engine: Arc<DecisionEngine>,
        dispatcher_config: DispatcherConfig,
        transport: Arc<dyn StationTransport>,
    ) -> Self {
        let registry = Arc::new(TaskRegistry::new());
        Self {
            engine,
            dispatcher: Dispatcher::new(dispatcher_config, transport, registry),
        }
    }

    /// Station-facing handlers
    pub fn engine(&self) -> &Arc<DecisionEngine> {
        &self.engine
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn submit_command(
        &self,
        command: StationCommand,
        targets: Vec<StationId>,
    ) -> Result<TaskId, DispatchError> {
        self.dispatcher.submit(command, targets)
    }

    pub fn poll_task(&self, task_id: TaskId) -> Option<TaskSnapshot> {
        self.dispatcher.poll(task_id)
    }

    /// Snapshot once no target is pending, or when `timeout` elapses
    pub async fn wait_task(&self, task_id: TaskId, timeout: Duration) -> Option<TaskSnapshot> {
        self.dispatcher.registry().wait(task_id, timeout).await
    }
}
