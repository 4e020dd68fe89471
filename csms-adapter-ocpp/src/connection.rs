//! Live station connections
//!
//! Maps station id to the outgoing frame queue of its WebSocket, and keeps a
//! pending call table per connection (message id -> one-shot completion).
//! CALLRESULT/CALLERROR frames complete the matching entry; a disconnect
//! completes everything still pending with `ConnectionClosed`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use csms_core::{Completion, DeliveryError, StationCommand, StationId, StationTransport};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::ocpp::{Action, Call, CallError, CallResult, OcppMessage};

type Reply = oneshot::Sender<Result<Value, DeliveryError>>;

/// Call sent to a station, awaiting its answer
struct PendingCall {
    action: Action,
    reply: Reply,
}

/// One live WebSocket session of a station
pub struct Connection {
    id: u64,
    station_id: StationId,
    outgoing: mpsc::Sender<OcppMessage>,
    pending: Mutex<HashMap<String, PendingCall>>,
}

impl Connection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    /// Queue `call` and register its completion
    fn call(&self, call: Call) -> Result<Completion, DeliveryError> {
        let (reply, completion) = oneshot::channel();
        let message_id = call.message_id.clone();
        let action = call.action;

        {
            let mut pending = self.pending.lock();
            // Drop entries whose caller stopped listening (timed out)
            pending.retain(|_, p| !p.reply.is_closed());
            pending.insert(message_id.clone(), PendingCall { action, reply });
        }

        if let Err(e) = self.outgoing.try_send(OcppMessage::Call(call)) {
            self.pending.lock().remove(&message_id);
            return Err(match e {
                mpsc::error::TrySendError::Closed(_) => DeliveryError::NotConnected,
                mpsc::error::TrySendError::Full(_) => {
                    DeliveryError::Transport("outgoing queue full".to_string())
                }
            });
        }

        debug!("Queued {} {} for {}", action, message_id, self.station_id);
        Ok(completion)
    }

    /// Complete a pending call from the station's CALLRESULT
    pub fn complete_result(&self, result: CallResult) -> bool {
        match self.pending.lock().remove(&result.message_id) {
            Some(call) => {
                debug!("{} answered {} ({})", self.station_id, call.action, result.message_id);
                let _ = call.reply.send(Ok(result.payload));
                true
            }
            None => {
                warn!(
                    "Unexpected CALLRESULT {} from {}",
                    result.message_id, self.station_id
                );
                false
            }
        }
    }

    /// Complete a pending call from the station's CALLERROR
    pub fn complete_error(&self, error: CallError) -> bool {
        match self.pending.lock().remove(&error.message_id) {
            Some(call) => {
                warn!(
                    "{} rejected {} with {:?}: {}",
                    self.station_id, call.action, error.error_code, error.error_description
                );
                let _ = call.reply.send(Err(DeliveryError::Remote {
                    code: format!("{:?}", error.error_code),
                    description: error.error_description,
                }));
                true
            }
            None => {
                warn!(
                    "Unexpected CALLERROR {} from {}",
                    error.message_id, self.station_id
                );
                false
            }
        }
    }

    /// Fail every pending call with `ConnectionClosed`
    fn close(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            info!(
                "Closing {} pending call(s) for {}",
                drained.len(),
                self.station_id
            );
        }
        for (_, call) in drained {
            let _ = call.reply.send(Err(DeliveryError::ConnectionClosed));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Registry of live station connections
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: RwLock<HashMap<StationId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection; replaces any previous one for the station
    pub fn register(
        &self,
        station_id: impl Into<StationId>,
        outgoing: mpsc::Sender<OcppMessage>,
    ) -> Arc<Connection> {
        let station_id = station_id.into();
        let connection = Arc::new(Connection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            station_id: station_id.clone(),
            outgoing,
            pending: Mutex::new(HashMap::new()),
        });

        let previous = self
            .connections
            .write()
            .insert(station_id.clone(), connection.clone());

        if let Some(previous) = previous {
            warn!("{} reconnected, replacing connection {}", station_id, previous.id);
            previous.close();
        }

        info!("{} connected (connection {})", station_id, connection.id);
        connection
    }

    /// Remove the station's connection if it is still `connection_id`
    pub fn unregister(&self, station_id: &str, connection_id: u64) {
        let removed = {
            let mut connections = self.connections.write();
            let is_current = connections
                .get(station_id)
                .map_or(false, |current| current.id == connection_id);
            if is_current {
                connections.remove(station_id)
            } else {
                None
            }
        };

        if let Some(connection) = removed {
            info!("{} disconnected (connection {})", station_id, connection_id);
            connection.close();
        }
    }

    pub fn get(&self, station_id: &str) -> Option<Arc<Connection>> {
        self.connections.read().get(station_id).cloned()
    }

    pub fn is_connected(&self, station_id: &str) -> bool {
        self.connections.read().contains_key(station_id)
    }

    /// Ids of every connected station, sorted
    pub fn connected_stations(&self) -> Vec<StationId> {
        let mut ids: Vec<_> = self.connections.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StationTransport for ConnectionRegistry {
    fn send(&self, station_id: &str, command: &StationCommand) -> Result<Completion, DeliveryError> {
        let connection = self.get(station_id).ok_or(DeliveryError::NotConnected)?;
        let call =
            Call::from_command(command).map_err(|e| DeliveryError::Transport(e.to_string()))?;
        connection.call(call)
    }
}
