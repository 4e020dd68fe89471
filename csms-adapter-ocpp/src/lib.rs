//! # CSMS OCPP Adapter
//!
//! OCPP-J 1.6 boundary for the central system core.
//!
//! ```text
//! Charging stations
//!       │ WebSocket (ocpp1.6), ws://host:8180/<path>/<stationId>
//!       ▼
//! ┌──────────────────────────────────────────┐
//! │    csms-adapter-ocpp                     │
//! │  ┌──────────────┐   ┌─────────────────┐  │
//! │  │ CentralServer│──►│ Router          │──┼──► DecisionEngine
//! │  └──────┬───────┘   └─────────────────┘  │
//! │         │ CALLRESULT / CALLERROR         │
//! │  ┌──────▼─────────────┐                  │
//! │  │ ConnectionRegistry │◄─────────────────┼──── Dispatcher (StationTransport)
//! │  └────────────────────┘                  │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Actions
//!
//! | Direction          | Actions |
//! |--------------------|---------|
//! | Station → central  | Authorize, BootNotification, DataTransfer, DiagnosticsStatusNotification, FirmwareStatusNotification, Heartbeat, MeterValues, StartTransaction, StatusNotification, StopTransaction |
//! | Central → station  | RemoteStartTransaction, RemoteStopTransaction, TriggerMessage |
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use csms_adapter_ocpp::{CentralServer, ConnectionRegistry, ServerConfig};
//! use csms_core::{CentralSystem, DispatcherConfig, EngineConfig, MemoryStore, Stores};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connections = Arc::new(ConnectionRegistry::new());
//!     let central = CentralSystem::new(
//!         EngineConfig::default(),
//!         DispatcherConfig::default(),
//!         Stores::memory(Arc::new(MemoryStore::new())),
//!         connections.clone(),
//!     );
//!
//!     let server = CentralServer::new(ServerConfig::default(), central.engine().clone(), connections);
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod ocpp;
pub mod config;
pub mod connection;
pub mod router;
pub mod server;

pub use config::ServerConfig;
pub use connection::{Connection, ConnectionRegistry};
pub use router::{Router, StationContext};
pub use server::{station_id_from_path, CentralServer};

// Re-export key types
pub use ocpp::{Action, Call, CallError, CallResult, ErrorCode, OcppError, OcppMessage};
