//! # CSMS Core
//!
//! Central system core for OCPP charging stations.
//!
//! ```text
//!  Stations (inbound events)             Operators (commands)
//!        │                                      │
//!        ▼                                      ▼
//! ┌──────────────────┐              ┌──────────────────────┐
//! │  DecisionEngine  │              │      Dispatcher      │
//! │  boot, authorize │              │  submit / poll / wait│
//! │  start/stop tx   │              └──────────┬───────────┘
//! └────────┬─────────┘                         │
//!          │                        ┌──────────▼───────────┐
//!          ▼                        │     TaskRegistry     │
//! ┌──────────────────┐              │ per-target outcomes  │
//! │ Identity │ Tags  │              └──────────┬───────────┘
//! │ Ledger   │ Log   │                         │ one-shot per target
//! └──────────────────┘              ┌──────────▼───────────┐
//!                                   │  StationTransport    │
//!                                   └──────────────────────┘
//! ```
//!
//! Protocol decisions (`Invalid`, `Blocked`, `Expired`, `ConcurrentTx`) are
//! ordinary return values. Per-target delivery failures are outcomes, not
//! errors of `submit`.

pub mod types;
pub mod error;
pub mod config;
pub mod storage;
pub mod engine;
pub mod task;
pub mod dispatch;
pub mod central;

pub use types::*;
pub use error::{CoreError, CoreResult, DeliveryError, DispatchError, StoreError};
pub use config::{DispatcherConfig, EngineConfig};
pub use storage::{IdentityStore, MemoryStore, StatusLog, Stores, TagStore, TransactionLedger};
pub use engine::{Clock, DecisionEngine, StopTransactionEvent, SystemClock};
pub use task::{Task, TaskRegistry, TaskSnapshot};
pub use dispatch::{Completion, Dispatcher, StationTransport};
pub use central::CentralSystem;
