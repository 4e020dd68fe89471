//! Core data model for the central system
//!
//! Stations, authorization tags, transactions, connector status and meter
//! log entries, plus the decision values handed back to stations and the
//! per-target outcomes tracked for operator commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a charging station (charge box id)
pub type StationId = String;

/// Identity of an authorization tag (RFID id)
pub type TagId = String;

/// Transaction identity assigned by the ledger
pub type TransactionId = i32;

/// Task handle returned to operators
pub type TaskId = u64;

// ============================================================================
// Persisted Records
// ============================================================================

/// Vendor metadata reported in a BootNotification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootInfo {
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    pub charge_point_serial_number: Option<String>,
    pub charge_box_serial_number: Option<String>,
    pub firmware_version: Option<String>,
    pub iccid: Option<String>,
    pub imsi: Option<String>,
    pub meter_type: Option<String>,
    pub meter_serial_number: Option<String>,
}

/// Registration request handed to the identity store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub station_id: StationId,
    pub endpoint_address: String,
    pub protocol_version: String,
    pub info: BootInfo,
}

/// Station record as held by the identity store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub station_id: StationId,
    pub endpoint_address: String,
    pub protocol_version: String,
    pub info: BootInfo,
    pub firmware_status: Option<String>,
    pub diagnostics_status: Option<String>,
}

/// Authorization tag record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationTag {
    pub tag_id: TagId,
    pub blocked: bool,
    pub expiry_date: Option<DateTime<Utc>>,
    pub parent_tag_id: Option<TagId>,
    pub in_transaction: bool,
}

impl AuthorizationTag {
    /// A plain, unblocked tag with no expiry
    pub fn new(tag_id: impl Into<TagId>) -> Self {
        Self {
            tag_id: tag_id.into(),
            blocked: false,
            expiry_date: None,
            parent_tag_id: None,
            in_transaction: false,
        }
    }

    pub fn blocked(mut self) -> Self {
        self.blocked = true;
        self
    }

    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry_date = Some(expiry);
        self
    }

    pub fn with_parent(mut self, parent: impl Into<TagId>) -> Self {
        self.parent_tag_id = Some(parent.into());
        self
    }

    pub fn in_transaction(mut self) -> Self {
        self.in_transaction = true;
        self
    }
}

/// Data needed to open a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub station_id: StationId,
    pub connector_id: u32,
    pub tag_id: TagId,
    pub start_timestamp: DateTime<Utc>,
    pub start_meter: i64,
    pub reservation_id: Option<i32>,
}

/// Charging session record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: TransactionId,
    pub station_id: StationId,
    pub connector_id: u32,
    pub tag_id: TagId,
    pub start_timestamp: DateTime<Utc>,
    pub start_meter: i64,
    pub reservation_id: Option<i32>,
    pub stop_timestamp: Option<DateTime<Utc>>,
    pub stop_meter: Option<i64>,
}

impl Transaction {
    /// Open until a matching stop closes it
    pub fn is_open(&self) -> bool {
        self.stop_timestamp.is_none()
    }
}

/// One StatusNotification log row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorStatusEntry {
    pub station_id: StationId,
    pub connector_id: u32,
    pub status: String,
    pub error_code: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub info: Option<String>,
    pub vendor_id: Option<String>,
    pub vendor_error_code: Option<String>,
}

/// A single sampled value inside a meter reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledValue {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl SampledValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            context: None,
            format: None,
            measurand: None,
            phase: None,
            location: None,
            unit: None,
        }
    }
}

/// Timestamped group of sampled values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValue {
    pub timestamp: DateTime<Utc>,
    pub sampled_value: Vec<SampledValue>,
}

/// One stored meter reading row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterReading {
    pub station_id: StationId,
    pub connector_id: u32,
    pub transaction_id: Option<TransactionId>,
    pub value: MeterValue,
}

// ============================================================================
// Decisions
// ============================================================================

/// Authorization decision for a tag
///
/// Never an error: every variant is a valid answer to the station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "PascalCase")]
pub enum IdTagDecision {
    Accepted {
        expiry_date: DateTime<Utc>,
        parent_tag_id: Option<TagId>,
    },
    Blocked,
    Expired,
    Invalid,
    ConcurrentTx,
}

impl IdTagDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IdTagDecision::Accepted { .. })
    }

    /// Protocol status label
    pub fn status(&self) -> &'static str {
        match self {
            IdTagDecision::Accepted { .. } => "Accepted",
            IdTagDecision::Blocked => "Blocked",
            IdTagDecision::Expired => "Expired",
            IdTagDecision::Invalid => "Invalid",
            IdTagDecision::ConcurrentTx => "ConcurrentTx",
        }
    }
}

/// Answer to a BootNotification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Accepted {
        heartbeat_interval: u32,
        current_time: DateTime<Utc>,
    },
    Rejected,
}

/// Answer to a StartTransaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub decision: IdTagDecision,
    pub transaction_id: Option<TransactionId>,
}

// ============================================================================
// Operator Commands
// ============================================================================

/// Messages a station can be asked to (re-)send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageTrigger {
    BootNotification,
    DiagnosticsStatusNotification,
    FirmwareStatusNotification,
    Heartbeat,
    MeterValues,
    StatusNotification,
}

/// Command sent from the central system to stations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StationCommand {
    #[serde(rename_all = "camelCase")]
    RemoteStartTransaction {
        id_tag: TagId,
        connector_id: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    RemoteStopTransaction { transaction_id: TransactionId },
    #[serde(rename_all = "camelCase")]
    TriggerMessage {
        requested_message: MessageTrigger,
        connector_id: Option<u32>,
    },
}

impl StationCommand {
    /// Protocol action name of the command
    pub fn action(&self) -> &'static str {
        match self {
            StationCommand::RemoteStartTransaction { .. } => "RemoteStartTransaction",
            StationCommand::RemoteStopTransaction { .. } => "RemoteStopTransaction",
            StationCommand::TriggerMessage { .. } => "TriggerMessage",
        }
    }
}

/// Why a target of a task did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum FailureReason {
    NotConnected,
    Timeout,
    ConnectionClosed,
    Remote { code: String, description: String },
    Transport { message: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NotConnected => write!(f, "station not connected"),
            FailureReason::Timeout => write!(f, "no reply within delivery timeout"),
            FailureReason::ConnectionClosed => write!(f, "connection closed before reply"),
            FailureReason::Remote { code, description } => {
                write!(f, "station error {}: {}", code, description)
            }
            FailureReason::Transport { message } => write!(f, "transport error: {}", message),
        }
    }
}

/// Per-target result of a dispatched command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Outcome {
    Pending,
    Success { payload: serde_json::Value },
    Failure(FailureReason),
}

impl Outcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }
}
