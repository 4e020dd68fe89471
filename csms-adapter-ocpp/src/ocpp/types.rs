//! OCPP 1.6 message payloads
//!
//! Request/response bodies for the actions the central system handles,
//! plus the mapping from core decisions onto the wire shapes.

use chrono::{DateTime, Utc};
use csms_core::{BootInfo, IdTagDecision, MessageTrigger, MeterValue, StartOutcome, TransactionId};
use serde::{Deserialize, Serialize};

// ============================================================================
// Enumerations
// ============================================================================

/// Registration status for BootNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

/// Authorization status inside IdTagInfo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    Accepted,
    Blocked,
    Expired,
    Invalid,
    ConcurrentTx,
}

/// Connector status reported in StatusNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePointStatus {
    Available,
    Preparing,
    Charging,
    SuspendedEVSE,
    SuspendedEV,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

/// Connector error code reported in StatusNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePointErrorCode {
    ConnectorLockFailure,
    EVCommunicationError,
    GroundFailure,
    HighTemperature,
    InternalError,
    LocalListConflict,
    NoError,
    OtherError,
    OverCurrentFailure,
    OverVoltage,
    PowerMeterFailure,
    PowerSwitchFailure,
    ReaderFailure,
    ResetFailure,
    UnderVoltage,
    WeakSignal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareStatus {
    Downloaded,
    DownloadFailed,
    Downloading,
    Idle,
    InstallationFailed,
    Installing,
    Installed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticsStatus {
    Idle,
    Uploaded,
    UploadFailed,
    Uploading,
}

/// Why a station ended a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    EmergencyStop,
    EVDisconnected,
    HardReset,
    Local,
    Other,
    PowerLoss,
    Reboot,
    Remote,
    SoftReset,
    UnlockCommand,
    DeAuthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataTransferStatus {
    Accepted,
    Rejected,
    UnknownMessageId,
    UnknownVendorId,
}

/// Station answer to RemoteStart/RemoteStopTransaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteStartStopStatus {
    Accepted,
    Rejected,
}

/// Station answer to TriggerMessage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerMessageStatus {
    Accepted,
    Rejected,
    NotImplemented,
}

/// Wire label of a unit-only enum value
pub fn label<T: std::fmt::Debug>(value: &T) -> String {
    format!("{:?}", value)
}

// ============================================================================
// Core Data Types
// ============================================================================

/// Authorization result sent back to the station
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTagInfo {
    pub status: AuthorizationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id_tag: Option<String>,
}

impl From<&IdTagDecision> for IdTagInfo {
    fn from(decision: &IdTagDecision) -> Self {
        match decision {
            IdTagDecision::Accepted {
                expiry_date,
                parent_tag_id,
            } => Self {
                status: AuthorizationStatus::Accepted,
                expiry_date: Some(*expiry_date),
                parent_id_tag: parent_tag_id.clone(),
            },
            IdTagDecision::Blocked => Self::status(AuthorizationStatus::Blocked),
            IdTagDecision::Expired => Self::status(AuthorizationStatus::Expired),
            IdTagDecision::Invalid => Self::status(AuthorizationStatus::Invalid),
            IdTagDecision::ConcurrentTx => Self::status(AuthorizationStatus::ConcurrentTx),
        }
    }
}

impl IdTagInfo {
    fn status(status: AuthorizationStatus) -> Self {
        Self {
            status,
            expiry_date: None,
            parent_id_tag: None,
        }
    }
}

// ============================================================================
// Station -> Central System Requests
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub id_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
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

impl From<BootNotificationRequest> for BootInfo {
    fn from(req: BootNotificationRequest) -> Self {
        Self {
            charge_point_vendor: req.charge_point_vendor,
            charge_point_model: req.charge_point_model,
            charge_point_serial_number: req.charge_point_serial_number,
            charge_box_serial_number: req.charge_box_serial_number,
            firmware_version: req.firmware_version,
            iccid: req.iccid,
            imsi: req.imsi,
            meter_type: req.meter_type,
            meter_serial_number: req.meter_serial_number,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTransferRequest {
    pub vendor_id: String,
    pub message_id: Option<String>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsStatusNotificationRequest {
    pub status: DiagnosticsStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareStatusNotificationRequest {
    pub status: FirmwareStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValuesRequest {
    pub connector_id: u32,
    pub transaction_id: Option<TransactionId>,
    pub meter_value: Vec<MeterValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionRequest {
    pub connector_id: u32,
    pub id_tag: String,
    pub meter_start: i64,
    pub reservation_id: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotificationRequest {
    pub connector_id: u32,
    pub error_code: ChargePointErrorCode,
    pub info: Option<String>,
    pub status: ChargePointStatus,
    pub timestamp: Option<DateTime<Utc>>,
    pub vendor_id: Option<String>,
    pub vendor_error_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTransactionRequest {
    pub id_tag: Option<String>,
    pub meter_stop: i64,
    pub timestamp: DateTime<Utc>,
    pub transaction_id: TransactionId,
    pub reason: Option<StopReason>,
    #[serde(default)]
    pub transaction_data: Vec<MeterValue>,
}

// ============================================================================
// Central System -> Station Responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    pub id_tag_info: IdTagInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationResponse {
    pub status: RegistrationStatus,
    pub current_time: DateTime<Utc>,
    pub interval: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTransferResponse {
    pub status: DataTransferStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub current_time: DateTime<Utc>,
}

/// Body-less acknowledgement (status, firmware, diagnostics, meter values)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmptyResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionResponse {
    pub id_tag_info: IdTagInfo,
    /// 0 when no transaction was opened
    pub transaction_id: TransactionId,
}

impl From<&StartOutcome> for StartTransactionResponse {
    fn from(outcome: &StartOutcome) -> Self {
        Self {
            id_tag_info: IdTagInfo::from(&outcome.decision),
            transaction_id: outcome.transaction_id.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTransactionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_tag_info: Option<IdTagInfo>,
}

// ============================================================================
// Central System -> Station Requests
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStartTransactionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
    pub id_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStopTransactionRequest {
    pub transaction_id: TransactionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerMessageRequest {
    pub requested_message: MessageTrigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
}

// ============================================================================
// Station -> Central System Responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStartStopResponse {
    pub status: RemoteStartStopStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerMessageResponse {
    pub status: TriggerMessageStatus,
}

impl TriggerMessageResponse {
    /// Decode the payload a station returned for a TriggerMessage task target
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_id_tag_info_from_decision() {
        let expiry = Utc.with_ymd_and_hms(2026, 3, 1, 13, 0, 0).unwrap();
        let info = IdTagInfo::from(&IdTagDecision::Accepted {
            expiry_date: expiry,
            parent_tag_id: Some("PARENT".to_string()),
        });

        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            json!({
                "status": "Accepted",
                "expiryDate": "2026-03-01T13:00:00Z",
                "parentIdTag": "PARENT"
            })
        );

        let info = IdTagInfo::from(&IdTagDecision::ConcurrentTx);
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            json!({"status": "ConcurrentTx"})
        );
    }

    #[test]
    fn test_rejected_start_encodes_zero_transaction() {
        let response = StartTransactionResponse::from(&StartOutcome {
            decision: IdTagDecision::Invalid,
            transaction_id: None,
        });
        assert_eq!(response.transaction_id, 0);
        assert_eq!(response.id_tag_info.status, AuthorizationStatus::Invalid);
    }

    #[test]
    fn test_stop_transaction_parsing() {
        let req: StopTransactionRequest = serde_json::from_value(json!({
            "transactionId": 5,
            "meterStop": 1500,
            "timestamp": "2026-03-01T12:30:00Z",
            "reason": "EVDisconnected",
            "transactionData": [{
                "timestamp": "2026-03-01T12:15:00Z",
                "sampledValue": [{"value": "750", "measurand": "Energy.Active.Import.Register"}]
            }]
        }))
        .unwrap();

        assert_eq!(req.transaction_id, 5);
        assert_eq!(req.id_tag, None);
        assert_eq!(req.reason, Some(StopReason::EVDisconnected));
        assert_eq!(req.transaction_data.len(), 1);
        assert_eq!(req.transaction_data[0].sampled_value[0].value, "750");
    }

    #[test]
    fn test_status_notification_labels() {
        let req: StatusNotificationRequest = serde_json::from_value(json!({
            "connectorId": 1,
            "errorCode": "NoError",
            "status": "SuspendedEVSE"
        }))
        .unwrap();

        assert_eq!(label(&req.status), "SuspendedEVSE");
        assert_eq!(label(&req.error_code), "NoError");
        assert!(req.timestamp.is_none());
    }

    #[test]
    fn test_trigger_response_from_payload() {
        let response =
            TriggerMessageResponse::from_payload(&json!({"status": "NotImplemented"})).unwrap();
        assert_eq!(response.status, TriggerMessageStatus::NotImplemented);

        assert!(TriggerMessageResponse::from_payload(&json!({"status": "Maybe"})).is_err());
        assert!(TriggerMessageResponse::from_payload(&json!({})).is_err());
    }
}
