//! Inbound call routing
//!
//! Decodes a station's CALL payload, hands it to the decision engine and
//! encodes the answer. Every CALL gets exactly one reply frame:
//!
//! | Situation                         | Reply                          |
//! |-----------------------------------|--------------------------------|
//! | handled                           | CALLRESULT                     |
//! | payload does not decode           | CALLERROR `FormationViolation` |
//! | outbound-only or unknown action   | CALLERROR `NotImplemented`     |
//! | engine/storage failure            | CALLERROR `InternalError`      |

use std::sync::Arc;

use chrono::Utc;
use csms_core::{
    ConnectorStatusEntry, CoreError, DecisionEngine, NewTransaction, RegistrationOutcome,
    StopTransactionEvent,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::ocpp::*;

/// Identity of the connection a call arrived on
#[derive(Debug, Clone)]
pub struct StationContext {
    pub station_id: String,
    pub endpoint_address: String,
}

/// Error reply for one call
#[derive(Debug)]
struct CallFailure {
    code: ErrorCode,
    description: String,
}

impl CallFailure {
    fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

impl From<CoreError> for CallFailure {
    fn from(err: CoreError) -> Self {
        error!("Request failed: {}", err);
        CallFailure::new(ErrorCode::InternalError, err.to_string())
    }
}

type HandlerResult = Result<Value, CallFailure>;

/// Routes station calls to the decision engine
pub struct Router {
    engine: Arc<DecisionEngine>,
}

impl Router {
    pub fn new(engine: Arc<DecisionEngine>) -> Self {
        Self { engine }
    }

    /// Answer one inbound CALL
    pub fn handle_call(&self, ctx: &StationContext, call: Call) -> OcppMessage {
        let message_id = call.message_id;

        let result = match call.action {
            Action::Authorize => self.authorize(ctx, call.payload),
            Action::BootNotification => self.boot_notification(ctx, call.payload),
            Action::DataTransfer => self.data_transfer(ctx, call.payload),
            Action::DiagnosticsStatusNotification => self.diagnostics_status(ctx, call.payload),
            Action::FirmwareStatusNotification => self.firmware_status(ctx, call.payload),
            Action::Heartbeat => self.heartbeat(ctx, call.payload),
            Action::MeterValues => self.meter_values(ctx, call.payload),
            Action::StartTransaction => self.start_transaction(ctx, call.payload),
            Action::StatusNotification => self.status_notification(ctx, call.payload),
            Action::StopTransaction => self.stop_transaction(ctx, call.payload),
            Action::RemoteStartTransaction
            | Action::RemoteStopTransaction
            | Action::TriggerMessage => Err(CallFailure::new(
                ErrorCode::NotImplemented,
                format!("{} is not accepted from a charge point", call.action),
            )),
        };

        match result {
            Ok(payload) => OcppMessage::CallResult(CallResult {
                message_id,
                payload,
            }),
            Err(failure) => {
                warn!(
                    "{}: {} -> {:?} ({})",
                    ctx.station_id, call.action, failure.code, failure.description
                );
                OcppMessage::CallError(CallError::new(
                    message_id,
                    failure.code,
                    failure.description,
                ))
            }
        }
    }

    fn authorize(&self, ctx: &StationContext, payload: Value) -> HandlerResult {
        let req: AuthorizeRequest = decode(payload)?;
        let decision = self.engine.authorize(&ctx.station_id, &req.id_tag)?;
        encode(AuthorizeResponse {
            id_tag_info: IdTagInfo::from(&decision),
        })
    }

    fn boot_notification(&self, ctx: &StationContext, payload: Value) -> HandlerResult {
        let req: BootNotificationRequest = decode(payload)?;
        let interval = self.engine.config().heartbeat_interval_secs();

        let response = match self
            .engine
            .register(&ctx.station_id, &ctx.endpoint_address, req.into())
        {
            RegistrationOutcome::Accepted {
                heartbeat_interval,
                current_time,
            } => BootNotificationResponse {
                status: RegistrationStatus::Accepted,
                current_time,
                interval: heartbeat_interval,
            },
            // The wire format still wants a time and a retry interval
            RegistrationOutcome::Rejected => BootNotificationResponse {
                status: RegistrationStatus::Rejected,
                current_time: Utc::now(),
                interval,
            },
        };
        encode(response)
    }

    fn data_transfer(&self, ctx: &StationContext, payload: Value) -> HandlerResult {
        let req: DataTransferRequest = decode(payload)?;
        self.engine.data_transfer(
            &ctx.station_id,
            &req.vendor_id,
            req.message_id.as_deref(),
            req.data.as_deref(),
        );
        encode(DataTransferResponse {
            status: DataTransferStatus::Accepted,
            data: None,
        })
    }

    fn diagnostics_status(&self, ctx: &StationContext, payload: Value) -> HandlerResult {
        let req: DiagnosticsStatusNotificationRequest = decode(payload)?;
        self.engine
            .report_diagnostics_status(&ctx.station_id, &label(&req.status))?;
        encode(EmptyResponse {})
    }

    fn firmware_status(&self, ctx: &StationContext, payload: Value) -> HandlerResult {
        let req: FirmwareStatusNotificationRequest = decode(payload)?;
        self.engine
            .report_firmware_status(&ctx.station_id, &label(&req.status))?;
        encode(EmptyResponse {})
    }

    fn heartbeat(&self, ctx: &StationContext, payload: Value) -> HandlerResult {
        let _: HeartbeatRequest = decode(payload)?;
        let current_time = self.engine.heartbeat(&ctx.station_id);
        encode(HeartbeatResponse { current_time })
    }

    fn meter_values(&self, ctx: &StationContext, payload: Value) -> HandlerResult {
        let req: MeterValuesRequest = decode(payload)?;
        self.engine.report_meter_values(
            &ctx.station_id,
            req.connector_id,
            req.transaction_id,
            &req.meter_value,
        )?;
        encode(EmptyResponse {})
    }

    fn start_transaction(&self, ctx: &StationContext, payload: Value) -> HandlerResult {
        let req: StartTransactionRequest = decode(payload)?;
        let outcome = self.engine.start_transaction(NewTransaction {
            station_id: ctx.station_id.clone(),
            connector_id: req.connector_id,
            tag_id: req.id_tag,
            start_timestamp: req.timestamp,
            start_meter: req.meter_start,
            reservation_id: req.reservation_id,
        })?;
        encode(StartTransactionResponse::from(&outcome))
    }

    fn status_notification(&self, ctx: &StationContext, payload: Value) -> HandlerResult {
        let req: StatusNotificationRequest = decode(payload)?;
        self.engine.report_connector_status(ConnectorStatusEntry {
            station_id: ctx.station_id.clone(),
            connector_id: req.connector_id,
            status: label(&req.status),
            error_code: label(&req.error_code),
            timestamp: req.timestamp,
            info: req.info,
            vendor_id: req.vendor_id,
            vendor_error_code: req.vendor_error_code,
        })?;
        encode(EmptyResponse {})
    }

    fn stop_transaction(&self, ctx: &StationContext, payload: Value) -> HandlerResult {
        let req: StopTransactionRequest = decode(payload)?;
        if let Some(reason) = req.reason {
            debug!("Transaction {} stopped: {:?}", req.transaction_id, reason);
        }

        let transaction_data = if req.transaction_data.is_empty() {
            Vec::new()
        } else {
            vec![req.transaction_data]
        };

        let decision = self.engine.stop_transaction(StopTransactionEvent {
            station_id: ctx.station_id.clone(),
            transaction_id: req.transaction_id,
            timestamp: req.timestamp,
            stop_meter: req.meter_stop,
            tag_id: req.id_tag,
            transaction_data,
        })?;

        encode(StopTransactionResponse {
            id_tag_info: decision.as_ref().map(IdTagInfo::from),
        })
    }
}

fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, CallFailure> {
    serde_json::from_value(payload)
        .map_err(|e| CallFailure::new(ErrorCode::FormationViolation, e.to_string()))
}

fn encode(response: impl Serialize) -> HandlerResult {
    serde_json::to_value(response)
        .map_err(|e| CallFailure::new(ErrorCode::InternalError, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use csms_core::{AuthorizationTag, EngineConfig, MemoryStore, Stores};
    use serde_json::json;

    fn setup() -> (Arc<MemoryStore>, Router, StationContext) {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(DecisionEngine::new(
            EngineConfig::default(),
            Stores::memory(store.clone()),
        ));
        let ctx = StationContext {
            station_id: "CP1".to_string(),
            endpoint_address: "10.0.0.5:40000".to_string(),
        };
        (store, Router::new(engine), ctx)
    }

    fn call(action: Action, payload: Value) -> Call {
        Call {
            message_id: "m1".to_string(),
            action,
            payload,
        }
    }

    fn result_payload(message: OcppMessage) -> Value {
        match message {
            OcppMessage::CallResult(result) => {
                assert_eq!(result.message_id, "m1");
                result.payload
            }
            other => panic!("Expected CallResult, got {:?}", other),
        }
    }

    fn error_code(message: OcppMessage) -> ErrorCode {
        match message {
            OcppMessage::CallError(error) => error.error_code,
            other => panic!("Expected CallError, got {:?}", other),
        }
    }

    #[test]
    fn test_boot_accepted() {
        let (_, router, ctx) = setup();
        let reply = router.handle_call(
            &ctx,
            call(
                Action::BootNotification,
                json!({"chargePointVendor": "Acme", "chargePointModel": "X1"}),
            ),
        );

        let payload = result_payload(reply);
        assert_eq!(payload["status"], "Accepted");
        assert_eq!(payload["interval"], 14400);
        assert!(payload["currentTime"].is_string());
    }

    #[test]
    fn test_boot_rejected_when_store_down() {
        let (store, router, ctx) = setup();
        store.set_unavailable(true);

        let reply = router.handle_call(
            &ctx,
            call(
                Action::BootNotification,
                json!({"chargePointVendor": "Acme", "chargePointModel": "X1"}),
            ),
        );
        assert_eq!(result_payload(reply)["status"], "Rejected");
    }

    #[test]
    fn test_start_and_stop_transaction() {
        let (store, router, ctx) = setup();
        store.put_tag(AuthorizationTag::new("TAG1"));

        let reply = router.handle_call(
            &ctx,
            call(
                Action::StartTransaction,
                json!({
                    "connectorId": 1,
                    "idTag": "TAG1",
                    "meterStart": 100,
                    "timestamp": "2026-03-01T12:00:00Z"
                }),
            ),
        );
        let payload = result_payload(reply);
        assert_eq!(payload["idTagInfo"]["status"], "Accepted");
        let tx_id = payload["transactionId"].as_i64().unwrap();
        assert!(tx_id > 0);

        let reply = router.handle_call(
            &ctx,
            call(
                Action::StopTransaction,
                json!({
                    "transactionId": tx_id,
                    "idTag": "TAG1",
                    "meterStop": 900,
                    "timestamp": "2026-03-01T13:00:00Z",
                    "transactionData": [{
                        "timestamp": "2026-03-01T12:30:00Z",
                        "sampledValue": [{"value": "500"}]
                    }]
                }),
            ),
        );
        let payload = result_payload(reply);
        assert_eq!(payload["idTagInfo"]["status"], "Accepted");
        assert_eq!(store.meter_readings().len(), 1);
        assert!(!store.transactions()[0].is_open());
    }

    #[test]
    fn test_rejected_start_reports_zero() {
        let (_, router, ctx) = setup();
        let reply = router.handle_call(
            &ctx,
            call(
                Action::StartTransaction,
                json!({
                    "connectorId": 1,
                    "idTag": "UNKNOWN",
                    "meterStart": 0,
                    "timestamp": "2026-03-01T12:00:00Z"
                }),
            ),
        );
        let payload = result_payload(reply);
        assert_eq!(payload["idTagInfo"]["status"], "Invalid");
        assert_eq!(payload["transactionId"], 0);
    }

    #[test]
    fn test_bad_payload_is_formation_violation() {
        let (_, router, ctx) = setup();
        let reply = router.handle_call(&ctx, call(Action::Authorize, json!({"tag": 5})));
        assert_eq!(error_code(reply), ErrorCode::FormationViolation);
    }

    #[test]
    fn test_outbound_action_not_implemented() {
        let (_, router, ctx) = setup();
        let reply = router.handle_call(
            &ctx,
            call(Action::RemoteStopTransaction, json!({"transactionId": 1})),
        );
        assert_eq!(error_code(reply), ErrorCode::NotImplemented);
    }

    #[test]
    fn test_store_failure_is_internal_error() {
        let (store, router, ctx) = setup();
        store.set_unavailable(true);
        let reply = router.handle_call(&ctx, call(Action::Authorize, json!({"idTag": "TAG1"})));
        assert_eq!(error_code(reply), ErrorCode::InternalError);
    }

    #[test]
    fn test_status_notification_appends_row() {
        let (store, router, ctx) = setup();
        let reply = router.handle_call(
            &ctx,
            call(
                Action::StatusNotification,
                json!({"connectorId": 2, "errorCode": "NoError", "status": "Charging"}),
            ),
        );
        assert_eq!(result_payload(reply), json!({}));

        let rows = store.connector_statuses();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "Charging");
        assert_eq!(rows[0].connector_id, 2);
    }

    #[test]
    fn test_heartbeat_and_data_transfer() {
        let (_, router, ctx) = setup();

        let payload = result_payload(router.handle_call(&ctx, call(Action::Heartbeat, json!({}))));
        assert!(payload["currentTime"].is_string());

        let payload = result_payload(router.handle_call(
            &ctx,
            call(Action::DataTransfer, json!({"vendorId": "acme", "data": "x"})),
        ));
        assert_eq!(payload, json!({"status": "Accepted"}));
    }
}
