//! Station-facing decision engine
//!
//! One handler per inbound event kind. Each handler reads the persisted
//! state through the injected collaborators, computes the protocol answer
//! and requests the matching mutation.
//!
//! ## Tag / transaction atomicity
//!
//! Opening and closing a transaction and flipping the tag's `in_transaction`
//! flag happen inside a critical section keyed by tag id. The flag itself is
//! written with a compare-and-set, so a writer outside this engine can never
//! make two sessions succeed on one tag either. When the second half of a
//! start/stop fails, the flag is restored before the error is returned.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::CoreResult;
use crate::storage::Stores;
use crate::types::*;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// StopTransaction event fields
#[derive(Debug, Clone)]
pub struct StopTransactionEvent {
    pub station_id: StationId,
    pub transaction_id: TransactionId,
    pub timestamp: DateTime<Utc>,
    pub stop_meter: i64,
    pub tag_id: Option<TagId>,
    /// Meter batches spanning the session
    pub transaction_data: Vec<Vec<MeterValue>>,
}

/// One lock per tag id, created on first use
#[derive(Default)]
struct TagLocks {
    locks: Mutex<HashMap<TagId, Arc<Mutex<()>>>>,
}

impl TagLocks {
    fn get(&self, tag_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(tag_id.to_string())
            .or_default()
            .clone()
    }
}

/// Computes protocol answers from persisted state
pub struct DecisionEngine {
    config: EngineConfig,
    stores: Stores,
    clock: Arc<dyn Clock>,
    tag_locks: TagLocks,
}

impl DecisionEngine {
    /// Create an engine on the wall clock
    pub fn new(config: EngineConfig, stores: Stores) -> Self {
        Self::with_clock(config, stores, Arc::new(SystemClock))
    }

    pub fn with_clock(config: EngineConfig, stores: Stores, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            stores,
            clock,
            tag_locks: TagLocks::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// BootNotification
    ///
    /// Always answers Accepted or Rejected; a store failure rejects.
    pub fn register(
        &self,
        station_id: &str,
        endpoint_address: &str,
        info: BootInfo,
    ) -> RegistrationOutcome {
        info!("Executing bootNotification for {}", station_id);

        let registration = Registration {
            station_id: station_id.to_string(),
            endpoint_address: endpoint_address.to_string(),
            protocol_version: self.config.protocol_version.clone(),
            info,
        };

        match self.stores.identity.upsert_station(&registration) {
            Ok(true) => RegistrationOutcome::Accepted {
                heartbeat_interval: self.config.heartbeat_interval_secs(),
                current_time: self.clock.now(),
            },
            Ok(false) => {
                warn!("Station {} is not registered, rejecting boot", station_id);
                RegistrationOutcome::Rejected
            }
            Err(e) => {
                error!("Failed to register station {}: {}", station_id, e);
                RegistrationOutcome::Rejected
            }
        }
    }

    /// FirmwareStatusNotification
    pub fn report_firmware_status(&self, station_id: &str, status: &str) -> CoreResult<()> {
        info!("Executing firmwareStatusNotification for {}", station_id);
        self.stores.identity.set_firmware_status(station_id, status)?;
        Ok(())
    }

    /// DiagnosticsStatusNotification
    pub fn report_diagnostics_status(&self, station_id: &str, status: &str) -> CoreResult<()> {
        info!("Executing diagnosticsStatusNotification for {}", station_id);
        self.stores.identity.set_diagnostics_status(station_id, status)?;
        Ok(())
    }

    /// StatusNotification
    pub fn report_connector_status(&self, entry: ConnectorStatusEntry) -> CoreResult<()> {
        info!("Executing statusNotification for {}", entry.station_id);
        debug!(
            "Connector {}:{} is {} ({})",
            entry.station_id, entry.connector_id, entry.status, entry.error_code
        );
        self.stores.log.append_connector_status(entry)?;
        Ok(())
    }

    /// MeterValues
    ///
    /// Returns the number of rows appended; an empty batch appends nothing.
    pub fn report_meter_values(
        &self,
        station_id: &str,
        connector_id: u32,
        transaction_id: Option<TransactionId>,
        readings: &[MeterValue],
    ) -> CoreResult<usize> {
        info!("Executing meterValues for {}", station_id);

        if readings.is_empty() {
            return Ok(0);
        }

        let rows = self.stores.log.append_meter_readings(
            station_id,
            connector_id,
            transaction_id,
            readings,
        )?;
        Ok(rows)
    }

    /// Authorize
    pub fn authorize(&self, station_id: &str, tag_id: &str) -> CoreResult<IdTagDecision> {
        info!("Executing authorize for {}", station_id);
        self.resolve_tag(tag_id)
    }

    /// StartTransaction
    ///
    /// Opens a transaction only when the tag resolves to `Accepted`.
    pub fn start_transaction(&self, tx: NewTransaction) -> CoreResult<StartOutcome> {
        info!("Executing startTransaction for {}", tx.station_id);

        let lock = self.tag_locks.get(&tx.tag_id);
        let _guard = lock.lock();

        let decision = self.resolve_tag(&tx.tag_id)?;
        if !decision.is_accepted() {
            return Ok(StartOutcome {
                decision,
                transaction_id: None,
            });
        }

        if !self
            .stores
            .tags
            .compare_and_set_in_transaction(&tx.tag_id, false, true)?
        {
            warn!("Tag {} was claimed by another session", tx.tag_id);
            return Ok(StartOutcome {
                decision: IdTagDecision::ConcurrentTx,
                transaction_id: None,
            });
        }

        let transaction_id = match self.stores.ledger.create_transaction(&tx) {
            Ok(id) => id,
            Err(e) => {
                self.restore_flag(&tx.tag_id, false);
                return Err(e.into());
            }
        };

        info!(
            "Started transaction {} on {}:{} for tag {}",
            transaction_id, tx.station_id, tx.connector_id, tx.tag_id
        );

        Ok(StartOutcome {
            decision,
            transaction_id: Some(transaction_id),
        })
    }

    /// StopTransaction
    ///
    /// An unknown or already closed transaction is skipped. The tag decision
    /// is only returned when the station supplied a non-empty tag.
    pub fn stop_transaction(&self, event: StopTransactionEvent) -> CoreResult<Option<IdTagDecision>> {
        info!("Executing stopTransaction for {}", event.station_id);

        self.close_transaction(&event)?;

        if !event.transaction_data.is_empty() {
            match self.stores.ledger.connector_id_of(event.transaction_id)? {
                Some(connector_id) => {
                    for batch in &event.transaction_data {
                        self.stores.log.append_meter_readings(
                            &event.station_id,
                            connector_id,
                            Some(event.transaction_id),
                            batch,
                        )?;
                    }
                }
                None => {
                    warn!(
                        "No connector for transaction {}, dropping {} meter batches",
                        event.transaction_id,
                        event.transaction_data.len()
                    );
                }
            }
        }

        match event.tag_id.as_deref() {
            Some(tag_id) if !tag_id.is_empty() => Ok(Some(self.resolve_tag(tag_id)?)),
            _ => Ok(None),
        }
    }

    /// Heartbeat: current time, nothing persisted
    pub fn heartbeat(&self, station_id: &str) -> DateTime<Utc> {
        info!("Executing heartbeat for {}", station_id);
        self.clock.now()
    }

    /// DataTransfer: logged and acknowledged, nothing else
    pub fn data_transfer(
        &self,
        station_id: &str,
        vendor_id: &str,
        message_id: Option<&str>,
        data: Option<&str>,
    ) {
        info!("Executing dataTransfer for {}", station_id);
        info!("[Data Transfer] Charge point: {}, Vendor Id: {}", station_id, vendor_id);

        if let Some(message_id) = message_id.filter(|m| !m.is_empty()) {
            info!("[Data Transfer] Message Id: {}", message_id);
        }
        if let Some(data) = data.filter(|d| !d.is_empty()) {
            info!("[Data Transfer] Data: {}", data);
        }
    }

    /// Close the ledger row and release the tag as one unit
    fn close_transaction(&self, event: &StopTransactionEvent) -> CoreResult<()> {
        let Some(existing) = self.stores.ledger.transaction(event.transaction_id)? else {
            warn!("Transaction {} not found, skipping close", event.transaction_id);
            return Ok(());
        };

        let lock = self.tag_locks.get(&existing.tag_id);
        let _guard = lock.lock();

        // Re-read under the tag lock: a duplicate stop may have won the race.
        match self.stores.ledger.transaction(event.transaction_id)? {
            Some(tx) if tx.is_open() => {}
            _ => {
                warn!("Transaction {} already closed, skipping", event.transaction_id);
                return Ok(());
            }
        }

        let released = self
            .stores
            .tags
            .compare_and_set_in_transaction(&existing.tag_id, true, false)?;
        if !released {
            debug!("Tag {} was not marked in transaction", existing.tag_id);
        }

        match self.stores.ledger.close_transaction(
            event.transaction_id,
            event.timestamp,
            event.stop_meter,
        ) {
            Ok(_) => {
                info!(
                    "Stopped transaction {} (meter {} -> {})",
                    event.transaction_id, existing.start_meter, event.stop_meter
                );
                Ok(())
            }
            Err(e) => {
                if released {
                    self.restore_flag(&existing.tag_id, true);
                }
                Err(e.into())
            }
        }
    }

    /// Undo a flag flip after the paired ledger write failed
    fn restore_flag(&self, tag_id: &str, value: bool) {
        match self
            .stores
            .tags
            .compare_and_set_in_transaction(tag_id, !value, value)
        {
            Ok(true) => debug!("Restored in_transaction={} on tag {}", value, tag_id),
            Ok(false) => warn!("Tag {} changed before restore", tag_id),
            Err(e) => error!("Failed to restore tag {}: {}", tag_id, e),
        }
    }

    /// Tag decision in fixed precedence order:
    /// unknown, in transaction, blocked, expired, accepted.
    fn resolve_tag(&self, tag_id: &str) -> CoreResult<IdTagDecision> {
        let now = self.clock.now();

        let decision = match self.stores.tags.tag(tag_id)? {
            None => IdTagDecision::Invalid,
            Some(tag) if tag.in_transaction => IdTagDecision::ConcurrentTx,
            Some(tag) if tag.blocked => IdTagDecision::Blocked,
            Some(AuthorizationTag {
                expiry_date: Some(expiry),
                ..
            }) if expiry < now => IdTagDecision::Expired,
            Some(tag) => IdTagDecision::Accepted {
                expiry_date: now + self.tag_validity(),
                parent_tag_id: tag.parent_tag_id,
            },
        };

        info!("The idTag {} is {}", tag_id, decision.status());
        Ok(decision)
    }

    fn tag_validity(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.tag_validity).unwrap_or(chrono::Duration::hours(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::storage::{IdentityStore, MemoryStore, TagStore, TransactionLedger};
    use chrono::{Duration, TimeZone};

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn setup() -> (Arc<MemoryStore>, DecisionEngine) {
        let store = Arc::new(MemoryStore::new());
        let engine = DecisionEngine::with_clock(
            EngineConfig::default(),
            Stores::memory(store.clone()),
            Arc::new(FixedClock(now())),
        );
        (store, engine)
    }

    fn new_tx(tag: &str) -> NewTransaction {
        NewTransaction {
            station_id: "CP1".to_string(),
            connector_id: 1,
            tag_id: tag.to_string(),
            start_timestamp: now(),
            start_meter: 1000,
            reservation_id: None,
        }
    }

    fn stop_event(transaction_id: TransactionId, tag: Option<&str>) -> StopTransactionEvent {
        StopTransactionEvent {
            station_id: "CP1".to_string(),
            transaction_id,
            timestamp: now() + Duration::hours(1),
            stop_meter: 5000,
            tag_id: tag.map(str::to_string),
            transaction_data: Vec::new(),
        }
    }

    fn meter_value(value: &str) -> MeterValue {
        MeterValue {
            timestamp: now(),
            sampled_value: vec![SampledValue::new(value)],
        }
    }

    #[test]
    fn test_register_accepts() {
        let (store, engine) = setup();
        let info = BootInfo {
            charge_point_vendor: "Acme".to_string(),
            charge_point_model: "X1".to_string(),
            ..Default::default()
        };

        match engine.register("CP1", "10.0.0.2:4000", info) {
            RegistrationOutcome::Accepted {
                heartbeat_interval,
                current_time,
            } => {
                assert_eq!(heartbeat_interval, 14400);
                assert_eq!(current_time, now());
            }
            RegistrationOutcome::Rejected => panic!("Expected Accepted"),
        }

        let station = store.station("CP1").unwrap().unwrap();
        assert_eq!(station.protocol_version, "1.6");
        assert_eq!(station.info.charge_point_model, "X1");
    }

    #[test]
    fn test_register_saturates_long_interval() {
        let store = Arc::new(MemoryStore::new());
        let engine = DecisionEngine::new(
            EngineConfig::default().with_heartbeat_interval(u64::MAX),
            Stores::memory(store),
        );

        match engine.register("CP1", "addr", BootInfo::default()) {
            RegistrationOutcome::Accepted { heartbeat_interval, .. } => {
                assert_eq!(heartbeat_interval, u32::MAX)
            }
            RegistrationOutcome::Rejected => panic!("Expected Accepted"),
        }
    }

    #[test]
    fn test_register_rejects_unknown_and_on_failure() {
        let store = Arc::new(MemoryStore::new().known_stations_only());
        let engine = DecisionEngine::new(EngineConfig::default(), Stores::memory(store.clone()));
        assert_eq!(
            engine.register("CP9", "addr", BootInfo::default()),
            RegistrationOutcome::Rejected
        );

        store.provision_station("CP9");
        store.set_unavailable(true);
        assert_eq!(
            engine.register("CP9", "addr", BootInfo::default()),
            RegistrationOutcome::Rejected
        );
    }

    #[test]
    fn test_status_notifications_persist() {
        let (store, engine) = setup();
        engine.register("CP1", "addr", BootInfo::default());

        engine.report_firmware_status("CP1", "Installed").unwrap();
        engine.report_diagnostics_status("CP1", "Uploaded").unwrap();

        let station = store.station("CP1").unwrap().unwrap();
        assert_eq!(station.firmware_status.as_deref(), Some("Installed"));
        assert_eq!(station.diagnostics_status.as_deref(), Some("Uploaded"));
    }

    #[test]
    fn test_connector_status_appended() {
        let (store, engine) = setup();
        engine
            .report_connector_status(ConnectorStatusEntry {
                station_id: "CP1".to_string(),
                connector_id: 2,
                status: "Faulted".to_string(),
                error_code: "GroundFailure".to_string(),
                timestamp: Some(now()),
                info: Some("relay".to_string()),
                vendor_id: None,
                vendor_error_code: None,
            })
            .unwrap();

        let rows = store.connector_statuses();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].error_code, "GroundFailure");
    }

    #[test]
    fn test_empty_meter_values_append_nothing() {
        let (store, engine) = setup();
        assert_eq!(engine.report_meter_values("CP1", 1, None, &[]).unwrap(), 0);
        assert!(store.meter_readings().is_empty());

        let rows = engine
            .report_meter_values("CP1", 1, Some(7), &[meter_value("10"), meter_value("20")])
            .unwrap();
        assert_eq!(rows, 2);
        assert_eq!(store.meter_readings()[1].transaction_id, Some(7));
    }

    #[test]
    fn test_authorize_precedence() {
        let (store, engine) = setup();
        let yesterday = now() - Duration::days(1);

        store.put_tag(AuthorizationTag::new("busy").blocked().with_expiry(yesterday).in_transaction());
        store.put_tag(AuthorizationTag::new("blocked").blocked().with_expiry(yesterday));
        store.put_tag(AuthorizationTag::new("expired").with_expiry(yesterday));
        store.put_tag(AuthorizationTag::new("child").with_parent("parent"));

        assert_eq!(engine.authorize("CP1", "nobody").unwrap(), IdTagDecision::Invalid);
        assert_eq!(engine.authorize("CP1", "busy").unwrap(), IdTagDecision::ConcurrentTx);
        assert_eq!(engine.authorize("CP1", "blocked").unwrap(), IdTagDecision::Blocked);
        assert_eq!(engine.authorize("CP1", "expired").unwrap(), IdTagDecision::Expired);
        assert_eq!(
            engine.authorize("CP1", "child").unwrap(),
            IdTagDecision::Accepted {
                expiry_date: now() + Duration::hours(1),
                parent_tag_id: Some("parent".to_string()),
            }
        );
    }

    #[test]
    fn test_expiry_at_now_is_not_expired() {
        let (store, engine) = setup();
        store.put_tag(AuthorizationTag::new("edge").with_expiry(now()));
        assert!(engine.authorize("CP1", "edge").unwrap().is_accepted());
    }

    #[test]
    fn test_start_rejected_tag_opens_nothing() {
        let (store, engine) = setup();
        let outcome = engine.start_transaction(new_tx("ghost")).unwrap();

        assert_eq!(outcome.decision, IdTagDecision::Invalid);
        assert_eq!(outcome.transaction_id, None);
        assert!(store.transactions().is_empty());
    }

    #[test]
    fn test_start_stop_round_trip() {
        let (store, engine) = setup();
        store.put_tag(AuthorizationTag::new("TAG1"));

        let outcome = engine.start_transaction(new_tx("TAG1")).unwrap();
        assert!(outcome.decision.is_accepted());
        let tx_id = outcome.transaction_id.unwrap();
        assert!(store.tag("TAG1").unwrap().unwrap().in_transaction);

        // second start on the same tag must see the open session
        let second = engine.start_transaction(new_tx("TAG1")).unwrap();
        assert_eq!(second.decision, IdTagDecision::ConcurrentTx);
        assert_eq!(second.transaction_id, None);

        let decision = engine.stop_transaction(stop_event(tx_id, Some("TAG1"))).unwrap();
        assert!(decision.unwrap().is_accepted());

        let tag = store.tag("TAG1").unwrap().unwrap();
        assert!(!tag.in_transaction);

        let tx = store.transaction(tx_id).unwrap().unwrap();
        assert!(!tx.is_open());
        assert_eq!(tx.start_meter, 1000);
        assert_eq!(tx.stop_meter, Some(5000));
    }

    #[test]
    fn test_stop_unknown_transaction_is_noop() {
        let (store, engine) = setup();
        store.put_tag(AuthorizationTag::new("TAG1"));

        let decision = engine.stop_transaction(stop_event(42, None)).unwrap();
        assert_eq!(decision, None);
        assert!(store.transactions().is_empty());

        let decision = engine.stop_transaction(stop_event(42, Some("TAG1"))).unwrap();
        assert!(decision.unwrap().is_accepted());
    }

    #[test]
    fn test_stop_empty_tag_returns_nothing() {
        let (store, engine) = setup();
        store.put_tag(AuthorizationTag::new("TAG1"));
        let tx_id = engine.start_transaction(new_tx("TAG1")).unwrap().transaction_id.unwrap();

        assert_eq!(engine.stop_transaction(stop_event(tx_id, Some(""))).unwrap(), None);
    }

    #[test]
    fn test_duplicate_stop_keeps_new_session() {
        let (store, engine) = setup();
        store.put_tag(AuthorizationTag::new("TAG1"));

        let first = engine.start_transaction(new_tx("TAG1")).unwrap().transaction_id.unwrap();
        engine.stop_transaction(stop_event(first, None)).unwrap();

        let second = engine.start_transaction(new_tx("TAG1")).unwrap().transaction_id.unwrap();
        engine.stop_transaction(stop_event(first, None)).unwrap();

        assert!(store.tag("TAG1").unwrap().unwrap().in_transaction);
        assert!(store.transaction(second).unwrap().unwrap().is_open());
    }

    #[test]
    fn test_stop_appends_transaction_data() {
        let (store, engine) = setup();
        store.put_tag(AuthorizationTag::new("TAG1"));
        let mut tx = new_tx("TAG1");
        tx.connector_id = 3;
        let tx_id = engine.start_transaction(tx).unwrap().transaction_id.unwrap();

        let mut event = stop_event(tx_id, None);
        event.transaction_data = vec![vec![meter_value("1")], vec![meter_value("2"), meter_value("3")]];
        engine.stop_transaction(event).unwrap();

        let rows = store.meter_readings();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.connector_id == 3 && r.transaction_id == Some(tx_id)));
    }

    #[test]
    fn test_stop_unresolved_connector_drops_batches() {
        let (store, engine) = setup();
        let mut event = stop_event(77, None);
        event.transaction_data = vec![vec![meter_value("1")]];

        engine.stop_transaction(event).unwrap();
        assert!(store.meter_readings().is_empty());
    }

    #[test]
    fn test_store_failure_keeps_tag_state() {
        let (store, engine) = setup();
        store.put_tag(AuthorizationTag::new("TAG1"));
        store.set_unavailable(true);

        let result = engine.start_transaction(new_tx("TAG1"));
        assert!(matches!(result, Err(CoreError::Store(_))));

        store.set_unavailable(false);
        assert!(!store.tag("TAG1").unwrap().unwrap().in_transaction);
        assert!(store.transactions().is_empty());
    }

    #[test]
    fn test_heartbeat_writes_nothing() {
        let (store, engine) = setup();
        engine.register("CP1", "addr", BootInfo::default());
        let before = store.station("CP1").unwrap();

        store.set_unavailable(true);
        assert_eq!(engine.heartbeat("CP1"), now());
        assert_eq!(engine.heartbeat("CP9"), now());

        store.set_unavailable(false);
        assert_eq!(store.station("CP1").unwrap(), before);
        assert!(store.station("CP9").unwrap().is_none());
    }

    #[test]
    fn test_data_transfer_acknowledged() {
        let (_store, engine) = setup();
        engine.data_transfer("CP1", "com.acme", Some(""), Some("payload"));
    }
}
