//! Persistence collaborators for the decision engine.
//!
//! The engine never touches storage mechanics directly. It talks to four
//! narrow interfaces:
//! - `IdentityStore`: station records (boot metadata, firmware/diagnostics status)
//! - `TagStore`: authorization tags, with an atomic compare-and-set on the
//!   `in_transaction` flag
//! - `TransactionLedger`: open/close/lookup of charging sessions
//! - `StatusLog`: append-only connector status and meter reading rows
//!
//! `MemoryStore` implements all four and is what the node and the tests run on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::types::*;

/// Station records
pub trait IdentityStore: Send + Sync {
    /// Create or refresh the station record.
    ///
    /// Returns `true` when the station is accepted for registration.
    fn upsert_station(&self, registration: &Registration) -> Result<bool, StoreError>;

    fn station(&self, station_id: &str) -> Result<Option<Station>, StoreError>;

    fn set_firmware_status(&self, station_id: &str, status: &str) -> Result<(), StoreError>;

    fn set_diagnostics_status(&self, station_id: &str, status: &str) -> Result<(), StoreError>;
}

/// Authorization tag records
pub trait TagStore: Send + Sync {
    fn tag(&self, tag_id: &str) -> Result<Option<AuthorizationTag>, StoreError>;

    /// Set `in_transaction` to `new` only if it currently equals `expected`.
    ///
    /// Returns `Ok(false)` when the flag did not match or the tag is unknown.
    /// A failed write leaves the flag untouched.
    fn compare_and_set_in_transaction(
        &self,
        tag_id: &str,
        expected: bool,
        new: bool,
    ) -> Result<bool, StoreError>;
}

/// Charging session records
pub trait TransactionLedger: Send + Sync {
    fn create_transaction(&self, tx: &NewTransaction) -> Result<TransactionId, StoreError>;

    /// Close an open transaction.
    ///
    /// Returns the closed record, or `None` if the id is unknown or already closed.
    fn close_transaction(
        &self,
        transaction_id: TransactionId,
        stop_timestamp: DateTime<Utc>,
        stop_meter: i64,
    ) -> Result<Option<Transaction>, StoreError>;

    fn transaction(&self, transaction_id: TransactionId) -> Result<Option<Transaction>, StoreError>;

    fn connector_id_of(&self, transaction_id: TransactionId) -> Result<Option<u32>, StoreError> {
        Ok(self.transaction(transaction_id)?.map(|tx| tx.connector_id))
    }
}

/// Append-only status and meter log
pub trait StatusLog: Send + Sync {
    fn append_connector_status(&self, entry: ConnectorStatusEntry) -> Result<(), StoreError>;

    /// Append one row per meter value; returns the number of rows written.
    fn append_meter_readings(
        &self,
        station_id: &str,
        connector_id: u32,
        transaction_id: Option<TransactionId>,
        readings: &[MeterValue],
    ) -> Result<usize, StoreError>;
}

/// Bundle of collaborators injected into the engine
#[derive(Clone)]
pub struct Stores {
    pub identity: Arc<dyn IdentityStore>,
    pub tags: Arc<dyn TagStore>,
    pub ledger: Arc<dyn TransactionLedger>,
    pub log: Arc<dyn StatusLog>,
}

impl Stores {
    /// Use one in-memory store for every collaborator
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            identity: store.clone(),
            tags: store.clone(),
            ledger: store.clone(),
            log: store,
        }
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// Ledger state guarded by one lock so ids stay dense
#[derive(Default)]
struct Ledger {
    next_id: TransactionId,
    transactions: HashMap<TransactionId, Transaction>,
}

/// In-memory store implementing every collaborator
pub struct MemoryStore {
    accept_unknown_stations: bool,
    stations: Mutex<HashMap<StationId, Station>>,
    tags: Mutex<HashMap<TagId, AuthorizationTag>>,
    ledger: Mutex<Ledger>,
    statuses: Mutex<Vec<ConnectorStatusEntry>>,
    readings: Mutex<Vec<MeterReading>>,
    /// Failure injection: every call fails with `Unavailable` while set
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Store that registers any station that boots
    pub fn new() -> Self {
        Self {
            accept_unknown_stations: true,
            stations: Mutex::new(HashMap::new()),
            tags: Mutex::new(HashMap::new()),
            ledger: Mutex::new(Ledger {
                next_id: 1,
                transactions: HashMap::new(),
            }),
            statuses: Mutex::new(Vec::new()),
            readings: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Only stations added through `provision_station` are accepted on boot
    pub fn known_stations_only(mut self) -> Self {
        self.accept_unknown_stations = false;
        self
    }

    /// Pre-create a station record so its boot is accepted
    pub fn provision_station(&self, station_id: impl Into<StationId>) {
        let station_id = station_id.into();
        self.stations.lock().insert(
            station_id.clone(),
            Station {
                station_id,
                endpoint_address: String::new(),
                protocol_version: String::new(),
                info: BootInfo::default(),
                firmware_status: None,
                diagnostics_status: None,
            },
        );
    }

    /// Insert or replace a tag record
    pub fn put_tag(&self, tag: AuthorizationTag) {
        debug!("Storage: put tag {}", tag.tag_id);
        self.tags.lock().insert(tag.tag_id.clone(), tag);
    }

    /// Toggle failure injection
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn connector_statuses(&self) -> Vec<ConnectorStatusEntry> {
        self.statuses.lock().clone()
    }

    pub fn meter_readings(&self) -> Vec<MeterReading> {
        self.readings.lock().clone()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        let ledger = self.ledger.lock();
        let mut txs: Vec<_> = ledger.transactions.values().cloned().collect();
        txs.sort_by_key(|tx| tx.transaction_id);
        txs
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityStore for MemoryStore {
    fn upsert_station(&self, registration: &Registration) -> Result<bool, StoreError> {
        self.check_available()?;

        let mut stations = self.stations.lock();
        match stations.get_mut(&registration.station_id) {
            Some(station) => {
                station.endpoint_address = registration.endpoint_address.clone();
                station.protocol_version = registration.protocol_version.clone();
                station.info = registration.info.clone();
                Ok(true)
            }
            None if self.accept_unknown_stations => {
                info!("Storage: Created station {}", registration.station_id);
                stations.insert(
                    registration.station_id.clone(),
                    Station {
                        station_id: registration.station_id.clone(),
                        endpoint_address: registration.endpoint_address.clone(),
                        protocol_version: registration.protocol_version.clone(),
                        info: registration.info.clone(),
                        firmware_status: None,
                        diagnostics_status: None,
                            },
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn station(&self, station_id: &str) -> Result<Option<Station>, StoreError> {
        self.check_available()?;
        Ok(self.stations.lock().get(station_id).cloned())
    }

    fn set_firmware_status(&self, station_id: &str, status: &str) -> Result<(), StoreError> {
        self.check_available()?;
        if let Some(station) = self.stations.lock().get_mut(station_id) {
            station.firmware_status = Some(status.to_string());
        }
        Ok(())
    }

    fn set_diagnostics_status(&self, station_id: &str, status: &str) -> Result<(), StoreError> {
        self.check_available()?;
        if let Some(station) = self.stations.lock().get_mut(station_id) {
            station.diagnostics_status = Some(status.to_string());
        }
        Ok(())
    }
}

impl TagStore for MemoryStore {
    fn tag(&self, tag_id: &str) -> Result<Option<AuthorizationTag>, StoreError> {
        self.check_available()?;
        Ok(self.tags.lock().get(tag_id).cloned())
    }

    fn compare_and_set_in_transaction(
        &self,
        tag_id: &str,
        expected: bool,
        new: bool,
    ) -> Result<bool, StoreError> {
        self.check_available()?;

        let mut tags = self.tags.lock();
        match tags.get_mut(tag_id) {
            Some(tag) if tag.in_transaction == expected => {
                tag.in_transaction = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl TransactionLedger for MemoryStore {
    fn create_transaction(&self, tx: &NewTransaction) -> Result<TransactionId, StoreError> {
        self.check_available()?;

        let mut ledger = self.ledger.lock();
        let transaction_id = ledger.next_id;
        ledger.next_id += 1;
        ledger.transactions.insert(
            transaction_id,
            Transaction {
                transaction_id,
                station_id: tx.station_id.clone(),
                connector_id: tx.connector_id,
                tag_id: tx.tag_id.clone(),
                start_timestamp: tx.start_timestamp,
                start_meter: tx.start_meter,
                reservation_id: tx.reservation_id,
                stop_timestamp: None,
                stop_meter: None,
            },
        );

        debug!("Storage: Opened transaction {}", transaction_id);
        Ok(transaction_id)
    }

    fn close_transaction(
        &self,
        transaction_id: TransactionId,
        stop_timestamp: DateTime<Utc>,
        stop_meter: i64,
    ) -> Result<Option<Transaction>, StoreError> {
        self.check_available()?;

        let mut ledger = self.ledger.lock();
        match ledger.transactions.get_mut(&transaction_id) {
            Some(tx) if tx.is_open() => {
                tx.stop_timestamp = Some(stop_timestamp);
                tx.stop_meter = Some(stop_meter);
                debug!("Storage: Closed transaction {}", transaction_id);
                Ok(Some(tx.clone()))
            }
            _ => Ok(None),
        }
    }

    fn transaction(&self, transaction_id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        self.check_available()?;
        Ok(self.ledger.lock().transactions.get(&transaction_id).cloned())
    }
}

impl StatusLog for MemoryStore {
    fn append_connector_status(&self, mut entry: ConnectorStatusEntry) -> Result<(), StoreError> {
        self.check_available()?;
        if entry.timestamp.is_none() {
            entry.timestamp = Some(Utc::now());
        }
        self.statuses.lock().push(entry);
        Ok(())
    }

    fn append_meter_readings(
        &self,
        station_id: &str,
        connector_id: u32,
        transaction_id: Option<TransactionId>,
        readings: &[MeterValue],
    ) -> Result<usize, StoreError> {
        self.check_available()?;

        let mut rows = self.readings.lock();
        rows.extend(readings.iter().map(|value| MeterReading {
            station_id: station_id.to_string(),
            connector_id,
            transaction_id,
            value: value.clone(),
        }));
        Ok(readings.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(station_id: &str) -> Registration {
        Registration {
            station_id: station_id.to_string(),
            endpoint_address: "10.0.0.5:50123".to_string(),
            protocol_version: "1.6".to_string(),
            info: BootInfo {
                charge_point_vendor: "Acme".to_string(),
                charge_point_model: "X1".to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_upsert_accepts_new_station() {
        let store = MemoryStore::new();
        assert!(store.upsert_station(&registration("CP1")).unwrap());

        let station = store.station("CP1").unwrap().unwrap();
        assert_eq!(station.info.charge_point_vendor, "Acme");
        assert_eq!(station.endpoint_address, "10.0.0.5:50123");
    }

    #[test]
    fn test_known_stations_only() {
        let store = MemoryStore::new().known_stations_only();
        assert!(!store.upsert_station(&registration("CP1")).unwrap());
        assert!(store.station("CP1").unwrap().is_none());

        store.provision_station("CP1");
        assert!(store.upsert_station(&registration("CP1")).unwrap());
    }

    #[test]
    fn test_compare_and_set() {
        let store = MemoryStore::new();
        store.put_tag(AuthorizationTag::new("TAG1"));

        assert!(store.compare_and_set_in_transaction("TAG1", false, true).unwrap());
        assert!(!store.compare_and_set_in_transaction("TAG1", false, true).unwrap());
        assert!(store.tag("TAG1").unwrap().unwrap().in_transaction);

        assert!(!store.compare_and_set_in_transaction("NOPE", false, true).unwrap());
    }

    #[test]
    fn test_close_only_once() {
        let store = MemoryStore::new();
        let id = store
            .create_transaction(&NewTransaction {
                station_id: "CP1".to_string(),
                connector_id: 1,
                tag_id: "TAG1".to_string(),
                start_timestamp: Utc::now(),
                start_meter: 100,
                reservation_id: None,
            })
            .unwrap();

        assert!(store.close_transaction(id, Utc::now(), 200).unwrap().is_some());
        assert!(store.close_transaction(id, Utc::now(), 300).unwrap().is_none());
        assert_eq!(store.transaction(id).unwrap().unwrap().stop_meter, Some(200));
        assert_eq!(store.connector_id_of(id).unwrap(), Some(1));
        assert_eq!(store.connector_id_of(99).unwrap(), None);
    }

    #[test]
    fn test_unavailable_leaves_state() {
        let store = MemoryStore::new();
        store.put_tag(AuthorizationTag::new("TAG1"));
        store.set_unavailable(true);

        assert!(matches!(
            store.compare_and_set_in_transaction("TAG1", false, true),
            Err(StoreError::Unavailable(_))
        ));

        store.set_unavailable(false);
        assert!(!store.tag("TAG1").unwrap().unwrap().in_transaction);
    }

    #[test]
    fn test_status_timestamp_defaults() {
        let store = MemoryStore::new();
        store
            .append_connector_status(ConnectorStatusEntry {
                station_id: "CP1".to_string(),
                connector_id: 1,
                status: "Available".to_string(),
                error_code: "NoError".to_string(),
                timestamp: None,
                info: None,
                vendor_id: None,
                vendor_error_code: None,
            })
            .unwrap();

        assert!(store.connector_statuses()[0].timestamp.is_some());
    }
}
