//! SQLite topology store.
//!
//! Persists devices and their services with upsert-by-identity semantics:
//! the hardware address is the sole device identity, and each cycle's
//! batch is merged inside a single transaction so an aborted cycle leaves
//! no partial writes.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use lanscope_core::types::{ClassifiedObservation, Device, DeviceType, Protocol, ServiceRecord};

use crate::error::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS devices (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    hardware_address TEXT NOT NULL UNIQUE,
    address          TEXT NOT NULL,
    hostname         TEXT,
    device_type      TEXT NOT NULL,
    location_id      INTEGER REFERENCES locations(id),
    last_seen        TEXT NOT NULL,
    is_active        INTEGER NOT NULL DEFAULT 1,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS services (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id    INTEGER NOT NULL REFERENCES devices(id),
    port         INTEGER NOT NULL,
    protocol     TEXT NOT NULL,
    service_name TEXT NOT NULL,
    is_active    INTEGER NOT NULL DEFAULT 1,
    last_checked TEXT NOT NULL,
    UNIQUE(device_id, port, protocol)
);

CREATE TABLE IF NOT EXISTS device_types (
    name              TEXT PRIMARY KEY,
    icon              TEXT,
    default_ports     TEXT,
    default_protocols TEXT,
    ui_rules          TEXT
);

CREATE TABLE IF NOT EXISTS locations (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    name          TEXT NOT NULL UNIQUE,
    description   TEXT,
    network_range TEXT,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scan_history (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id INTEGER NOT NULL REFERENCES devices(id),
    scan_time TEXT NOT NULL,
    status    TEXT NOT NULL,
    details   TEXT
);

CREATE INDEX IF NOT EXISTS idx_services_device ON services(device_id);
CREATE INDEX IF NOT EXISTS idx_scan_history_device ON scan_history(device_id);
"#;

/// Per-cycle reconciliation counters, for logging.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub inserted: usize,
    pub updated: usize,
    pub services_upserted: usize,
    pub marked_inactive: usize,
}

pub struct TopologyStore {
    conn: Connection,
}

impl TopologyStore {
    /// Open or create the topology database with WAL mode enabled and the
    /// schema bootstrapped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self { conn })
    }

    /// Upsert a location by name and return its id.
    pub fn ensure_location(&self, name: &str, network_range: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO locations (name, network_range, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET network_range = excluded.network_range",
            params![name, network_range, Utc::now().to_rfc3339()],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM locations WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Merge one cycle's classified observations into the topology, as a
    /// single transaction.
    ///
    /// Devices are upserted by hardware address (last observation in the
    /// batch wins), their observed ports are upserted by
    /// `(device_id, port, protocol)`, and a scan_history row is written per
    /// device. When `stale_cutoff` is set, devices last seen before it are
    /// marked inactive in the same transaction. An empty batch commits
    /// without mutating anything.
    pub fn reconcile(
        &mut self,
        batch: &[ClassifiedObservation],
        now: DateTime<Utc>,
        location_id: Option<i64>,
        stale_cutoff: Option<DateTime<Utc>>,
    ) -> Result<ReconcileSummary> {
        let tx = self.conn.transaction()?;
        let mut summary = ReconcileSummary::default();
        let now_str = now.to_rfc3339();

        for item in batch {
            let obs = &item.observation;

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM devices WHERE hardware_address = ?1",
                    params![obs.hardware_address],
                    |row| row.get(0),
                )
                .optional()?;

            tx.execute(
                "INSERT INTO devices (hardware_address, address, hostname, device_type,
                                      location_id, last_seen, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)
                 ON CONFLICT(hardware_address) DO UPDATE SET
                     address     = excluded.address,
                     hostname    = excluded.hostname,
                     device_type = excluded.device_type,
                     location_id = excluded.location_id,
                     last_seen   = excluded.last_seen,
                     is_active   = 1,
                     updated_at  = excluded.updated_at",
                params![
                    obs.hardware_address,
                    obs.address.to_string(),
                    obs.hostname,
                    item.device_type.label(),
                    location_id,
                    obs.timestamp.to_rfc3339(),
                    now_str,
                ],
            )?;

            let device_id: i64 = tx.query_row(
                "SELECT id FROM devices WHERE hardware_address = ?1",
                params![obs.hardware_address],
                |row| row.get(0),
            )?;

            let status = match existing {
                Some(_) => {
                    summary.updated += 1;
                    "seen"
                }
                None => {
                    summary.inserted += 1;
                    "new"
                }
            };

            for port in &obs.ports {
                tx.execute(
                    "INSERT INTO services (device_id, port, protocol, service_name,
                                           is_active, last_checked)
                     VALUES (?1, ?2, ?3, ?4, 1, ?5)
                     ON CONFLICT(device_id, port, protocol) DO UPDATE SET
                         service_name = excluded.service_name,
                         is_active    = 1,
                         last_checked = excluded.last_checked",
                    params![
                        device_id,
                        port.port,
                        port.protocol.as_str(),
                        port.service_name,
                        now_str,
                    ],
                )?;
                summary.services_upserted += 1;
            }

            let details = serde_json::json!({
                "device_type": item.device_type.label(),
                "open_ports": obs.ports.len(),
            })
            .to_string();
            tx.execute(
                "INSERT INTO scan_history (device_id, scan_time, status, details)
                 VALUES (?1, ?2, ?3, ?4)",
                params![device_id, now_str, status, details],
            )?;
        }

        if let Some(cutoff) = stale_cutoff {
            summary.marked_inactive = tx.execute(
                "UPDATE devices SET is_active = 0, updated_at = ?2
                 WHERE last_seen < ?1 AND is_active = 1",
                params![cutoff.to_rfc3339(), now_str],
            )?;
        }

        tx.commit()?;
        Ok(summary)
    }

    /// Look up a device by its hardware address.
    pub fn device_by_mac(&self, hardware_address: &str) -> Result<Option<Device>> {
        let device = self
            .conn
            .query_row(
                "SELECT id, hardware_address, address, hostname, device_type, location_id,
                        last_seen, is_active, created_at, updated_at
                 FROM devices WHERE hardware_address = ?1",
                params![hardware_address],
                row_to_device,
            )
            .optional()?;
        Ok(device)
    }

    pub fn device_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// All service rows recorded for a device.
    pub fn services_for_device(&self, device_id: i64) -> Result<Vec<ServiceRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT device_id, port, protocol, service_name, is_active, last_checked
             FROM services WHERE device_id = ?1 ORDER BY port",
        )?;
        let services = stmt
            .query_map(params![device_id], row_to_service)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(services)
    }

    pub fn scan_history_count(&self, device_id: i64) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM scan_history WHERE device_id = ?1",
            params![device_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn row_to_device(row: &rusqlite::Row) -> std::result::Result<Device, rusqlite::Error> {
    let device_type: String = row.get(4)?;
    Ok(Device {
        id: row.get(0)?,
        hardware_address: row.get(1)?,
        address: row.get(2)?,
        hostname: row.get(3)?,
        device_type: DeviceType::from_label(&device_type),
        location_id: row.get(5)?,
        last_seen: parse_timestamp(row, 6)?,
        is_active: row.get::<_, i64>(7)? != 0,
        created_at: parse_timestamp(row, 8)?,
        updated_at: parse_timestamp(row, 9)?,
    })
}

fn row_to_service(row: &rusqlite::Row) -> std::result::Result<ServiceRecord, rusqlite::Error> {
    let protocol: String = row.get(2)?;
    Ok(ServiceRecord {
        device_id: row.get(0)?,
        port: row.get(1)?,
        protocol: Protocol::parse(&protocol),
        service_name: row.get(3)?,
        is_active: row.get::<_, i64>(4)? != 0,
        last_checked: parse_timestamp(row, 5)?,
    })
}

fn parse_timestamp(row: &rusqlite::Row, idx: usize) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    let raw: String = row.get(idx)?;
    chrono::DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanscope_core::types::{PortObservation, RawObservation};
    use std::net::{IpAddr, Ipv4Addr};

    fn observation(mac: &str, last_octet: u8) -> ClassifiedObservation {
        ClassifiedObservation {
            observation: RawObservation {
                address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, last_octet)),
                hardware_address: mac.to_string(),
                hostname: Some(format!("host-{last_octet}")),
                timestamp: Utc::now(),
                ports: vec![PortObservation {
                    port: 22,
                    protocol: Protocol::Tcp,
                    service_name: "ssh".to_string(),
                    version: None,
                }],
            },
            device_type: DeviceType::Server,
        }
    }

    #[test]
    fn first_observation_inserts_a_device() {
        let mut store = TopologyStore::open(":memory:").unwrap();
        let batch = vec![observation("AA:BB:CC:00:00:01", 10)];

        let summary = store.reconcile(&batch, Utc::now(), None, None).unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.services_upserted, 1);

        let device = store.device_by_mac("AA:BB:CC:00:00:01").unwrap().unwrap();
        assert_eq!(device.address, "192.168.1.10");
        assert_eq!(device.hostname.as_deref(), Some("host-10"));
        assert_eq!(device.device_type, DeviceType::Server);
        assert!(device.is_active);

        let services = store.services_for_device(device.id).unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].port, 22);
        assert_eq!(services[0].service_name, "ssh");
    }

    #[test]
    fn reobservation_updates_in_place() {
        let mut store = TopologyStore::open(":memory:").unwrap();
        store
            .reconcile(&[observation("AA:BB:CC:00:00:01", 10)], Utc::now(), None, None)
            .unwrap();
        let created = store
            .device_by_mac("AA:BB:CC:00:00:01")
            .unwrap()
            .unwrap()
            .created_at;

        let mut second = observation("AA:BB:CC:00:00:01", 11);
        second.device_type = DeviceType::Workstation;
        let summary = store.reconcile(&[second], Utc::now(), None, None).unwrap();
        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.updated, 1);

        assert_eq!(store.device_count().unwrap(), 1);
        let device = store.device_by_mac("AA:BB:CC:00:00:01").unwrap().unwrap();
        assert_eq!(device.address, "192.168.1.11");
        assert_eq!(device.device_type, DeviceType::Workstation);
        assert_eq!(device.created_at, created);
    }

    #[test]
    fn duplicate_mac_in_one_batch_yields_one_row_last_wins() {
        let mut store = TopologyStore::open(":memory:").unwrap();
        let batch = vec![
            observation("AA:BB:CC:00:00:01", 10),
            observation("AA:BB:CC:00:00:01", 20),
        ];

        store.reconcile(&batch, Utc::now(), None, None).unwrap();

        assert_eq!(store.device_count().unwrap(), 1);
        let device = store.device_by_mac("AA:BB:CC:00:00:01").unwrap().unwrap();
        assert_eq!(device.address, "192.168.1.20");
        assert_eq!(device.hostname.as_deref(), Some("host-20"));
    }

    #[test]
    fn hostname_update_is_last_writer_wins() {
        let mut store = TopologyStore::open(":memory:").unwrap();
        store
            .reconcile(&[observation("AA:BB:CC:00:00:01", 10)], Utc::now(), None, None)
            .unwrap();

        let mut anonymous = observation("AA:BB:CC:00:00:01", 10);
        anonymous.observation.hostname = None;
        store.reconcile(&[anonymous], Utc::now(), None, None).unwrap();

        let device = store.device_by_mac("AA:BB:CC:00:00:01").unwrap().unwrap();
        assert!(device.hostname.is_none());
    }

    #[test]
    fn service_rows_are_unique_per_device_port_protocol() {
        let mut store = TopologyStore::open(":memory:").unwrap();
        let mut item = observation("AA:BB:CC:00:00:01", 10);
        item.observation.ports.push(PortObservation {
            port: 80,
            protocol: Protocol::Tcp,
            service_name: "http".to_string(),
            version: None,
        });
        store.reconcile(&[item.clone()], Utc::now(), None, None).unwrap();

        // Same ports next cycle, one renamed service.
        item.observation.ports[1].service_name = "http-alt".to_string();
        store.reconcile(&[item], Utc::now(), None, None).unwrap();

        let device = store.device_by_mac("AA:BB:CC:00:00:01").unwrap().unwrap();
        let services = store.services_for_device(device.id).unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[1].port, 80);
        assert_eq!(services[1].service_name, "http-alt");
    }

    #[test]
    fn empty_batch_is_a_committed_noop() {
        let mut store = TopologyStore::open(":memory:").unwrap();
        store
            .reconcile(&[observation("AA:BB:CC:00:00:01", 10)], Utc::now(), None, None)
            .unwrap();
        let before = store.device_by_mac("AA:BB:CC:00:00:01").unwrap().unwrap();

        let summary = store.reconcile(&[], Utc::now(), None, None).unwrap();
        assert_eq!(summary, ReconcileSummary::default());

        let after = store.device_by_mac("AA:BB:CC:00:00:01").unwrap().unwrap();
        assert_eq!(after.updated_at, before.updated_at);
        assert!(after.is_active);
        assert_eq!(store.scan_history_count(after.id).unwrap(), 1);
    }

    #[test]
    fn failed_reconcile_rolls_back_completely() {
        let mut store = TopologyStore::open(":memory:").unwrap();
        // Sabotage the schema so the service upsert fails mid-transaction.
        store.conn.execute_batch("DROP TABLE services").unwrap();

        let result = store.reconcile(&[observation("AA:BB:CC:00:00:01", 10)], Utc::now(), None, None);
        assert!(result.is_err());

        // The device upsert ran before the failure but must not be visible.
        assert_eq!(store.device_count().unwrap(), 0);
    }

    #[test]
    fn stale_sweep_marks_unseen_devices_inactive() {
        let mut store = TopologyStore::open(":memory:").unwrap();
        let mut old = observation("AA:BB:CC:00:00:01", 10);
        old.observation.timestamp = Utc::now() - chrono::Duration::hours(2);
        store.reconcile(&[old], Utc::now(), None, None).unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let fresh = observation("AA:BB:CC:00:00:02", 11);
        let summary = store
            .reconcile(&[fresh], Utc::now(), None, Some(cutoff))
            .unwrap();
        assert_eq!(summary.marked_inactive, 1);

        let stale = store.device_by_mac("AA:BB:CC:00:00:01").unwrap().unwrap();
        assert!(!stale.is_active);
        let active = store.device_by_mac("AA:BB:CC:00:00:02").unwrap().unwrap();
        assert!(active.is_active);
    }

    #[test]
    fn sweep_disabled_leaves_unseen_devices_active() {
        let mut store = TopologyStore::open(":memory:").unwrap();
        let mut old = observation("AA:BB:CC:00:00:01", 10);
        old.observation.timestamp = Utc::now() - chrono::Duration::days(30);
        store.reconcile(&[old], Utc::now(), None, None).unwrap();

        store.reconcile(&[], Utc::now(), None, None).unwrap();

        let device = store.device_by_mac("AA:BB:CC:00:00:01").unwrap().unwrap();
        assert!(device.is_active);
    }

    #[test]
    fn ensure_location_is_idempotent() {
        let store = TopologyStore::open(":memory:").unwrap();
        let first = store.ensure_location("office", "192.168.1.0/24").unwrap();
        let second = store.ensure_location("office", "192.168.2.0/24").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn devices_carry_the_configured_location() {
        let mut store = TopologyStore::open(":memory:").unwrap();
        let location_id = store.ensure_location("office", "192.168.1.0/24").unwrap();
        store
            .reconcile(
                &[observation("AA:BB:CC:00:00:01", 10)],
                Utc::now(),
                Some(location_id),
                None,
            )
            .unwrap();

        let device = store.device_by_mac("AA:BB:CC:00:00:01").unwrap().unwrap();
        assert_eq!(device.location_id, Some(location_id));
    }

    #[test]
    fn scan_history_records_new_then_seen() {
        let mut store = TopologyStore::open(":memory:").unwrap();
        store
            .reconcile(&[observation("AA:BB:CC:00:00:01", 10)], Utc::now(), None, None)
            .unwrap();
        store
            .reconcile(&[observation("AA:BB:CC:00:00:01", 10)], Utc::now(), None, None)
            .unwrap();

        let device = store.device_by_mac("AA:BB:CC:00:00:01").unwrap().unwrap();
        assert_eq!(store.scan_history_count(device.id).unwrap(), 2);

        let statuses: Vec<String> = store
            .conn
            .prepare("SELECT status FROM scan_history WHERE device_id = ?1 ORDER BY id")
            .unwrap()
            .query_map(params![device.id], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(statuses, vec!["new".to_string(), "seen".to_string()]);
    }
}
