//! StateStore: redb-backed resource store for Moorage.
//!
//! Provides conditional create/update operations over services, service
//! attributes, members, devices, static IPs, and config files. All values
//! are JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableError};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe resource store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.create_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.create_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    pub fn create_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in ALL_TABLES {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Whether every table exists and is readable.
    pub fn tables_ready(&self) -> StateResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        for table in ALL_TABLES {
            match txn.open_table(table) {
                Ok(_) => {}
                Err(TableError::TableDoesNotExist(_)) => return Ok(false),
                Err(e) => return Err(StateError::Table(e.to_string())),
            }
        }
        Ok(true)
    }

    /// Drop every table. Returns how many existed.
    pub fn delete_tables(&self) -> StateResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut dropped = 0;
        for table in ALL_TABLES {
            if txn.delete_table(table).map_err(map_err!(Table))? {
                dropped += 1;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(dropped, "tables deleted");
        Ok(dropped)
    }

    // ── Generic record operations ──────────────────────────────────

    /// Insert a record whose key must not exist yet.
    fn create<R: Record>(&self, record: &R) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Conflict(format!("{} {key} already exists", R::KIND)));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(kind = R::KIND, %key, "record created");
        Ok(())
    }

    fn get<R: Record>(&self, key: &str) -> StateResult<Option<R>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: R =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Replace `old` with `new` only if the stored value still equals `old`.
    fn update<R: Record>(&self, old: &R, new: &R) -> StateResult<()> {
        let key = new.table_key();
        if old.table_key() != key {
            return Err(StateError::Write(format!(
                "{} update changes key {} to {key}",
                R::KIND,
                old.table_key()
            )));
        }
        let value = serde_json::to_vec(new).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
            let current: R = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("{} {key}", R::KIND))),
            };
            if &current != old {
                return Err(StateError::Conflict(format!("{} {key} was modified", R::KIND)));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(kind = R::KIND, %key, "record updated");
        Ok(())
    }

    /// Delete by key. Returns true if it existed.
    fn delete<R: Record>(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(kind = R::KIND, %key, existed, "record deleted");
        Ok(existed)
    }

    /// All records whose key starts with `prefix`, in key order.
    fn list_prefix<R: Record>(&self, prefix: &str) -> StateResult<Vec<R>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(prefix) {
                break;
            }
            let record: R =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    // ── Services ───────────────────────────────────────────────────

    pub fn create_service(&self, service: &Service) -> StateResult<()> {
        self.create(service)
    }

    pub fn get_service(&self, cluster: &str, name: &str) -> StateResult<Option<Service>> {
        self.get(&Service::key(cluster, name))
    }

    /// List all services in a cluster.
    pub fn list_services(&self, cluster: &str) -> StateResult<Vec<Service>> {
        self.list_prefix(&format!("{cluster}/"))
    }

    /// Distinct cluster names that own at least one service, sorted.
    pub fn list_clusters(&self) -> StateResult<Vec<String>> {
        let services: Vec<Service> = self.list_prefix("")?;
        let mut clusters: Vec<String> = services.into_iter().map(|s| s.cluster).collect();
        clusters.sort();
        clusters.dedup();
        Ok(clusters)
    }

    pub fn delete_service(&self, cluster: &str, name: &str) -> StateResult<bool> {
        self.delete::<Service>(&Service::key(cluster, name))
    }

    // ── Service attributes ─────────────────────────────────────────

    pub fn create_service_attr(&self, attr: &ServiceAttr) -> StateResult<()> {
        self.create(attr)
    }

    pub fn get_service_attr(&self, service_uuid: &str) -> StateResult<Option<ServiceAttr>> {
        self.get(service_uuid)
    }

    pub fn update_service_attr(&self, old: &ServiceAttr, new: &ServiceAttr) -> StateResult<()> {
        self.update(old, new)
    }

    pub fn delete_service_attr(&self, service_uuid: &str) -> StateResult<bool> {
        self.delete::<ServiceAttr>(service_uuid)
    }

    // ── Service members ────────────────────────────────────────────

    pub fn create_service_member(&self, member: &ServiceMember) -> StateResult<()> {
        self.create(member)
    }

    pub fn get_service_member(
        &self,
        service_uuid: &str,
        member_name: &str,
    ) -> StateResult<Option<ServiceMember>> {
        self.get(&ServiceMember::key(service_uuid, member_name))
    }

    pub fn list_service_members(&self, service_uuid: &str) -> StateResult<Vec<ServiceMember>> {
        self.list_prefix(&format!("{service_uuid}:"))
    }

    pub fn update_service_member(
        &self,
        old: &ServiceMember,
        new: &ServiceMember,
    ) -> StateResult<()> {
        self.update(old, new)
    }

    pub fn delete_service_member(&self, service_uuid: &str, member_name: &str) -> StateResult<bool> {
        self.delete::<ServiceMember>(&ServiceMember::key(service_uuid, member_name))
    }

    // ── Devices ────────────────────────────────────────────────────

    pub fn create_device(&self, device: &Device) -> StateResult<()> {
        self.create(device)
    }

    pub fn get_device(&self, cluster: &str, device_name: &str) -> StateResult<Option<Device>> {
        self.get(&Device::key(cluster, device_name))
    }

    /// List all devices in a cluster (key order, not device order).
    pub fn list_devices(&self, cluster: &str) -> StateResult<Vec<Device>> {
        self.list_prefix(&format!("{cluster}:"))
    }

    pub fn delete_device(&self, cluster: &str, device_name: &str) -> StateResult<bool> {
        self.delete::<Device>(&Device::key(cluster, device_name))
    }

    // ── Static IPs ─────────────────────────────────────────────────

    pub fn create_static_ip(&self, ip: &ServiceStaticIp) -> StateResult<()> {
        self.create(ip)
    }

    pub fn get_static_ip(&self, ip: &str) -> StateResult<Option<ServiceStaticIp>> {
        self.get(ip)
    }

    pub fn update_static_ip(&self, old: &ServiceStaticIp, new: &ServiceStaticIp) -> StateResult<()> {
        self.update(old, new)
    }

    pub fn delete_static_ip(&self, ip: &str) -> StateResult<bool> {
        self.delete::<ServiceStaticIp>(ip)
    }

    /// All static IPs owned by a service.
    pub fn list_static_ips_for_service(
        &self,
        service_uuid: &str,
    ) -> StateResult<Vec<ServiceStaticIp>> {
        let all: Vec<ServiceStaticIp> = self.list_prefix("")?;
        Ok(all
            .into_iter()
            .filter(|ip| ip.spec.service_uuid == service_uuid)
            .collect())
    }

    // ── Config files ───────────────────────────────────────────────

    pub fn create_config_file(&self, file: &ConfigFile) -> StateResult<()> {
        self.create(file)
    }

    pub fn get_config_file(
        &self,
        service_uuid: &str,
        file_id: &str,
    ) -> StateResult<Option<ConfigFile>> {
        self.get(&ConfigFile::key(service_uuid, file_id))
    }

    pub fn delete_config_file(&self, service_uuid: &str, file_id: &str) -> StateResult<bool> {
        self.delete::<ConfigFile>(&ConfigFile::key(service_uuid, file_id))
    }
}
