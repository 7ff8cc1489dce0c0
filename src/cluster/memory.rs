//! In-memory cluster implementation
//!
//! Holds tables, their environments and their records in process. Tests use
//! it to script transient failures at any call site with
//! [`MemoryCluster::fail_next`] and to inspect what a migration wrote.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;

use super::{
    ClusterClient, ClusterError, ClusterIdentity, ClusterResult, Record, ScanOptions, Scanner,
    TableHandle, TableInfo, TableStatus,
};

/// Call sites where faults can be injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    ListTables,
    CreateTable,
    QueryIdentity,
    UpdateTableEnv,
    OpenTable,
    GetScanners,
    ScanNext,
    Set,
}

type Partition = BTreeMap<(Vec<u8>, Vec<u8>), Vec<u8>>;

#[derive(Debug, Clone)]
pub(crate) struct StoredTable {
    pub(crate) info: TableInfo,
    pub(crate) partitions: Vec<Partition>,
}

impl StoredTable {
    pub(crate) fn new(info: TableInfo) -> Self {
        let partitions = vec![Partition::new(); info.partition_count.max(1) as usize];
        Self { info, partitions }
    }

    pub(crate) fn insert(&mut self, hash_key: &[u8], sort_key: &[u8], value: &[u8]) {
        let index = partition_index(hash_key, self.partitions.len());
        self.partitions[index].insert((hash_key.to_vec(), sort_key.to_vec()), value.to_vec());
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.partitions.iter().flat_map(|partition| {
            partition.iter().map(|((hash_key, sort_key), value)| Record {
                hash_key: hash_key.clone(),
                sort_key: sort_key.clone(),
                value: value.clone(),
            })
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ClusterState {
    pub(crate) identity: ClusterIdentity,
    pub(crate) next_app_id: i32,
    /// Creation timestamp handed to new tables; `None` uses the wall clock
    pub(crate) clock: Option<i64>,
    pub(crate) tables: BTreeMap<String, StoredTable>,
}

#[derive(Debug, Default)]
struct Faults {
    pending: HashMap<FaultPoint, VecDeque<ClusterError>>,
    calls: HashMap<FaultPoint, u64>,
}

#[derive(Debug)]
struct Inner {
    state: RwLock<ClusterState>,
    faults: Mutex<Faults>,
}

/// In-memory cluster with scripted failures
///
/// Clones share state, so a test can keep a handle for inspection while the
/// code under test owns another.
#[derive(Debug, Clone)]
pub struct MemoryCluster {
    inner: Arc<Inner>,
}

impl MemoryCluster {
    /// Create an empty cluster with the given identity
    pub fn new(identity: ClusterIdentity) -> Self {
        Self::from_state(ClusterState {
            identity,
            next_app_id: 1,
            clock: None,
            tables: BTreeMap::new(),
        })
    }

    /// Shorthand for [`MemoryCluster::new`]
    pub fn named(cluster_name: &str, meta_servers: &str, zookeeper_hosts: &str) -> Self {
        Self::new(ClusterIdentity {
            cluster_name: cluster_name.to_string(),
            meta_servers: meta_servers.to_string(),
            zookeeper_hosts: zookeeper_hosts.to_string(),
        })
    }

    pub(crate) fn from_state(state: ClusterState) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                faults: Mutex::new(Faults::default()),
            }),
        }
    }

    pub(crate) fn snapshot(&self) -> ClusterState {
        self.read().clone()
    }

    /// Pin the creation timestamp given to tables created from now on
    pub fn set_clock(&self, created_at: i64) {
        self.write().clock = Some(created_at);
    }

    /// Add a table directly, bypassing faults
    pub fn add_table(&self, name: &str, created_at: i64, partition_count: u32) {
        let mut state = self.write();
        let app_id = state.next_app_id;
        state.next_app_id += 1;
        state.tables.insert(
            name.to_string(),
            StoredTable::new(TableInfo {
                name: name.to_string(),
                app_id,
                status: TableStatus::Available,
                created_at,
                partition_count,
                envs: BTreeMap::new(),
            }),
        );
    }

    /// Change a table's status
    pub fn set_table_status(&self, name: &str, status: TableStatus) {
        if let Some(table) = self.write().tables.get_mut(name) {
            table.info.status = status;
        }
    }

    /// Write a record directly, bypassing faults. Returns `false` if the table is missing.
    pub fn insert_record(&self, table: &str, hash_key: &[u8], sort_key: &[u8], value: &[u8]) -> bool {
        match self.write().tables.get_mut(table) {
            Some(stored) => {
                stored.insert(hash_key, sort_key, value);
                true
            }
            None => false,
        }
    }

    /// Every record of a table, or `None` if the table is missing
    pub fn records(&self, table: &str) -> Option<BTreeSet<Record>> {
        self.read()
            .tables
            .get(table)
            .map(|stored| stored.records().collect())
    }

    /// Table metadata, or `None` if the table is missing
    pub fn table(&self, name: &str) -> Option<TableInfo> {
        self.read().tables.get(name).map(|stored| stored.info.clone())
    }

    /// Names of every table, in name order
    pub fn table_names(&self) -> Vec<String> {
        self.read().tables.keys().cloned().collect()
    }

    /// Make the next `count` calls at `point` fail with a transient error
    pub fn fail_next(&self, point: FaultPoint, count: usize) {
        for n in 0..count {
            self.inject_error(
                point,
                ClusterError::Unavailable {
                    operation: format!("{point:?}"),
                    message: format!("injected fault #{}", n + 1),
                },
            );
        }
    }

    /// Make the next call at `point` fail with `error`
    pub fn inject_error(&self, point: FaultPoint, error: ClusterError) {
        self.faults()
            .pending
            .entry(point)
            .or_default()
            .push_back(error);
    }

    /// How many calls reached `point`, including failed ones
    pub fn calls(&self, point: FaultPoint) -> u64 {
        self.faults().calls.get(&point).copied().unwrap_or(0)
    }

    fn enter(&self, point: FaultPoint) -> ClusterResult<()> {
        let mut faults = self.faults();
        *faults.calls.entry(point).or_insert(0) += 1;
        match faults.pending.get_mut(&point).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ClusterState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ClusterState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.inner.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClusterClient for MemoryCluster {
    fn list_tables(&self, status: TableStatus) -> ClusterResult<Vec<TableInfo>> {
        self.enter(FaultPoint::ListTables)?;
        let mut tables: Vec<TableInfo> = self
            .read()
            .tables
            .values()
            .filter(|stored| status.matches(stored.info.status))
            .map(|stored| stored.info.clone())
            .collect();
        tables.sort_by_key(|info| info.app_id);
        Ok(tables)
    }

    fn create_table(
        &self,
        name: &str,
        envs: &BTreeMap<String, String>,
        partition_count: u32,
    ) -> ClusterResult<()> {
        self.enter(FaultPoint::CreateTable)?;
        if name.is_empty() {
            return Err(ClusterError::InvalidArgument("table name is empty".to_string()));
        }
        if partition_count == 0 {
            return Err(ClusterError::InvalidArgument(format!(
                "table '{name}' needs at least one partition"
            )));
        }

        let mut state = self.write();
        if state.tables.contains_key(name) {
            return Err(ClusterError::AlreadyExists {
                table: name.to_string(),
            });
        }
        let app_id = state.next_app_id;
        state.next_app_id += 1;
        let created_at = state.clock.unwrap_or_else(|| Utc::now().timestamp());
        state.tables.insert(
            name.to_string(),
            StoredTable::new(TableInfo {
                name: name.to_string(),
                app_id,
                status: TableStatus::Available,
                created_at,
                partition_count,
                envs: envs.clone(),
            }),
        );
        Ok(())
    }

    fn query_identity(&self) -> ClusterResult<ClusterIdentity> {
        self.enter(FaultPoint::QueryIdentity)?;
        Ok(self.read().identity.clone())
    }

    fn update_table_env(&self, name: &str, envs: &BTreeMap<String, String>) -> ClusterResult<()> {
        self.enter(FaultPoint::UpdateTableEnv)?;
        let mut state = self.write();
        let stored = state
            .tables
            .get_mut(name)
            .ok_or_else(|| ClusterError::TableNotFound {
                table: name.to_string(),
            })?;
        stored
            .info
            .envs
            .extend(envs.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn open_table(&self, name: &str) -> ClusterResult<Box<dyn TableHandle>> {
        self.enter(FaultPoint::OpenTable)?;
        match self.read().tables.get(name) {
            Some(stored) if stored.info.status == TableStatus::Available => {}
            _ => {
                return Err(ClusterError::TableNotFound {
                    table: name.to_string(),
                })
            }
        }
        Ok(Box::new(MemoryTableHandle {
            cluster: self.clone(),
            name: name.to_string(),
        }))
    }
}

struct MemoryTableHandle {
    cluster: MemoryCluster,
    name: String,
}

impl TableHandle for MemoryTableHandle {
    fn table_name(&self) -> &str {
        &self.name
    }

    fn unordered_scanners(
        &self,
        count: usize,
        _options: &ScanOptions,
    ) -> ClusterResult<Vec<Box<dyn Scanner>>> {
        self.cluster.enter(FaultPoint::GetScanners)?;
        let state = self.cluster.read();
        let stored = state
            .tables
            .get(&self.name)
            .ok_or_else(|| ClusterError::TableNotFound {
                table: self.name.clone(),
            })?;

        // Partitions are dealt round-robin so every scanner gets a share
        let scanner_count = count.clamp(1, stored.partitions.len());
        let mut pending: Vec<VecDeque<Record>> = vec![VecDeque::new(); scanner_count];
        for (index, partition) in stored.partitions.iter().enumerate() {
            pending[index % scanner_count].extend(partition.iter().map(
                |((hash_key, sort_key), value)| Record {
                    hash_key: hash_key.clone(),
                    sort_key: sort_key.clone(),
                    value: value.clone(),
                },
            ));
        }

        Ok(pending
            .into_iter()
            .map(|records| {
                Box::new(MemoryScanner {
                    cluster: self.cluster.clone(),
                    records,
                }) as Box<dyn Scanner>
            })
            .collect())
    }

    fn set(&self, hash_key: &[u8], sort_key: &[u8], value: &[u8]) -> ClusterResult<()> {
        self.cluster.enter(FaultPoint::Set)?;
        let mut state = self.cluster.write();
        let stored = state
            .tables
            .get_mut(&self.name)
            .ok_or_else(|| ClusterError::TableNotFound {
                table: self.name.clone(),
            })?;
        stored.insert(hash_key, sort_key, value);
        Ok(())
    }
}

/// Scanner over a point-in-time copy of its partitions
struct MemoryScanner {
    cluster: MemoryCluster,
    records: VecDeque<Record>,
}

impl Scanner for MemoryScanner {
    fn next_record(&mut self) -> ClusterResult<Option<Record>> {
        // A failed call must not consume the record
        self.cluster.enter(FaultPoint::ScanNext)?;
        Ok(self.records.pop_front())
    }
}

/// Partition that owns `hash_key` among `partition_count` partitions
pub(crate) fn partition_index(hash_key: &[u8], partition_count: usize) -> usize {
    let digest = blake3::hash(hash_key);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    (u64::from_le_bytes(prefix) % partition_count.max(1) as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> MemoryCluster {
        MemoryCluster::named("onebox", "127.0.0.1:34601", "127.0.0.1:2181")
    }

    fn drain(scanner: &mut Box<dyn Scanner>) -> Vec<Record> {
        let mut out = Vec::new();
        while let Some(record) = scanner.next_record().unwrap() {
            out.push(record);
        }
        out
    }

    #[test]
    fn test_create_and_list() {
        let cluster = cluster();
        cluster.set_clock(1_650_000_000);
        cluster.create_table("t1", &BTreeMap::new(), 4).unwrap();
        cluster.create_table("t2", &BTreeMap::new(), 8).unwrap();

        let tables = cluster.list_tables(TableStatus::Available).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "t1");
        assert_eq!(tables[0].created_at, 1_650_000_000);
        assert_eq!(tables[1].partition_count, 8);
    }

    #[test]
    fn test_create_existing_table() {
        let cluster = cluster();
        cluster.add_table("t1", 0, 4);
        let err = cluster.create_table("t1", &BTreeMap::new(), 4).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_list_filters_status() {
        let cluster = cluster();
        cluster.add_table("live", 0, 1);
        cluster.add_table("gone", 0, 1);
        cluster.set_table_status("gone", TableStatus::Dropped);

        let available = cluster.list_tables(TableStatus::Available).unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].name, "live");
        assert_eq!(cluster.list_tables(TableStatus::All).unwrap().len(), 2);
    }

    #[test]
    fn test_scanners_cover_every_record_once() {
        let cluster = cluster();
        cluster.add_table("t", 0, 8);
        for i in 0..100u32 {
            let key = format!("user-{i}");
            cluster.insert_record("t", key.as_bytes(), b"profile", &i.to_le_bytes());
        }

        let table = cluster.open_table("t").unwrap();
        let mut scanners = table.unordered_scanners(3, &ScanOptions::default()).unwrap();
        assert_eq!(scanners.len(), 3);

        let mut seen = BTreeSet::new();
        for scanner in scanners.iter_mut() {
            for record in drain(scanner) {
                assert!(seen.insert(record), "record scanned twice");
            }
        }
        assert_eq!(seen, cluster.records("t").unwrap());
    }

    #[test]
    fn test_scanner_count_is_bounded_by_partitions() {
        let cluster = cluster();
        cluster.add_table("t", 0, 2);
        let table = cluster.open_table("t").unwrap();
        let scanners = table.unordered_scanners(16, &ScanOptions::default()).unwrap();
        assert_eq!(scanners.len(), 2);
    }

    #[test]
    fn test_failed_next_does_not_consume() {
        let cluster = cluster();
        cluster.add_table("t", 0, 1);
        cluster.insert_record("t", b"k", b"s", b"v");

        let table = cluster.open_table("t").unwrap();
        let mut scanners = table.unordered_scanners(1, &ScanOptions::default()).unwrap();
        cluster.fail_next(FaultPoint::ScanNext, 1);

        assert!(scanners[0].next_record().is_err());
        let record = scanners[0].next_record().unwrap().unwrap();
        assert_eq!(record.value, b"v".to_vec());
        assert!(scanners[0].next_record().unwrap().is_none());
        assert_eq!(cluster.calls(FaultPoint::ScanNext), 3);
    }

    #[test]
    fn test_update_env_merges() {
        let cluster = cluster();
        cluster.add_table("t", 0, 1);
        let mut envs = BTreeMap::new();
        envs.insert("a".to_string(), "1".to_string());
        cluster.update_table_env("t", &envs).unwrap();
        envs.clear();
        envs.insert("b".to_string(), "2".to_string());
        cluster.update_table_env("t", &envs).unwrap();

        let info = cluster.table("t").unwrap();
        assert_eq!(info.envs.len(), 2);
        assert!(cluster.update_table_env("missing", &envs).is_err());
    }

    #[test]
    fn test_open_missing_table() {
        let cluster = cluster();
        assert!(matches!(
            cluster.open_table("nope"),
            Err(ClusterError::TableNotFound { .. })
        ));
    }

    #[test]
    fn test_partition_index_is_stable() {
        assert_eq!(partition_index(b"abc", 4), partition_index(b"abc", 4));
        assert!(partition_index(b"abc", 4) < 4);
        assert_eq!(partition_index(b"abc", 0), 0);
    }
}
