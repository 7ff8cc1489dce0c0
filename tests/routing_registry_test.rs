/*!
 * Integration tests for the routing registry
 *
 * Covers the ownership switch end to end against in-memory clusters and an
 * in-memory coordination service, plus version-conflict detection and the
 * compensation that runs when the origin cannot be blocked.
 */

use std::cell::Cell;
use std::time::Duration;

use tableshift::cluster::{
    ClusterError, FaultPoint, MemoryCluster, DENY_RECONFIG_ALL, ENV_DENY_CLIENT_REQUEST,
};
use tableshift::error::{ErrorCategory, ShiftError, EXIT_INCONSISTENT};
use tableshift::registry::coordinator::{
    Acl, CoordinationError, CoordinationResult, Coordinator, CreateMode, Stat,
};
use tableshift::registry::{MemoryCoordinator, RoutingEntry, RoutingRegistry};

const ROOT: &str = "/pegasus/meta_proxy/tables";
const TARGET_ADDRS: &str = "1.2.3.4:1,1.2.3.4:2";

fn open(coordinator: &MemoryCoordinator) -> RoutingRegistry {
    RoutingRegistry::open(coordinator, "zk1:2181", ROOT, Duration::from_secs(1)).unwrap()
}

fn clusters() -> (MemoryCluster, MemoryCluster) {
    let origin = MemoryCluster::named("A", "a1:34601,a2:34601", "zk1:2181");
    origin.add_table("orders", 1_650_000_000, 8);
    let target = MemoryCluster::named("B", TARGET_ADDRS, "zk1:2181");
    (origin, target)
}

fn path() -> String {
    format!("{ROOT}/orders")
}

#[test]
fn test_switch_owner_happy_path() {
    let coordinator = MemoryCoordinator::new();
    let registry = open(&coordinator);
    let (origin, target) = clusters();
    registry.put("orders", "A", "a1:34601,a2:34601").unwrap();

    let outcome = registry
        .switch_owner("orders", &origin, &target, TARGET_ADDRS)
        .unwrap();

    assert_eq!(outcome.previous, RoutingEntry::new("A", "a1:34601,a2:34601"));
    assert_eq!(
        coordinator.data(&path()).unwrap(),
        br#"{"cluster_name":"B","meta_addrs":"1.2.3.4:1,1.2.3.4:2"}"#.to_vec()
    );
    assert_eq!(
        origin
            .table("orders")
            .unwrap()
            .envs
            .get(ENV_DENY_CLIENT_REQUEST)
            .map(String::as_str),
        Some(DENY_RECONFIG_ALL)
    );
    registry.close().unwrap();
}

#[test]
fn test_ownership_mismatch_writes_nothing() {
    let coordinator = MemoryCoordinator::new();
    let registry = open(&coordinator);
    let (_, target) = clusters();
    let impostor = MemoryCluster::named("B", "b1:34601", "zk1:2181");
    impostor.add_table("orders", 1_650_000_000, 8);

    registry.put("orders", "A", "a1:34601").unwrap();
    let writes_before = coordinator.writes();

    let err = registry
        .switch_owner("orders", &impostor, &target, TARGET_ADDRS)
        .unwrap_err();

    match &err {
        ShiftError::OwnershipMismatch { recorded, local, .. } => {
            assert_eq!(recorded, "A");
            assert_eq!(local, "B");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_fatal());
    assert_eq!(err.category(), ErrorCategory::Ownership);
    assert_eq!(coordinator.writes(), writes_before);
    assert_eq!(impostor.calls(FaultPoint::UpdateTableEnv), 0);
    assert_eq!(target.calls(FaultPoint::QueryIdentity), 0);
}

#[test]
fn test_switch_without_entry_fails() {
    let coordinator = MemoryCoordinator::new();
    let registry = open(&coordinator);
    let (origin, target) = clusters();

    let err = registry
        .switch_owner("orders", &origin, &target, TARGET_ADDRS)
        .unwrap_err();
    assert!(matches!(err, ShiftError::RoutingNotFound { .. }));
    assert_eq!(coordinator.writes(), 0);
}

#[test]
fn test_target_identity_failure_writes_nothing() {
    let coordinator = MemoryCoordinator::new();
    let registry = open(&coordinator);
    let (origin, target) = clusters();
    registry.put("orders", "A", "a1:34601").unwrap();
    let writes_before = coordinator.writes();
    target.fail_next(FaultPoint::QueryIdentity, 1);

    assert!(registry
        .switch_owner("orders", &origin, &target, TARGET_ADDRS)
        .is_err());
    assert_eq!(coordinator.writes(), writes_before);
    assert_eq!(registry.get("orders").unwrap().cluster_name, "A");
}

#[test]
fn test_put_get_roundtrip_regardless_of_prior_node() {
    let coordinator = MemoryCoordinator::new();
    let registry = open(&coordinator);

    // Absent node
    registry.put("fresh", "A", "h1:1").unwrap();
    assert_eq!(registry.get("fresh").unwrap(), RoutingEntry::new("A", "h1:1"));

    // Node written earlier by someone else, in the spaced JSON form
    let spaced = format!("{ROOT}/legacy");
    coordinator.put_raw(&spaced, br#"{"cluster_name": "old", "meta_addrs": "o:1"}"#);
    assert_eq!(registry.get("legacy").unwrap(), RoutingEntry::new("old", "o:1"));
    registry.put("legacy", "C", "c1:1,c2:1").unwrap();
    assert_eq!(
        registry.get("legacy").unwrap(),
        RoutingEntry::new("C", "c1:1,c2:1")
    );
}

/// Session over a shared [`MemoryCoordinator`] that can simulate a rival
/// writer and failing writes
struct Scripted {
    inner: MemoryCoordinator,
    /// Entry a rival operator writes right after each of our reads
    rival_write: Option<&'static [u8]>,
    /// Successful `set` calls left before every further one fails
    sets_allowed: Cell<Option<u32>>,
}

impl Scripted {
    fn session(inner: &MemoryCoordinator) -> Self {
        Self {
            inner: inner.clone(),
            rival_write: None,
            sets_allowed: Cell::new(None),
        }
    }

    fn registry(self) -> RoutingRegistry {
        RoutingRegistry::with_session(Box::new(self), ROOT.to_string())
    }
}

impl Coordinator for Scripted {
    fn exists(&self, path: &str) -> CoordinationResult<Option<Stat>> {
        self.inner.exists(path)
    }

    fn get(&self, path: &str) -> CoordinationResult<(Vec<u8>, Stat)> {
        let result = self.inner.get(path);
        if let Some(data) = self.rival_write {
            self.inner.put_raw(path, data);
        }
        result
    }

    fn create(&self, path: &str, data: &[u8], mode: CreateMode, acl: &[Acl]) -> CoordinationResult<()> {
        self.inner.create(path, data, mode, acl)
    }

    fn set(&self, path: &str, data: &[u8], expected_version: i32) -> CoordinationResult<Stat> {
        if let Some(left) = self.sets_allowed.get() {
            if left == 0 {
                return Err(CoordinationError::ConnectionLoss {
                    addr: "zk1:2181".to_string(),
                    message: "session expired".to_string(),
                });
            }
            self.sets_allowed.set(Some(left - 1));
        }
        self.inner.set(path, data, expected_version)
    }

    fn close(&self) -> CoordinationResult<()> {
        self.inner.close()
    }
}

fn block_failure() -> ClusterError {
    ClusterError::Unavailable {
        operation: "update_app_envs".to_string(),
        message: "ERR_TIMEOUT".to_string(),
    }
}

#[test]
fn test_concurrent_writer_surfaces_conflict() {
    let coordinator = MemoryCoordinator::new();
    open(&coordinator).put("orders", "A", "a1:34601").unwrap();
    let (origin, target) = clusters();

    let racing = Scripted {
        rival_write: Some(br#"{"cluster_name":"A","meta_addrs":"moved:1"}"#),
        ..Scripted::session(&coordinator)
    }
    .registry();

    let err = racing
        .switch_owner("orders", &origin, &target, TARGET_ADDRS)
        .unwrap_err();
    assert!(matches!(err, ShiftError::VersionConflict { .. }));
    assert_eq!(err.category(), ErrorCategory::Consistency);

    // The rival's write survives and the origin was never blocked
    assert_eq!(
        RoutingEntry::decode(&path(), &coordinator.data(&path()).unwrap()).unwrap(),
        RoutingEntry::new("A", "moved:1")
    );
    assert_eq!(origin.calls(FaultPoint::UpdateTableEnv), 0);
}

#[test]
fn test_origin_block_failure_restores_entry() {
    let coordinator = MemoryCoordinator::new();
    let registry = open(&coordinator);
    let (origin, target) = clusters();
    registry.put("orders", "A", "a1:34601").unwrap();
    origin.inject_error(FaultPoint::UpdateTableEnv, block_failure());

    let err = registry
        .switch_owner("orders", &origin, &target, TARGET_ADDRS)
        .unwrap_err();

    assert!(matches!(
        err,
        ShiftError::SwitchIncomplete {
            rolled_back: true,
            ..
        }
    ));
    assert_eq!(registry.get("orders").unwrap(), RoutingEntry::new("A", "a1:34601"));
    assert_ne!(err.exit_code(), EXIT_INCONSISTENT);
}

#[test]
fn test_failed_rollback_requires_manual_repair() {
    let coordinator = MemoryCoordinator::new();
    open(&coordinator).put("orders", "A", "a1:34601").unwrap();
    let (origin, target) = clusters();
    origin.inject_error(FaultPoint::UpdateTableEnv, block_failure());

    // The switch write goes through, the compensating write does not
    let session = Scripted::session(&coordinator);
    session.sets_allowed.set(Some(1));
    let registry = session.registry();

    let err = registry
        .switch_owner("orders", &origin, &target, TARGET_ADDRS)
        .unwrap_err();

    assert!(matches!(
        err,
        ShiftError::SwitchIncomplete {
            rolled_back: false,
            ..
        }
    ));
    assert_eq!(err.exit_code(), EXIT_INCONSISTENT);
    assert!(err.to_string().contains("manual repair required"));
    assert_eq!(registry.get("orders").unwrap().cluster_name, "B");
}

#[test]
fn test_failed_write_after_create_leaves_readable_entry() {
    let coordinator = MemoryCoordinator::new();
    let session = Scripted::session(&coordinator);
    session.sets_allowed.set(Some(0));
    let registry = session.registry();

    let err = registry.put("orders", "A", "a:1").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Coordination);

    // The node exists and already carries the entry
    assert_eq!(
        coordinator.data(&path()).unwrap(),
        br#"{"cluster_name":"A","meta_addrs":"a:1"}"#.to_vec()
    );
    assert_eq!(registry.get("orders").unwrap(), RoutingEntry::new("A", "a:1"));
}
