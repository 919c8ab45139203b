//! Conformance suite run identically against every backend.

use std::collections::BTreeSet;
use std::sync::{Arc, Once};
use std::thread;
use std::time::Instant;

use proptest::prelude::*;
use tempfile::TempDir;

use taco_core::{LockInfo, UnitId};
use taco_storage::versions::content_hash;
use taco_storage::{
    BlobStore, FileStore, MemoryStore, OpContext, SqliteObjectClient, StorageError, UnitStore,
};

const MAX_VERSIONS: usize = 3;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// A store plus whatever must outlive it.
struct Harness {
    store: Arc<dyn UnitStore>,
    _dir: Option<TempDir>,
}

fn memory() -> Harness {
    Harness {
        store: Arc::new(MemoryStore::with_max_versions(MAX_VERSIONS)),
        _dir: None,
    }
}

fn file() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap().with_max_versions(MAX_VERSIONS);
    Harness {
        store: Arc::new(store),
        _dir: Some(dir),
    }
}

fn blob() -> Harness {
    let store = BlobStore::new(SqliteObjectClient::in_memory().unwrap())
        .with_prefix("states")
        .with_max_versions(MAX_VERSIONS);
    Harness {
        store: Arc::new(store),
        _dir: None,
    }
}

fn id(raw: &str) -> UnitId {
    UnitId::parse(raw).unwrap()
}

fn bg() -> OpContext {
    OpContext::background()
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

fn create_then_get(store: &dyn UnitStore) {
    let meta = store.create(&bg(), &id("prod/vpc")).unwrap();
    assert_eq!(meta.id.as_str(), "prod/vpc");
    assert_eq!(meta.size, 0);
    assert!(!meta.locked);
    assert!(meta.lock.is_none());

    let got = store.get(&bg(), &id("prod/vpc")).unwrap();
    assert_eq!(got.size, 0);
    assert!(!got.locked);
    assert!(store.download(&bg(), &id("prod/vpc")).unwrap().is_empty());
}

fn create_duplicate_fails(store: &dyn UnitStore) {
    store.create(&bg(), &id("dup")).unwrap();
    let err = store.create(&bg(), &id("dup")).unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists(_)), "got {err:?}");
}

fn ids_are_normalized(store: &dyn UnitStore) {
    store.create(&bg(), &id("/org//team/app/")).unwrap();
    assert!(store.get(&bg(), &id("org/team/app")).is_ok());
    assert!(store.create(&bg(), &id("org/team/app")).is_err());
}

fn missing_unit_is_not_found(store: &dyn UnitStore) {
    let ghost = id("ghost");
    let ctx = bg();
    assert!(store.get(&ctx, &ghost).unwrap_err().is_not_found());
    assert!(store.download(&ctx, &ghost).unwrap_err().is_not_found());
    assert!(store.upload(&ctx, &ghost, b"x", None).unwrap_err().is_not_found());
    assert!(store.delete(&ctx, &ghost).unwrap_err().is_not_found());
    assert!(store
        .lock(&ctx, &ghost, &LockInfo::new("t", "me"))
        .unwrap_err()
        .is_not_found());
    assert!(store.unlock(&ctx, &ghost, "t").unwrap_err().is_not_found());
    assert!(store.get_lock(&ctx, &ghost).unwrap_err().is_not_found());
    assert!(store.list_versions(&ctx, &ghost).unwrap_err().is_not_found());
    assert!(store.download_blob(&ctx, &ghost).unwrap_err().is_not_found());
}

fn upload_replaces_content(store: &dyn UnitStore) {
    let unit = id("net");
    store.create(&bg(), &unit).unwrap();
    store.upload(&bg(), &unit, br#"{"serial":1}"#, None).unwrap();
    assert_eq!(store.download(&bg(), &unit).unwrap(), br#"{"serial":1}"#);
    assert_eq!(store.get(&bg(), &unit).unwrap().size, 12);

    store.upload(&bg(), &unit, b"{}", None).unwrap();
    assert_eq!(store.download(&bg(), &unit).unwrap(), b"{}");
    assert_eq!(store.get(&bg(), &unit).unwrap().size, 2);
}

fn list_filters_by_prefix_sorted(store: &dyn UnitStore) {
    for raw in ["prod/b", "dev/a", "prod/a", "production"] {
        store.create(&bg(), &id(raw)).unwrap();
    }
    let prod: Vec<String> = store
        .list(&bg(), "prod/")
        .unwrap()
        .into_iter()
        .map(|m| m.id.to_string())
        .collect();
    assert_eq!(prod, ["prod/a", "prod/b"]);

    let all: Vec<String> = store
        .list(&bg(), "")
        .unwrap()
        .into_iter()
        .map(|m| m.id.to_string())
        .collect();
    assert_eq!(all, ["dev/a", "prod/a", "prod/b", "production"]);
}

fn list_excludes_standalone_blobs(store: &dyn UnitStore) {
    store.create(&bg(), &id("real")).unwrap();
    store.upload_blob(&bg(), &id("bookkeeping"), b"chunk").unwrap();
    let listed = store.list(&bg(), "").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id.as_str(), "real");
    assert!(store.get(&bg(), &id("bookkeeping")).unwrap_err().is_not_found());
}

fn reserved_looking_ids_are_ordinary_units(store: &dyn UnitStore) {
    let team = id("__blobs/team");
    store.create(&bg(), &team).unwrap();
    store.create(&bg(), &id("plain")).unwrap();
    store.upload(&bg(), &team, b"real-state", None).unwrap();
    store.lock(&bg(), &team, &LockInfo::new("tok", "ci")).unwrap();

    // Standalone blobs whose IDs mirror the unit's object layout.
    store.upload_blob(&bg(), &id("team/terraform.tfstate"), b"log-chunk").unwrap();
    store.upload_blob(&bg(), &id("ghost/terraform.tfstate"), b"x").unwrap();

    let listed: Vec<String> = store
        .list(&bg(), "")
        .unwrap()
        .into_iter()
        .map(|m| m.id.to_string())
        .collect();
    assert_eq!(listed, ["__blobs/team", "plain"]);
    assert_eq!(store.download(&bg(), &team).unwrap(), b"real-state");
    assert_eq!(store.get_lock(&bg(), &team).unwrap().unwrap().id, "tok");
    assert!(store.get(&bg(), &id("__blobs/ghost")).unwrap_err().is_not_found());
    assert_eq!(
        store.download_blob(&bg(), &id("team/terraform.tfstate")).unwrap(),
        b"log-chunk"
    );
}

fn list_lock_state_matches_capabilities(store: &dyn UnitStore) {
    store.create(&bg(), &id("a")).unwrap();
    store.create(&bg(), &id("b")).unwrap();
    store.lock(&bg(), &id("a"), &LockInfo::new("tok", "ci")).unwrap();

    let listed = store.list(&bg(), "").unwrap();
    if store.capabilities().list_reports_locks {
        assert!(listed[0].locked);
        assert_eq!(listed[0].lock.as_ref().map(|l| l.id.as_str()), Some("tok"));
    } else {
        assert!(listed.iter().all(|m| !m.locked));
    }
    assert!(!listed[1].locked);

    // Freshness: an unlock is visible to the very next list.
    store.unlock(&bg(), &id("a"), "tok").unwrap();
    assert!(store.list(&bg(), "").unwrap().iter().all(|m| !m.locked));
}

fn delete_removes_everything(store: &dyn UnitStore) {
    let unit = id("doomed");
    store.create(&bg(), &unit).unwrap();
    store.upload(&bg(), &unit, b"v1", None).unwrap();
    store.lock(&bg(), &unit, &LockInfo::new("tok", "ci")).unwrap();

    // A locked unit can still be deleted.
    store.delete(&bg(), &unit).unwrap();
    assert!(store.get(&bg(), &unit).unwrap_err().is_not_found());

    let meta = store.create(&bg(), &unit).unwrap();
    assert!(!meta.locked);
    assert!(store.get_lock(&bg(), &unit).unwrap().is_none());
    assert!(store.list_versions(&bg(), &unit).unwrap().is_empty());
    assert!(store.download(&bg(), &unit).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Listing over generated unit sets
// ---------------------------------------------------------------------------

const SEGMENTS: &[&str] = &[
    "a",
    "ab",
    "b",
    "_x",
    "__blobs",
    "versions",
    "terraform.tfstate",
    "blob.bin",
];

fn arb_raw_id() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(SEGMENTS), 1..4).prop_map(|parts| parts.join("/"))
}

fn arb_prefix() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[ab_/]{1,4}",
        arb_raw_id(),
        arb_raw_id().prop_map(|raw| format!("{raw}/")),
    ]
}

/// Creates `units`, writes standalone blobs under `blobs`, then compares
/// `list(prefix)` with a plain string filter over the created IDs.
fn list_matches_reference(
    store: &dyn UnitStore,
    units: &[String],
    blobs: &[String],
    prefix: &str,
) -> Result<(), TestCaseError> {
    let mut created = BTreeSet::new();
    for raw in units {
        let unit = id(raw);
        if created.insert(unit.to_string()) {
            store.create(&bg(), &unit).unwrap();
        }
    }
    for raw in blobs {
        store.upload_blob(&bg(), &id(raw), b"chunk").unwrap();
    }

    let listed: Vec<String> = store
        .list(&bg(), prefix)
        .unwrap()
        .into_iter()
        .map(|m| m.id.to_string())
        .collect();
    let expected: Vec<String> = created
        .into_iter()
        .filter(|unit| unit.starts_with(prefix))
        .collect();
    prop_assert_eq!(listed, expected);
    Ok(())
}

// ---------------------------------------------------------------------------
// Locking
// ---------------------------------------------------------------------------

fn lock_conflict_reports_holder(store: &dyn UnitStore) {
    let unit = id("locked");
    store.create(&bg(), &unit).unwrap();
    store.lock(&bg(), &unit, &LockInfo::new("first", "alice")).unwrap();

    let err = store
        .lock(&bg(), &unit, &LockInfo::new("second", "bob"))
        .unwrap_err();
    assert!(err.is_lock_conflict());
    let holder = err.lock_holder().unwrap();
    assert_eq!(holder.id, "first");
    assert_eq!(holder.who, "alice");
    assert!(err.to_string().contains("alice"));

    let meta = store.get(&bg(), &unit).unwrap();
    assert!(meta.locked);
    assert_eq!(meta.lock.unwrap().id, "first");
    assert_eq!(store.get_lock(&bg(), &unit).unwrap().unwrap().who, "alice");
}

fn upload_requires_matching_token(store: &dyn UnitStore) {
    let unit = id("guarded");
    store.create(&bg(), &unit).unwrap();
    store.upload(&bg(), &unit, b"before", None).unwrap();
    store.lock(&bg(), &unit, &LockInfo::new("tok", "ci")).unwrap();

    for token in [None, Some(""), Some("wrong")] {
        let err = store.upload(&bg(), &unit, b"evil", token).unwrap_err();
        assert!(err.is_lock_conflict(), "token {token:?} gave {err:?}");
    }
    assert_eq!(store.download(&bg(), &unit).unwrap(), b"before");

    store.upload(&bg(), &unit, b"after", Some("tok")).unwrap();
    assert_eq!(store.download(&bg(), &unit).unwrap(), b"after");
    // Upload never releases the lock.
    assert_eq!(store.get_lock(&bg(), &unit).unwrap().unwrap().id, "tok");
}

fn unlock_checks_holder(store: &dyn UnitStore) {
    let unit = id("release");
    store.create(&bg(), &unit).unwrap();
    assert!(matches!(
        store.unlock(&bg(), &unit, "tok").unwrap_err(),
        StorageError::NotLocked(_)
    ));

    store.lock(&bg(), &unit, &LockInfo::new("tok", "ci")).unwrap();
    assert!(store.unlock(&bg(), &unit, "other").unwrap_err().is_lock_conflict());
    assert!(store.get(&bg(), &unit).unwrap().locked);

    store.unlock(&bg(), &unit, "tok").unwrap();
    assert!(!store.get(&bg(), &unit).unwrap().locked);
    store.lock(&bg(), &unit, &LockInfo::new("next", "ci")).unwrap();
}

fn concurrent_lock_has_single_winner(store: Arc<dyn UnitStore>) {
    if !store.capabilities().atomic_locks {
        return;
    }
    store.create(&bg(), &id("race")).unwrap();
    let handles: Vec<_> = (0..12)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store
                    .lock(&bg(), &id("race"), &LockInfo::new(format!("t{i}"), "racer"))
                    .is_ok()
            })
        })
        .collect();
    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

fn versions_are_newest_first_and_bounded(store: &dyn UnitStore) {
    let unit = id("history");
    store.create(&bg(), &unit).unwrap();
    for i in 0..5 {
        store.upload(&bg(), &unit, format!("v{i}").as_bytes(), None).unwrap();
    }

    let versions = store.list_versions(&bg(), &unit).unwrap();
    assert_eq!(versions.len(), MAX_VERSIONS);
    assert!(versions.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
    assert_eq!(versions[0].size, 2);
    assert_eq!(versions[0].hash, content_hash(b"v4"));

    let newest = store.download_version(&bg(), &unit, versions[0].timestamp).unwrap();
    assert_eq!(newest, b"v4");
    let oldest = store.download_version(&bg(), &unit, versions[2].timestamp).unwrap();
    assert_eq!(oldest, b"v2");
}

fn identical_uploads_get_distinct_versions(store: &dyn UnitStore) {
    let unit = id("same");
    store.create(&bg(), &unit).unwrap();
    store.upload(&bg(), &unit, b"x", None).unwrap();
    store.upload(&bg(), &unit, b"x", None).unwrap();
    let versions = store.list_versions(&bg(), &unit).unwrap();
    assert_eq!(versions.len(), 2);
    assert_ne!(versions[0].timestamp, versions[1].timestamp);
    assert_eq!(versions[0].hash, versions[1].hash);
}

fn restore_appends_new_version(store: &dyn UnitStore) {
    let unit = id("rollback");
    store.create(&bg(), &unit).unwrap();
    store.upload(&bg(), &unit, b"good", None).unwrap();
    store.upload(&bg(), &unit, b"bad", None).unwrap();

    let versions = store.list_versions(&bg(), &unit).unwrap();
    let good_at = versions[1].timestamp;

    store.lock(&bg(), &unit, &LockInfo::new("tok", "ci")).unwrap();
    assert!(store
        .restore(&bg(), &unit, good_at, None)
        .unwrap_err()
        .is_lock_conflict());
    store.restore(&bg(), &unit, good_at, Some("tok")).unwrap();

    assert_eq!(store.download(&bg(), &unit).unwrap(), b"good");
    let after = store.list_versions(&bg(), &unit).unwrap();
    assert_eq!(after.len(), 3);
    assert_eq!(after[0].hash, versions[1].hash);
}

fn unknown_version_is_not_found(store: &dyn UnitStore) {
    let unit = id("nover");
    store.create(&bg(), &unit).unwrap();
    store.upload(&bg(), &unit, b"x", None).unwrap();
    let at = store.list_versions(&bg(), &unit).unwrap()[0].timestamp - chrono::Duration::seconds(1);
    let err = store.download_version(&bg(), &unit, at).unwrap_err();
    assert!(matches!(err, StorageError::VersionNotFound { .. }), "got {err:?}");
    assert!(err.is_not_found());
}

// ---------------------------------------------------------------------------
// Lock-bypassing blob path
// ---------------------------------------------------------------------------

fn blob_write_bypasses_lock_and_history(store: &dyn UnitStore) {
    let unit = id("graph");
    store.create(&bg(), &unit).unwrap();
    store.upload(&bg(), &unit, b"v1", None).unwrap();
    store.lock(&bg(), &unit, &LockInfo::new("tok", "engine")).unwrap();

    store.upload_blob(&bg(), &unit, b"bookkept").unwrap();
    assert_eq!(store.download(&bg(), &unit).unwrap(), b"bookkept");
    assert_eq!(store.download_blob(&bg(), &unit).unwrap(), b"bookkept");
    assert_eq!(store.get(&bg(), &unit).unwrap().size, 8);
    assert_eq!(store.list_versions(&bg(), &unit).unwrap().len(), 1);
    assert!(store.get(&bg(), &unit).unwrap().locked);
}

fn standalone_blob_roundtrip(store: &dyn UnitStore) {
    let key = id("logs/run-1/chunk-0");
    store.upload_blob(&bg(), &key, b"line 1\n").unwrap();
    assert_eq!(store.download_blob(&bg(), &key).unwrap(), b"line 1\n");
    store.upload_blob(&bg(), &key, b"line 2\n").unwrap();
    assert_eq!(store.download_blob(&bg(), &key).unwrap(), b"line 2\n");
    assert!(store.download(&bg(), &key).unwrap_err().is_not_found());
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

fn cancelled_context_writes_nothing(store: &dyn UnitStore) {
    let ctx = OpContext::background();
    ctx.cancel();

    assert!(matches!(
        store.create(&ctx, &id("never")).unwrap_err(),
        StorageError::Cancelled
    ));
    assert!(store.get(&bg(), &id("never")).unwrap_err().is_not_found());

    store.create(&bg(), &id("kept")).unwrap();
    store.upload(&bg(), &id("kept"), b"original", None).unwrap();
    assert!(matches!(
        store.upload(&ctx, &id("kept"), b"changed", None).unwrap_err(),
        StorageError::Cancelled
    ));
    assert!(matches!(
        store.lock(&ctx, &id("kept"), &LockInfo::new("t", "me")).unwrap_err(),
        StorageError::Cancelled
    ));
    assert_eq!(store.download(&bg(), &id("kept")).unwrap(), b"original");
    assert_eq!(store.list_versions(&bg(), &id("kept")).unwrap().len(), 1);
    assert!(!store.get(&bg(), &id("kept")).unwrap().locked);
}

fn expired_deadline_is_reported(store: &dyn UnitStore) {
    let ctx = OpContext::with_deadline(Instant::now());
    assert!(matches!(
        store.create(&ctx, &id("late")).unwrap_err(),
        StorageError::DeadlineExceeded
    ));
    assert!(store.get(&bg(), &id("late")).unwrap_err().is_not_found());
}

macro_rules! contract_tests {
    ($backend:ident) => {
        mod $backend {
            use super::*;

            fn harness() -> Harness {
                init_tracing();
                super::$backend()
            }

            contract_tests!(@cases
                create_then_get,
                create_duplicate_fails,
                ids_are_normalized,
                missing_unit_is_not_found,
                upload_replaces_content,
                list_filters_by_prefix_sorted,
                list_excludes_standalone_blobs,
                reserved_looking_ids_are_ordinary_units,
                list_lock_state_matches_capabilities,
                delete_removes_everything,
                lock_conflict_reports_holder,
                upload_requires_matching_token,
                unlock_checks_holder,
                versions_are_newest_first_and_bounded,
                identical_uploads_get_distinct_versions,
                restore_appends_new_version,
                unknown_version_is_not_found,
                blob_write_bypasses_lock_and_history,
                standalone_blob_roundtrip,
                cancelled_context_writes_nothing,
                expired_deadline_is_reported,
            );

            #[test]
            fn concurrent_lock_has_single_winner() {
                let h = harness();
                super::concurrent_lock_has_single_winner(Arc::clone(&h.store));
            }

            proptest! {
                #![proptest_config(ProptestConfig::with_cases(24))]

                #[test]
                fn list_matches_prefix_filter(
                    units in prop::collection::vec(arb_raw_id(), 0..8),
                    blobs in prop::collection::vec(arb_raw_id(), 0..4),
                    prefix in arb_prefix(),
                ) {
                    let h = harness();
                    super::list_matches_reference(h.store.as_ref(), &units, &blobs, &prefix)?;
                }
            }
        }
    };
    (@cases $($case:ident),* $(,)?) => {
        $(
            #[test]
            fn $case() {
                let h = harness();
                super::$case(h.store.as_ref());
            }
        )*
    };
}

contract_tests!(memory);
contract_tests!(file);
contract_tests!(blob);
