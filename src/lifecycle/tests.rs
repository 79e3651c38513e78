use super::*;
use crate::catalog::{CatalogError, MemoryCatalog};
use crate::config::PlanTable;
use crate::storage::DeleteOutcome;
use crate::ErrorKind;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

const MB: u64 = 1024 * 1024;

/// Catalog that can be told to fail writes, or to hang right after one lands
#[derive(Default)]
struct FlakyCatalog {
    inner: MemoryCatalog,
    fail_owner_saves: AtomicBool,
    fail_document_writes: AtomicBool,
    stall_after_write: AtomicBool,
    stalled: Notify,
    release: Notify,
}

impl FlakyCatalog {
    fn check_document_write(&self) -> std::result::Result<(), CatalogError> {
        if self.fail_document_writes.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("document store offline".into()));
        }
        Ok(())
    }

    async fn maybe_stall(&self) {
        if self.stall_after_write.load(Ordering::SeqCst) {
            self.stalled.notify_one();
            self.release.notified().await;
        }
    }
}

#[async_trait]
impl CatalogStore for FlakyCatalog {
    async fn get_document(&self, id: &DocumentId) -> std::result::Result<Option<Document>, CatalogError> {
        self.inner.get_document(id).await
    }

    async fn insert_document(&self, document: &Document) -> std::result::Result<(), CatalogError> {
        self.check_document_write()?;
        self.inner.insert_document(document).await
    }

    async fn save_document(&self, document: &Document) -> std::result::Result<(), CatalogError> {
        self.check_document_write()?;
        self.inner.save_document(document).await?;
        self.maybe_stall().await;
        Ok(())
    }

    async fn remove_document(
        &self,
        id: &DocumentId,
    ) -> std::result::Result<Option<Document>, CatalogError> {
        self.inner.remove_document(id).await
    }

    async fn documents(&self) -> std::result::Result<Vec<Document>, CatalogError> {
        self.inner.documents().await
    }

    async fn get_owner(&self, id: &OwnerId) -> std::result::Result<Option<OwnerRecord>, CatalogError> {
        self.inner.get_owner(id).await
    }

    async fn save_owner(&self, owner: &OwnerRecord) -> std::result::Result<(), CatalogError> {
        if self.fail_owner_saves.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("owner store offline".into()));
        }
        self.inner.save_owner(owner).await?;
        self.maybe_stall().await;
        Ok(())
    }

    async fn remove_owner(
        &self,
        id: &OwnerId,
    ) -> std::result::Result<Option<OwnerRecord>, CatalogError> {
        self.inner.remove_owner(id).await
    }

    async fn owners(&self) -> std::result::Result<Vec<OwnerRecord>, CatalogError> {
        self.inner.owners().await
    }
}

struct Harness {
    _temp_dir: TempDir,
    root: PathBuf,
    catalog: Arc<FlakyCatalog>,
    lifecycle: DocumentLifecycle,
}

impl Harness {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("uploads");

        let mut config = DocVaultConfig::default();
        config.plans = PlanTable::new().with_plan("free", 50).with_plan("tiny", 1);

        let blobs = Arc::new(FsBlobStore::new(root.clone()));
        let catalog = Arc::new(FlakyCatalog::default());
        let lifecycle = DocumentLifecycle::new(&config, blobs, catalog.clone());

        Self {
            _temp_dir: temp_dir,
            root,
            catalog,
            lifecycle,
        }
    }

    async fn used(&self, principal: &Principal) -> u64 {
        self.lifecycle
            .accountant()
            .used_bytes(&principal.id)
            .await
            .unwrap()
    }

    /// Wait until no write holds or waits on an owner lock
    async fn settle(&self) {
        for _ in 0..100 {
            if self.lifecycle.admission.tracked_owners() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("writes did not settle");
    }

    async fn file_count(&self, principal: &Principal) -> usize {
        self.lifecycle
            .blobs()
            .entries(&principal.id)
            .await
            .unwrap()
            .len()
    }

    async fn create(&self, principal: &Principal, name: &str, size: usize) -> Document {
        self.lifecycle
            .create(principal, vec![Upload::new(name, vec![b' '; size])])
            .await
            .unwrap()
    }
}

fn principal(id: &str, plan: &str) -> Principal {
    Principal::new(id, id, plan).unwrap()
}

fn json(name: &str, size: usize) -> Vec<Upload> {
    vec![Upload::new(name, vec![b' '; size])]
}

#[tokio::test]
async fn test_usage_equals_sum_of_creates() {
    let h = Harness::new();
    let alice = principal("alice", "free");

    let sizes = [17usize, 4096, 1, 250_000, 3];
    for (i, size) in sizes.iter().enumerate() {
        h.create(&alice, &format!("doc{}.json", i), *size).await;
    }

    assert_eq!(h.used(&alice).await, sizes.iter().sum::<usize>() as u64);
    assert_eq!(h.lifecycle.list(&alice).await.unwrap().len(), sizes.len());
}

#[tokio::test]
async fn test_plan_boundary() {
    let h = Harness::new();
    let exact = principal("exact", "free");
    let over = principal("over", "free");

    let document = h.create(&exact, "big.json", 52_428_800).await;
    assert_eq!(document.size, 52_428_800);

    let err = h
        .lifecycle
        .create(&over, json("big.json", 52_428_801))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExceeded);

    // Rejected blob was removed again
    assert_eq!(h.file_count(&over).await, 0);
    assert!(h.lifecycle.list(&over).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_records_document() {
    let h = Harness::new();
    let alice = principal("alice", "free");

    let document = h
        .lifecycle
        .create(&alice, vec![Upload::new("notes.json", r#"{"a":1}"#)])
        .await
        .unwrap();

    assert!(document.filename.starts_with("notes--"));
    assert!(document.filename.ends_with(".json"));
    assert_eq!(document.path, format!("/uploads/alice/{}", document.filename));
    assert_eq!(document.size, 7);
    assert_eq!(document.mimetype, "application/json");
    assert_eq!(
        document.checksum,
        blake3::hash(br#"{"a":1}"#).to_hex().to_string()
    );

    let owner = h.catalog.get_owner(&alice.id).await.unwrap().unwrap();
    assert_eq!(owner.documents, vec![document.id]);
    assert_eq!(owner.plan, "free");

    let content = h
        .lifecycle
        .read_content(&alice, &document.id.to_string())
        .await
        .unwrap();
    assert_eq!(content, br#"{"a":1}"#);
}

#[tokio::test]
async fn test_same_name_uploads_do_not_collide() {
    let h = Harness::new();
    let alice = principal("alice", "free");

    let a = h.create(&alice, "same.json", 10).await;
    let b = h.create(&alice, "same.json", 20).await;

    assert_ne!(a.filename, b.filename);
    assert_eq!(h.used(&alice).await, 30);
}

#[tokio::test]
async fn test_validation_happens_before_storage() {
    let h = Harness::new();
    let alice = principal("alice", "free");

    let err = h.lifecycle.create(&alice, vec![]).await.unwrap_err();
    assert!(matches!(
        err,
        DocVaultError::Validation(ValidationError::MissingUpload)
    ));

    let err = h
        .lifecycle
        .create(&alice, vec![Upload::new("notes.txt", "{}")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DocVaultError::Validation(ValidationError::UnsupportedType { .. })
    ));

    let err = h
        .lifecycle
        .create(&alice, [json("a.json", 1), json("b.json", 1)].concat())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DocVaultError::Validation(ValidationError::TooManyFiles(2))
    ));

    // No namespace was ever created
    assert!(h.lifecycle.blobs().namespaces().await.unwrap().is_empty());
    assert!(!h.root.join("alice").exists());
}

#[tokio::test]
async fn test_invalid_document_id() {
    let h = Harness::new();
    let alice = principal("alice", "free");

    for result in [
        h.lifecycle.get(&alice, "1").await.err(),
        h.lifecycle.delete(&alice, "not-an-id").await.err(),
        h.lifecycle
            .update(&alice, "609c424a2cee6929d4acfdc2", json("a.json", 1))
            .await
            .err(),
    ] {
        assert!(matches!(
            result,
            Some(DocVaultError::Validation(ValidationError::InvalidDocumentId(_)))
        ));
    }
}

#[tokio::test]
async fn test_unknown_plan_touches_nothing() {
    let h = Harness::new();
    let gold = principal("goldie", "gold");

    let err = h
        .lifecycle
        .create(&gold, json("a.json", 10))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(!h.root.join("goldie").exists());

    let err = h.lifecycle.quota(&gold, true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_update_credit_ignores_other_usage() {
    let h = Harness::new();
    let alice = principal("alice", "tiny");

    let target = h.create(&alice, "target.json", 1000).await;
    h.create(&alice, "filler.json", (MB - 1000) as usize).await;
    assert_eq!(h.used(&alice).await, MB);

    // Orphan pushes usage past the plan
    tokio::fs::write(h.root.join("alice").join("stray.bin"), [0u8; 10])
        .await
        .unwrap();

    let same = h
        .lifecycle
        .update(&alice, &target.id.to_string(), json("same.json", 1000))
        .await
        .unwrap();
    assert_eq!(same.size, 1000);

    let smaller = h
        .lifecycle
        .update(&alice, &target.id.to_string(), json("smaller.json", 900))
        .await
        .unwrap();
    assert_eq!(smaller.size, 900);
    assert_eq!(h.used(&alice).await, MB - 100 + 10);
}

#[tokio::test]
async fn test_update_preserves_identity_and_retires_old_blob() {
    let h = Harness::new();
    let alice = principal("alice", "free");

    let original = h.create(&alice, "v1.json", 100).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let updated = h
        .lifecycle
        .update(&alice, &original.id.to_string(), json("v2.json", 250))
        .await
        .unwrap();

    assert_eq!(updated.id, original.id);
    assert_eq!(updated.upload_date, original.upload_date);
    assert_ne!(updated.filename, original.filename);
    assert!(updated.filename.starts_with("v2--"));
    assert_eq!(updated.size, 250);

    assert_eq!(h.used(&alice).await, 250);
    assert_eq!(h.file_count(&alice).await, 1);
    assert_eq!(
        h.lifecycle
            .get(&alice, &original.id.to_string())
            .await
            .unwrap(),
        updated
    );
}

#[tokio::test]
async fn test_rejected_update_leaves_document_untouched() {
    let h = Harness::new();
    let alice = principal("alice", "tiny");

    let target = h
        .lifecycle
        .create(&alice, vec![Upload::new("target.json", vec![b'x'; 1000])])
        .await
        .unwrap();
    h.create(&alice, "filler.json", (MB - 1000) as usize).await;

    let err = h
        .lifecycle
        .update(&alice, &target.id.to_string(), json("bigger.json", 1001))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DocVaultError::QuotaExceeded {
            requested_bytes: 1001,
            remaining_bytes: -1
        }
    ));

    let id = target.id.to_string();
    assert_eq!(h.lifecycle.get(&alice, &id).await.unwrap(), target);
    assert_eq!(
        h.lifecycle.read_content(&alice, &id).await.unwrap(),
        vec![b'x'; 1000]
    );
    assert_eq!(h.file_count(&alice).await, 2);
    assert_eq!(h.used(&alice).await, MB);
}

#[tokio::test]
async fn test_update_of_missing_document() {
    let h = Harness::new();
    let alice = principal("alice", "free");
    h.create(&alice, "a.json", 10).await;

    let err = h
        .lifecycle
        .update(&alice, &DocumentId::generate().to_string(), json("b.json", 10))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.file_count(&alice).await, 1);
}

#[tokio::test]
async fn test_delete_releases_usage() {
    let h = Harness::new();
    let alice = principal("alice", "free");

    let keep = h.create(&alice, "keep.json", 300).await;
    let doomed = h.create(&alice, "doomed.json", 700).await;
    assert_eq!(h.used(&alice).await, 1000);

    let deleted = h
        .lifecycle
        .delete(&alice, &doomed.id.to_string())
        .await
        .unwrap();
    assert_eq!(deleted, doomed);
    assert_eq!(h.used(&alice).await, 300);

    // Retried request
    let err = h
        .lifecycle
        .delete(&alice, &doomed.id.to_string())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(
        h.lifecycle
            .blobs()
            .delete(&alice.id, &doomed.filename)
            .await
            .unwrap(),
        DeleteOutcome::AlreadyAbsent
    );

    assert_eq!(h.used(&alice).await, 300);
    assert_eq!(h.lifecycle.list(&alice).await.unwrap(), vec![keep]);
}

#[tokio::test]
async fn test_delete_drops_dangling_reference() {
    let h = Harness::new();
    let alice = principal("alice", "free");

    let document = h.create(&alice, "a.json", 10).await;
    h.catalog.remove_document(&document.id).await.unwrap();

    let err = h
        .lifecycle
        .delete(&alice, &document.id.to_string())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let owner = h.catalog.get_owner(&alice.id).await.unwrap().unwrap();
    assert!(owner.documents.is_empty());
}

#[tokio::test]
async fn test_ownership_isolation() {
    let h = Harness::new();
    let x = principal("xavier", "free");
    let y = principal("yvonne", "free");

    let document = h.create(&x, "private.json", 42).await;
    h.create(&y, "own.json", 1).await;
    let id = document.id.to_string();

    let errors = [
        h.lifecycle.get(&y, &id).await.unwrap_err(),
        h.lifecycle.read_content(&y, &id).await.unwrap_err(),
        h.lifecycle
            .update(&y, &id, json("hijack.json", 1))
            .await
            .unwrap_err(),
        h.lifecycle.delete(&y, &id).await.unwrap_err(),
    ];
    for err in &errors {
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    // Same error as for an id that does not exist at all
    let unknown = h
        .lifecycle
        .get(&y, &DocumentId::generate().to_string())
        .await
        .unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::NotFound);

    assert_eq!(h.lifecycle.get(&x, &id).await.unwrap(), document);
    assert_eq!(h.used(&x).await, 42);
    assert_eq!(h.used(&y).await, 1);
}

#[tokio::test]
async fn test_orphan_counts_against_quota() {
    let h = Harness::new();
    let alice = principal("alice", "tiny");

    h.create(&alice, "a.json", 1000).await;
    let before = h.lifecycle.quota(&alice, false).await.unwrap();
    assert_eq!(before.used_bytes_remaining, (MB - 1000) as i64);

    tokio::fs::write(h.root.join("alice").join("orphan.json"), vec![0u8; 2000])
        .await
        .unwrap();

    let after = h.lifecycle.quota(&alice, false).await.unwrap();
    assert_eq!(after.used_bytes_remaining, (MB - 3000) as i64);

    let err = h
        .lifecycle
        .create(&alice, json("last.json", (MB - 2000) as usize))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
}

#[tokio::test]
async fn test_quota_rounding() {
    let h = Harness::new();
    let alice = principal("alice", "tiny");

    let empty = h.lifecycle.quota(&alice, true).await.unwrap();
    assert_eq!(empty.used_bytes_remaining, MB as i64);
    assert_eq!(empty.used_mb_remaining, 1.0);

    h.create(&alice, "a.json", 12_345).await;
    let rounded = h.lifecycle.quota(&alice, true).await.unwrap();
    let raw = h.lifecycle.quota(&alice, false).await.unwrap();
    assert_eq!(rounded.used_mb_remaining, 0.99);
    assert!(raw.used_mb_remaining > 0.988 && raw.used_mb_remaining < 0.989);
}

#[tokio::test]
async fn test_failed_owner_save_compensates() {
    let h = Harness::new();
    let alice = principal("alice", "free");
    let kept = h.create(&alice, "kept.json", 10).await;

    h.catalog.fail_owner_saves.store(true, Ordering::SeqCst);
    let err = h
        .lifecycle
        .create(&alice, json("lost.json", 20))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Catalog);

    // Blob and record of the failed create are both gone
    assert_eq!(h.file_count(&alice).await, 1);
    assert_eq!(h.catalog.documents().await.unwrap(), vec![kept.clone()]);

    // A failed delete restores the record it removed
    let err = h
        .lifecycle
        .delete(&alice, &kept.id.to_string())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Catalog);
    h.catalog.fail_owner_saves.store(false, Ordering::SeqCst);

    assert_eq!(
        h.lifecycle.get(&alice, &kept.id.to_string()).await.unwrap(),
        kept
    );
    assert_eq!(h.used(&alice).await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_respect_plan() {
    let h = Harness::new();
    let alice = principal("alice", "tiny");
    let size = 300 * 1024;

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let lifecycle = h.lifecycle.clone();
            let alice = alice.clone();
            tokio::spawn(async move {
                lifecycle
                    .create(&alice, json(&format!("doc{}.json", i), size))
                    .await
            })
        })
        .collect();

    let mut admitted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::QuotaExceeded),
        }
    }

    assert_eq!(admitted, 3);
    assert_eq!(h.used(&alice).await, 3 * size as u64);
    assert_eq!(h.lifecycle.list(&alice).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_dropped_pending_blob_is_removed() {
    let h = Harness::new();
    let alice = principal("alice", "free");
    let blobs = h.lifecycle.blobs().clone();

    blobs.ensure_namespace(&alice.id).await.unwrap();
    let stored = blobs.put(&alice.id, "aborted.json", b"{}").await.unwrap();

    let pending = PendingBlob::new(blobs.clone(), alice.id.clone(), stored.physical_name);
    drop(pending);

    for _ in 0..50 {
        if h.file_count(&alice).await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.file_count(&alice).await, 0);
}

#[tokio::test]
async fn test_purge_owner() {
    let h = Harness::new();
    let alice = principal("alice", "free");
    let bob = principal("bob", "free");

    h.create(&alice, "a.json", 100).await;
    h.create(&alice, "b.json", 200).await;
    let bobs = h.create(&bob, "c.json", 5).await;

    let report = h.lifecycle.purge_owner(&alice.id).await.unwrap();
    assert_eq!(report.documents_removed, 2);
    assert_eq!(report.bytes_released, 300);

    assert!(!h.root.join("alice").exists());
    assert!(h.catalog.get_owner(&alice.id).await.unwrap().is_none());
    assert_eq!(h.catalog.documents().await.unwrap(), vec![bobs]);

    // Purging again is harmless
    let again = h.lifecycle.purge_owner(&alice.id).await.unwrap();
    assert_eq!(again, PurgeReport::default());
}

#[tokio::test]
async fn test_list_keeps_reference_order() {
    let h = Harness::new();
    let alice = principal("alice", "free");

    let first = h.create(&alice, "1.json", 1).await;
    let second = h.create(&alice, "2.json", 2).await;
    let third = h.create(&alice, "3.json", 3).await;
    h.catalog.remove_document(&second.id).await.unwrap();

    let listed = h.lifecycle.list(&alice).await.unwrap();
    assert_eq!(listed, vec![first, third]);

    let views: Vec<_> = listed.iter().map(Document::view).collect();
    assert_eq!(views[1].size, 3);
}

#[tokio::test]
async fn test_failed_record_insert_discards_blob() {
    let h = Harness::new();
    let alice = principal("alice", "free");
    let kept = h.create(&alice, "kept.json", 10).await;

    h.catalog.fail_document_writes.store(true, Ordering::SeqCst);
    let err = h
        .lifecycle
        .create(&alice, json("lost.json", 20))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Catalog);

    assert_eq!(h.file_count(&alice).await, 1);
    assert_eq!(h.used(&alice).await, 10);
    assert_eq!(h.catalog.documents().await.unwrap(), vec![kept.clone()]);
    let owner = h.catalog.get_owner(&alice.id).await.unwrap().unwrap();
    assert_eq!(owner.documents, vec![kept.id]);
}

#[tokio::test]
async fn test_failed_record_overwrite_keeps_previous() {
    let h = Harness::new();
    let alice = principal("alice", "free");
    let original = h
        .lifecycle
        .create(&alice, vec![Upload::new("v1.json", vec![b'1'; 30])])
        .await
        .unwrap();
    let id = original.id.to_string();

    h.catalog.fail_document_writes.store(true, Ordering::SeqCst);
    let err = h
        .lifecycle
        .update(&alice, &id, vec![Upload::new("v2.json", vec![b'2'; 50])])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Catalog);

    assert_eq!(h.lifecycle.get(&alice, &id).await.unwrap(), original);
    assert_eq!(
        h.lifecycle.read_content(&alice, &id).await.unwrap(),
        vec![b'1'; 30]
    );
    assert_eq!(h.file_count(&alice).await, 1);
}

#[tokio::test]
async fn test_abandoned_update_keeps_new_content() {
    let h = Harness::new();
    let alice = principal("alice", "free");
    let original = h.create(&alice, "v1.json", 30).await;
    let id = original.id.to_string();

    h.catalog.stall_after_write.store(true, Ordering::SeqCst);
    {
        let update = h
            .lifecycle
            .update(&alice, &id, vec![Upload::new("v2.json", vec![b'2'; 50])]);
        // Caller goes away once the record overwrite has landed
        tokio::select! {
            _ = update => panic!("update finished while the catalog was stalled"),
            _ = h.catalog.stalled.notified() => {}
        }
    }

    let record = h.lifecycle.get(&alice, &id).await.unwrap();
    assert!(record.filename.starts_with("v2--"));
    assert_eq!(
        h.lifecycle.read_content(&alice, &id).await.unwrap(),
        vec![b'2'; 50]
    );

    h.catalog.stall_after_write.store(false, Ordering::SeqCst);
    h.catalog.release.notify_one();
    h.settle().await;

    // Old blob retired, new one still served
    assert_eq!(h.file_count(&alice).await, 1);
    assert_eq!(h.used(&alice).await, 50);
    assert_eq!(
        h.lifecycle.read_content(&alice, &id).await.unwrap(),
        vec![b'2'; 50]
    );
    let report = h.lifecycle.reconciler().scan_owner(&alice.id).await.unwrap();
    assert!(report.is_clean(), "{:?}", report);
}

#[tokio::test]
async fn test_abandoned_create_keeps_document() {
    let h = Harness::new();
    let alice = principal("alice", "free");

    h.catalog.stall_after_write.store(true, Ordering::SeqCst);
    {
        let create = h
            .lifecycle
            .create(&alice, vec![Upload::new("late.json", r#"{"late":true}"#)]);
        tokio::select! {
            _ = create => panic!("create finished while the catalog was stalled"),
            _ = h.catalog.stalled.notified() => {}
        }
    }

    h.catalog.stall_after_write.store(false, Ordering::SeqCst);
    h.catalog.release.notify_one();
    h.settle().await;

    let listed = h.lifecycle.list(&alice).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(
        h.lifecycle
            .read_content(&alice, &listed[0].id.to_string())
            .await
            .unwrap(),
        br#"{"late":true}"#
    );
    let report = h.lifecycle.reconciler().scan_owner(&alice.id).await.unwrap();
    assert!(report.is_clean(), "{:?}", report);
}

#[tokio::test]
async fn test_owner_locks_released_after_writes() {
    let h = Harness::new();
    let alice = principal("alice", "tiny");

    let document = h.create(&alice, "a.json", 10).await;
    assert_eq!(h.lifecycle.admission.tracked_owners(), 0);

    let err = h
        .lifecycle
        .create(&alice, json("big.json", (2 * MB) as usize))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    assert_eq!(h.lifecycle.admission.tracked_owners(), 0);

    h.lifecycle
        .delete(&alice, &document.id.to_string())
        .await
        .unwrap();
    assert_eq!(h.lifecycle.admission.tracked_owners(), 0);
}
