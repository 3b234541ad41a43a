use std::sync::Arc;

use userdir::test_support::users;
use userdir::{
    CacheStore, Directory, DocumentStore, UpdateOutcome, UserRecord, UserStore, VariantPolicy,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn flush_while_registering_reports_real_counts() {
    let directory = Arc::new(Directory::new(Arc::new(CacheStore::new()), VariantPolicy::cache()));
    let total = 500;

    let mut writers = Vec::new();
    for chunk in users(total).chunks(100) {
        let directory = Arc::clone(&directory);
        let chunk = chunk.to_vec();
        writers.push(tokio::spawn(async move {
            for record in chunk {
                directory.register(record).await.unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }

    let mut flushed = 0;
    while writers.iter().any(|writer| !writer.is_finished()) {
        flushed += directory.flush().await.unwrap();
        tokio::task::yield_now().await;
    }
    for writer in writers {
        writer.await.unwrap();
    }
    flushed += directory.flush().await.unwrap();

    assert_eq!(flushed, total);
    assert!(directory.list_profiles().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reads_racing_updates_see_the_latest_phone() {
    let dir = tempfile::tempdir().unwrap();
    let store = DocumentStore::open(dir.path()).unwrap();
    let directory = Arc::new(Directory::new(Arc::new(store), VariantPolicy::document()));
    let stored = directory
        .register(UserRecord::new("A", "+15550000"))
        .await
        .unwrap();

    for round in 1..=100 {
        let mut readers = Vec::new();
        for _ in 0..4 {
            let directory = Arc::clone(&directory);
            let id = stored.id.clone();
            readers.push(tokio::spawn(async move { directory.profile(&id).await.unwrap() }));
        }

        let phone = format!("+1556{round:07}");
        let written = directory
            .store()
            .put(&UserRecord::new("A", phone.clone()).with_id(stored.id.clone()))
            .await;
        written.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }

        // Update by id must keep the phone just written, not an older one.
        let outcome = directory
            .update(UserRecord::new(format!("A{round}"), "").with_id(stored.id.clone()))
            .await
            .unwrap();
        let UpdateOutcome::Merged(record) = outcome else {
            panic!("document backend merges updates");
        };
        assert_eq!(record.phone_number, phone);
        assert_eq!(directory.profile_by_phone(&phone).await.unwrap().id, stored.id);
    }

    // Re-registering the latest phone reuses the identity.
    let again = directory
        .register(UserRecord::new("A", "+15560000100"))
        .await
        .unwrap();
    assert_eq!(again.id, stored.id);
    assert_eq!(directory.list_profiles().await.unwrap().len(), 1);
}
