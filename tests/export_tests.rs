//! Export, import and revision promotion.

use std::collections::BTreeSet;
use std::io::Read;

#[path = "common.rs"]
mod common;

use common::{DRIVERS, TestGhost, ignore_lock};
use flate2::read::GzDecoder;
use ghostfs::{FileRevision, ReplaceContent, UpsertOptions};
use tempfile::TempDir;

async fn seed_bot(test: &TestGhost, bot_id: &str) {
    let bot = test.ghost.for_bot(bot_id).unwrap();
    for (name, body) in [
        ("bot.config.json", format!(r#"{{"id":"{bot_id}"}}"#)),
        ("flows/main.flow.json", format!(r#"{{"bot":"{bot_id}"}}"#)),
        ("intents/greet.intent.json", "[]".to_string()),
        ("README", "no extension".to_string()),
    ] {
        bot.upsert_file("/", name, body.as_bytes(), UpsertOptions::default())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn export_matches_listing_plus_manifest() {
    for use_db in DRIVERS {
        let test = TestGhost::new(use_db);
        seed_bot(&test, "b1").await;
        let bot = test.ghost.for_bot("b1").unwrap();

        let target = TempDir::new().unwrap();
        let exported = bot.export_to_directory(target.path(), &[]).await.unwrap();

        let mut expected = bot.directory_listing("./", "*.*", &[], true).await.unwrap();
        expected.push("revisions.json".to_string());
        assert_eq!(exported, expected);
        assert!(!exported.contains(&"README".to_string()));

        for file in &exported {
            assert!(target.path().join(file).is_file(), "missing {file}");
        }

        let manifest: Vec<FileRevision> =
            serde_json::from_slice(&std::fs::read(target.path().join("revisions.json")).unwrap())
                .unwrap();
        // Revisions are only tracked by the database driver
        assert_eq!(manifest.is_empty(), !use_db);
    }
}

#[tokio::test]
async fn export_of_empty_scope_still_writes_manifest() {
    for use_db in DRIVERS {
        let test = TestGhost::new(use_db);
        let target = TempDir::new().unwrap();

        let exported = test
            .ghost
            .for_bot("empty")
            .unwrap()
            .export_to_directory(target.path(), &[])
            .await
            .unwrap();

        assert_eq!(exported, vec!["revisions.json"]);
        assert!(target.path().join("revisions.json").is_file());
    }
}

#[tokio::test]
async fn export_reads_storage_not_cache() {
    let test = TestGhost::new(true);
    let bot = test.ghost.for_bot("b1").unwrap();
    bot.upsert_file("/", "a.json", b"cached", UpsertOptions::default())
        .await
        .unwrap();
    bot.read_file_as_buffer("/", "a.json").await.unwrap();

    // Another process rewrites the row behind this cache
    test.peer(true)
        .for_bot("b1")
        .unwrap()
        .upsert_file("/", "a.json", b"fresh", UpsertOptions::default())
        .await
        .unwrap();

    let target = TempDir::new().unwrap();
    bot.export_to_directory(target.path(), &[]).await.unwrap();
    assert_eq!(std::fs::read(target.path().join("a.json")).unwrap(), b"fresh");
}

#[tokio::test]
async fn archive_export_rewrites_json_and_cleans_up() {
    let test = TestGhost::new(false);
    seed_bot(&test, "source-bot").await;
    let bot = test.ghost.for_bot("source-bot").unwrap();

    let replace = ReplaceContent {
        from: vec!["source-bot".to_string()],
        to: "clone-bot".to_string(),
    };
    let bytes = bot
        .export_to_archive_buffer(&["intents/**".to_string()], Some(&replace))
        .await
        .unwrap();

    let mut archive = tar::Archive::new(GzDecoder::new(bytes.as_slice()));
    let mut names = BTreeSet::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry.path().unwrap().to_string_lossy().into_owned();
        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        assert!(!body.contains("source-bot"), "{name} not rewritten");
        names.insert(name);
    }

    assert_eq!(
        names.into_iter().collect::<Vec<_>>(),
        vec!["bot.config.json", "flows/main.flow.json", "revisions.json"]
    );
}

#[tokio::test]
async fn archive_round_trips_through_import() {
    for use_db in DRIVERS {
        let test = TestGhost::new(use_db);
        seed_bot(&test, "b1").await;

        let bytes = test
            .ghost
            .for_bot("b1")
            .unwrap()
            .export_to_archive_buffer(&[], None)
            .await
            .unwrap();

        let unpacked = TempDir::new().unwrap();
        tar::Archive::new(GzDecoder::new(bytes.as_slice()))
            .unpack(unpacked.path())
            .unwrap();
        std::fs::remove_file(unpacked.path().join("revisions.json")).unwrap();

        let copy = test.ghost.for_bot("b2").unwrap();
        copy.upsert_file("/", "bot.config.json", br#"{"locked":true}"#, ignore_lock())
            .await
            .unwrap();
        copy.import_from_directory(unpacked.path()).await.unwrap();

        let flow = copy
            .read_file_as_string("flows", "main.flow.json")
            .await
            .unwrap();
        assert_eq!(flow, r#"{"bot":"b1"}"#);
    }
}

#[tokio::test]
async fn pending_changes_group_by_top_level_folder() {
    let test = TestGhost::new(true);
    seed_bot(&test, "b1").await;
    seed_bot(&test, "b2").await;
    let bot = test.ghost.for_bot("b1").unwrap();

    let pending = bot.get_pending_changes().await.unwrap();
    let buckets: Vec<&str> = pending.keys().map(String::as_str).collect();
    assert_eq!(buckets, vec!["flows", "intents", "root"]);
    assert_eq!(pending["root"].len(), 2);
    assert!(
        pending
            .values()
            .flatten()
            .all(|revision| revision.path.starts_with("data/bots/b1/"))
    );

    let on_disk = TestGhost::new(false);
    seed_bot(&on_disk, "b1").await;
    assert!(
        on_disk
            .ghost
            .for_bot("b1")
            .unwrap()
            .is_fully_synced()
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn force_update_promotes_reviewed_copy() {
    let test = TestGhost::new(true);
    seed_bot(&test, "b1").await;
    let bot = test.ghost.for_bot("b1").unwrap();
    assert!(!bot.is_fully_synced().await.unwrap());

    let reviewed = TempDir::new().unwrap();
    std::fs::create_dir_all(reviewed.path().join("flows")).unwrap();
    std::fs::write(reviewed.path().join("flows/main.flow.json"), br#"{"v":2}"#).unwrap();

    bot.force_update(reviewed.path()).await.unwrap();

    assert!(bot.is_fully_synced().await.unwrap());
    assert_eq!(
        bot.read_file_as_string("flows", "main.flow.json")
            .await
            .unwrap(),
        r#"{"v":2}"#
    );
}

#[tokio::test]
async fn force_update_from_missing_source_keeps_pending_changes() {
    let test = TestGhost::new(true);
    let bot = test.ghost.for_bot("b1").unwrap();
    bot.upsert_file("/", "flow.json", b"{}", UpsertOptions::default())
        .await
        .unwrap();
    assert_eq!(bot.get_pending_changes().await.unwrap().len(), 1);

    let missing = test.dir.path().join("no-such-review");
    assert!(bot.force_update(&missing).await.is_err());

    assert_eq!(bot.get_pending_changes().await.unwrap()["root"].len(), 1);
    assert!(!bot.is_fully_synced().await.unwrap());
}
