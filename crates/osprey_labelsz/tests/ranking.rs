//! End-to-end exercise of the label-size index over the full storage
//! stack: TOML config -> routing manager -> repo metadata -> versioned
//! mutations with write-log mirroring -> ranked queries -> shutdown drain.

use std::collections::BTreeMap;
use std::sync::Arc;

use osprey_common::config::OspreyConfig;
use osprey_common::types::{InstanceName, Point3d};
use osprey_datastore::repo::Repo;
use osprey_datastore::roi::StaticRoiProvider;
use osprey_datastore::sync::{ElementKind, SyncEvent};
use osprey_datastore::versioned::VersionedCtx;
use osprey_labelsz::data::{LabelszData, LOG_ENTRY_ADD, LOG_ENTRY_DELETE};
use osprey_labelsz::keys::IndexType;
use osprey_labelsz::LabelSize;
use osprey_storage::filelog::{delete_log_dir, FileLog};
use osprey_storage::logqueue::LogQueue;
use osprey_storage::manager;

const LOG_DIR: &str = "osprey-labelsz-ranking-e2e";

fn config() -> OspreyConfig {
    let text = format!(
        r#"
[server]
instance_id_start = 50

[backend.store]
default = "main"

[backend.log]
default = "mutlog"

[store.main]
engine = "memstore"

[store.mutlog]
engine = "filelog"
path = "{LOG_DIR}"
testing = true
"#
    );
    OspreyConfig::from_toml(&text).unwrap()
}

fn presyn(label: u64, x: i32) -> SyncEvent {
    SyncEvent::Added {
        elem: ElementKind::PreSyn,
        label,
        pos: Point3d::new(x, 0, 0),
    }
}

#[test]
fn test_ranking_over_full_stack() {
    let config = config();
    let _ = delete_log_dir(&config.store["mutlog"]);
    let created_metadata = manager::initialize(&config).unwrap();
    assert!(created_metadata);

    // Repo with one labelsz instance, persisted through the metadata store.
    let metadata_db = manager::metadata_store().unwrap();
    let root = osprey_common::types::VersionUuid::random();
    let mut repo = Repo::new(root, &config.server);
    let instance = repo
        .new_data(
            "rankings".into(),
            "labelsz".into(),
            root,
            BTreeMap::new(),
        )
        .unwrap()
        .clone();
    repo.save(metadata_db.as_ref()).unwrap();

    // Resolve the instance's store and write log through the manager.
    let store = manager::assigned_store(&instance.name, root, &instance.datatype).unwrap();
    let db = store.require_ordered().unwrap();
    let log = manager::assigned_log(&instance.name, root, &instance.datatype)
        .unwrap()
        .expect("default log must resolve");
    let queue = LogQueue::spawn(log).unwrap();

    let data = LabelszData::new(
        &instance,
        Arc::new(StaticRoiProvider::new()),
        Some(queue.clone()),
    )
    .unwrap();
    let ctx = VersionedCtx::new(repo.dag(), instance.id, root).unwrap();

    // Counts: 7 -> 3, 42 -> 2, then one deletion ties them at 2.
    let events = vec![
        presyn(42, 0),
        presyn(42, 1),
        presyn(7, 2),
        presyn(7, 3),
        presyn(7, 4),
    ];
    data.process_events(&ctx, db.as_ref(), &events).unwrap();
    data.process_events(
        &ctx,
        db.as_ref(),
        &[SyncEvent::Deleted {
            elem: ElementKind::PreSyn,
            label: 7,
            pos: Point3d::new(2, 0, 0),
        }],
    )
    .unwrap();

    assert_eq!(data.get_count(&ctx, db.as_ref(), IndexType::PreSyn, 7).unwrap(), 2);
    assert_eq!(
        data.top_n(&ctx, db.as_ref(), IndexType::PreSyn, 2).unwrap(),
        vec![LabelSize { label: 7, size: 2 }, LabelSize { label: 42, size: 2 }]
    );
    assert_eq!(
        data.threshold(&ctx, db.as_ref(), IndexType::AllSyn, 1, 0, 10)
            .unwrap(),
        vec![LabelSize { label: 7, size: 2 }, LabelSize { label: 42, size: 2 }]
    );

    // The saved repo loads back with the same instance table.
    let reloaded = Repo::load(metadata_db.as_ref()).unwrap().unwrap();
    let found = reloaded.data(&InstanceName::from("rankings")).unwrap();
    assert_eq!(found.id, instance.id);
    assert_eq!(found.uuid, instance.uuid);

    // Drain the queue, then verify the mutation log: six framed records in
    // producer order that decode back to the original events.
    queue.shutdown();
    let (filelog, _) = FileLog::open(&config.store["mutlog"]).unwrap();
    let records = filelog.read_all(instance.uuid, root).unwrap();
    assert_eq!(records.len(), 6);
    let entry_types: Vec<u16> = records.iter().map(|(t, _)| *t).collect();
    assert_eq!(
        entry_types,
        vec![
            LOG_ENTRY_ADD,
            LOG_ENTRY_ADD,
            LOG_ENTRY_ADD,
            LOG_ENTRY_ADD,
            LOG_ENTRY_ADD,
            LOG_ENTRY_DELETE
        ]
    );
    let first: SyncEvent = bincode::deserialize(&records[0].1).unwrap();
    assert_eq!(first, events[0]);
    let last: SyncEvent = bincode::deserialize(&records[5].1).unwrap();
    assert!(matches!(last, SyncEvent::Deleted { label: 7, .. }));

    // Deleting the instance wipes every one of its keys from the store.
    manager::delete_data_instance(&instance.name, root, &instance.datatype, instance.id).unwrap();
    assert_eq!(data.get_count(&ctx, db.as_ref(), IndexType::PreSyn, 7).unwrap(), 0);
    assert!(data.top_n(&ctx, db.as_ref(), IndexType::PreSyn, 10).unwrap().is_empty());

    manager::close();
    assert!(!manager::is_initialized());
    delete_log_dir(&config.store["mutlog"]).unwrap();
}
