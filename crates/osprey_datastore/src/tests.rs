#[cfg(test)]
mod dag_tests {
    use osprey_common::error::DatastoreError;
    use osprey_common::types::VersionUuid;

    use crate::dag::VersionDag;

    #[test]
    fn test_root_starts_unlocked() {
        let root = VersionUuid::random();
        let dag = VersionDag::new(root);
        assert!(!dag.is_locked(root).unwrap());
        assert_eq!(dag.len(), 1);
        assert_eq!(dag.leaves(), vec![root]);
    }

    #[test]
    fn test_branch_requires_locked_parent() {
        let root = VersionUuid::random();
        let child = VersionUuid::random();
        let mut dag = VersionDag::new(root);

        assert!(matches!(
            dag.branch(root, child),
            Err(DatastoreError::ParentUnlocked(_))
        ));

        dag.lock(root).unwrap();
        dag.branch(root, child).unwrap();
        assert!(!dag.is_locked(child).unwrap());
        assert_eq!(dag.leaves(), vec![child]);
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let root = VersionUuid::random();
        let child = VersionUuid::random();
        let mut dag = VersionDag::new(root);
        dag.lock(root).unwrap();
        dag.branch(root, child).unwrap();
        assert!(matches!(
            dag.branch(root, child),
            Err(DatastoreError::DuplicateVersion(_))
        ));
        assert!(matches!(
            dag.branch(root, root),
            Err(DatastoreError::DuplicateVersion(_))
        ));
    }

    #[test]
    fn test_linear_ancestry_order() {
        let (root, a, b) = (VersionUuid::random(), VersionUuid::random(), VersionUuid::random());
        let mut dag = VersionDag::new(root);
        dag.lock(root).unwrap();
        let a_id = dag.branch(root, a).unwrap();
        dag.lock(a).unwrap();
        let b_id = dag.branch(a, b).unwrap();

        let root_id = dag.version_id(root).unwrap();
        assert_eq!(dag.ancestry(b_id).unwrap(), vec![b_id, a_id, root_id]);
        assert_eq!(dag.ancestry(root_id).unwrap(), vec![root_id]);
    }

    #[test]
    fn test_merge_ancestry_follows_declared_parent_order() {
        let root = VersionUuid::random();
        let (a, b, m) = (VersionUuid::random(), VersionUuid::random(), VersionUuid::random());
        let mut dag = VersionDag::new(root);
        dag.lock(root).unwrap();
        let a_id = dag.branch(root, a).unwrap();
        let b_id = dag.branch(root, b).unwrap();
        dag.lock(a).unwrap();
        dag.lock(b).unwrap();
        let m_id = dag.merge(&[a, b], m).unwrap();

        let root_id = dag.version_id(root).unwrap();
        // Breadth-first with parents in declared order; the shared
        // grandparent appears once.
        assert_eq!(dag.ancestry(m_id).unwrap(), vec![m_id, a_id, b_id, root_id]);
    }

    #[test]
    fn test_merge_requires_all_parents_locked() {
        let root = VersionUuid::random();
        let (a, b, m) = (VersionUuid::random(), VersionUuid::random(), VersionUuid::random());
        let mut dag = VersionDag::new(root);
        dag.lock(root).unwrap();
        dag.branch(root, a).unwrap();
        dag.branch(root, b).unwrap();
        dag.lock(a).unwrap();
        assert!(matches!(
            dag.merge(&[a, b], m),
            Err(DatastoreError::ParentUnlocked(_))
        ));
    }
}

#[cfg(test)]
mod versioned_tests {
    use osprey_common::config::StoreConfig;
    use osprey_common::error::{DatastoreError, StorageError};
    use osprey_common::types::{InstanceId, VersionUuid};
    use osprey_storage::memstore::MemStore;

    use crate::dag::VersionDag;
    use crate::versioned::VersionedCtx;

    const INSTANCE: InstanceId = InstanceId(42);

    fn store() -> MemStore {
        MemStore::new(StoreConfig::new("memstore"))
    }

    fn ctx(dag: &VersionDag, version: VersionUuid) -> VersionedCtx {
        VersionedCtx::new(dag, INSTANCE, version).unwrap()
    }

    #[test]
    fn test_put_get_delete_at_one_version() {
        let db = store();
        let root = VersionUuid::random();
        let dag = VersionDag::new(root);
        let ctx = ctx(&dag, root);

        assert_eq!(ctx.get(&db, b"k").unwrap(), None);
        ctx.put(&db, b"k", b"value").unwrap();
        assert_eq!(ctx.get(&db, b"k").unwrap(), Some(b"value".to_vec()));
        ctx.delete(&db, b"k").unwrap();
        assert_eq!(ctx.get(&db, b"k").unwrap(), None);
    }

    #[test]
    fn test_nearest_ancestor_read() {
        let db = store();
        let root = VersionUuid::random();
        let (a, b) = (VersionUuid::random(), VersionUuid::random());
        let mut dag = VersionDag::new(root);

        ctx(&dag, root).put(&db, b"k", b"from-root").unwrap();
        dag.lock(root).unwrap();
        dag.branch(root, a).unwrap();
        dag.lock(a).unwrap();
        dag.branch(a, b).unwrap();

        // No writer at b or a: nearest ancestor is root.
        assert_eq!(ctx(&dag, b).get(&db, b"k").unwrap(), Some(b"from-root".to_vec()));

        // A closer ancestor write shadows the root's.
        let mut dag2 = VersionDag::new(root);
        let db2 = store();
        ctx(&dag2, root).put(&db2, b"k", b"from-root").unwrap();
        dag2.lock(root).unwrap();
        dag2.branch(root, a).unwrap();
        ctx(&dag2, a).put(&db2, b"k", b"from-a").unwrap();
        dag2.lock(a).unwrap();
        dag2.branch(a, b).unwrap();
        assert_eq!(ctx(&dag2, b).get(&db2, b"k").unwrap(), Some(b"from-a".to_vec()));
        // The root itself still reads its own value.
        assert_eq!(ctx(&dag2, root).get(&db2, b"k").unwrap(), Some(b"from-root".to_vec()));
    }

    #[test]
    fn test_child_write_does_not_leak_to_parent() {
        // Label 9 had count 5 at the parent; the child writes 2.
        let db = store();
        let root = VersionUuid::random();
        let child = VersionUuid::random();
        let mut dag = VersionDag::new(root);

        ctx(&dag, root).put(&db, b"label9", &5u32.to_le_bytes()).unwrap();
        dag.lock(root).unwrap();
        dag.branch(root, child).unwrap();
        ctx(&dag, child).put(&db, b"label9", &2u32.to_le_bytes()).unwrap();

        assert_eq!(
            ctx(&dag, child).get(&db, b"label9").unwrap(),
            Some(2u32.to_le_bytes().to_vec())
        );
        assert_eq!(
            ctx(&dag, root).get(&db, b"label9").unwrap(),
            Some(5u32.to_le_bytes().to_vec())
        );
    }

    #[test]
    fn test_tombstone_not_resurrected() {
        let db = store();
        let root = VersionUuid::random();
        let (a, b) = (VersionUuid::random(), VersionUuid::random());
        let mut dag = VersionDag::new(root);

        ctx(&dag, root).put(&db, b"k", b"root-value").unwrap();
        dag.lock(root).unwrap();
        dag.branch(root, a).unwrap();
        ctx(&dag, a).delete(&db, b"k").unwrap();
        dag.lock(a).unwrap();
        dag.branch(a, b).unwrap();

        // The tombstone at a hides the root value from a and its
        // descendants; the root still sees its own write.
        assert_eq!(ctx(&dag, a).get(&db, b"k").unwrap(), None);
        assert_eq!(ctx(&dag, b).get(&db, b"k").unwrap(), None);
        assert_eq!(ctx(&dag, root).get(&db, b"k").unwrap(), Some(b"root-value".to_vec()));
    }

    #[test]
    fn test_merge_tie_break_uses_declared_parent_order() {
        let db = store();
        let root = VersionUuid::random();
        let (a, b, m1, m2) = (
            VersionUuid::random(),
            VersionUuid::random(),
            VersionUuid::random(),
            VersionUuid::random(),
        );
        let mut dag = VersionDag::new(root);
        dag.lock(root).unwrap();
        dag.branch(root, a).unwrap();
        dag.branch(root, b).unwrap();
        ctx(&dag, a).put(&db, b"k", b"from-a").unwrap();
        ctx(&dag, b).put(&db, b"k", b"from-b").unwrap();
        dag.lock(a).unwrap();
        dag.lock(b).unwrap();

        dag.merge(&[a, b], m1).unwrap();
        assert_eq!(ctx(&dag, m1).get(&db, b"k").unwrap(), Some(b"from-a".to_vec()));

        dag.merge(&[b, a], m2).unwrap();
        assert_eq!(ctx(&dag, m2).get(&db, b"k").unwrap(), Some(b"from-b".to_vec()));
    }

    #[test]
    fn test_type_key_prefix_isolation() {
        // "ab" and a longer type-key sharing the prefix must not shadow
        // each other even though their physical spans overlap.
        let db = store();
        let root = VersionUuid::random();
        let dag = VersionDag::new(root);
        let ctx = ctx(&dag, root);

        ctx.put(&db, b"ab", b"short").unwrap();
        ctx.put(&db, b"ab\x01xyz", b"long").unwrap();
        assert_eq!(ctx.get(&db, b"ab").unwrap(), Some(b"short".to_vec()));
        assert_eq!(ctx.get(&db, b"ab\x01xyz").unwrap(), Some(b"long".to_vec()));
    }

    #[test]
    fn test_process_range_resolves_versions() {
        let db = store();
        let root = VersionUuid::random();
        let child = VersionUuid::random();
        let mut dag = VersionDag::new(root);

        let rctx = ctx(&dag, root);
        rctx.put(&db, b"k1", b"one").unwrap();
        rctx.put(&db, b"k2", b"two").unwrap();
        rctx.put(&db, b"k3", b"three").unwrap();
        dag.lock(root).unwrap();
        dag.branch(root, child).unwrap();
        let cctx = ctx(&dag, child);
        cctx.put(&db, b"k2", b"two-child").unwrap();
        cctx.delete(&db, b"k3").unwrap();

        let mut seen = Vec::new();
        cctx.process_range(&db, b"k1", b"k9", &mut |tkey, value| {
            seen.push((tkey.to_vec(), value.to_vec()));
            Ok(())
        })
        .unwrap();
        assert_eq!(
            seen,
            vec![
                (b"k1".to_vec(), b"one".to_vec()),
                (b"k2".to_vec(), b"two-child".to_vec()),
            ]
        );

        // The parent still sees its own three values.
        let mut parent_keys = Vec::new();
        rctx.process_range(&db, b"k1", b"k9", &mut |tkey, _| {
            parent_keys.push(tkey.to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(parent_keys, vec![b"k1".to_vec(), b"k2".to_vec(), b"k3".to_vec()]);
    }

    #[test]
    fn test_process_range_short_circuit() {
        let db = store();
        let root = VersionUuid::random();
        let dag = VersionDag::new(root);
        let ctx = ctx(&dag, root);
        for i in 0u8..10 {
            ctx.put(&db, &[b'k', i], &[i]).unwrap();
        }
        let mut count = 0;
        let err = ctx
            .process_range(&db, b"k", &[b'k', 0xff], &mut |_, _| {
                count += 1;
                if count == 4 {
                    return Err(StorageError::ScanAborted);
                }
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_scan_abort());
        assert_eq!(count, 4);
    }

    #[test]
    fn test_locked_version_rejects_writes() {
        let root = VersionUuid::random();
        let mut dag = VersionDag::new(root);
        assert!(ctx(&dag, root).require_mutable().is_ok());
        dag.lock(root).unwrap();
        assert!(matches!(
            ctx(&dag, root).require_mutable(),
            Err(DatastoreError::VersionLocked(_))
        ));
    }

    #[test]
    fn test_delete_all_wipes_instance_only() {
        let db = store();
        let root = VersionUuid::random();
        let dag = VersionDag::new(root);
        let ctx42 = ctx(&dag, root);
        let ctx43 = VersionedCtx::new(&dag, InstanceId(43), root).unwrap();

        ctx42.put(&db, b"k", b"v").unwrap();
        ctx43.put(&db, b"k", b"v").unwrap();
        ctx42.delete_all(&db).unwrap();

        assert_eq!(ctx42.get(&db, b"k").unwrap(), None);
        assert_eq!(ctx43.get(&db, b"k").unwrap(), Some(b"v".to_vec()));
    }
}

#[cfg(test)]
mod repo_tests {
    use std::collections::BTreeMap;

    use osprey_common::config::{InstanceIdGen, ServerConfig, StoreConfig};
    use osprey_common::error::DatastoreError;
    use osprey_common::types::{DatatypeName, InstanceId, InstanceName, VersionUuid};
    use osprey_storage::memstore::MemStore;

    use crate::repo::Repo;

    fn server_config() -> ServerConfig {
        ServerConfig {
            instance_id_start: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_sequential_instance_ids() {
        let root = VersionUuid::random();
        let mut repo = Repo::new(root, &server_config());
        let a = repo
            .new_data("a".into(), DatatypeName::from("labelsz"), root, BTreeMap::new())
            .unwrap()
            .id;
        let b = repo
            .new_data("b".into(), DatatypeName::from("annotation"), root, BTreeMap::new())
            .unwrap()
            .id;
        assert_eq!(a, InstanceId(100));
        assert_eq!(b, InstanceId(101));
    }

    #[test]
    fn test_random_instance_ids_never_reserved() {
        let root = VersionUuid::random();
        let mut config = server_config();
        config.instance_id_gen = InstanceIdGen::Random;
        let mut repo = Repo::new(root, &config);
        for i in 0..16 {
            let name = InstanceName(format!("inst{i}"));
            let id = repo
                .new_data(name, DatatypeName::from("labelsz"), root, BTreeMap::new())
                .unwrap()
                .id;
            assert_ne!(id, InstanceId::METADATA);
        }
    }

    #[test]
    fn test_duplicate_instance_rejected() {
        let root = VersionUuid::random();
        let mut repo = Repo::new(root, &server_config());
        repo.new_data("dup".into(), DatatypeName::from("labelsz"), root, BTreeMap::new())
            .unwrap();
        assert!(matches!(
            repo.new_data("dup".into(), DatatypeName::from("labelsz"), root, BTreeMap::new()),
            Err(DatastoreError::DuplicateInstance(_))
        ));
    }

    #[test]
    fn test_unknown_root_rejected() {
        let root = VersionUuid::random();
        let mut repo = Repo::new(root, &server_config());
        assert!(matches!(
            repo.new_data(
                "x".into(),
                DatatypeName::from("labelsz"),
                VersionUuid::random(),
                BTreeMap::new()
            ),
            Err(DatastoreError::UnknownVersion(_))
        ));
    }

    #[test]
    fn test_sync_is_one_shot() {
        let root = VersionUuid::random();
        let mut repo = Repo::new(root, &server_config());
        repo.new_data("idx".into(), DatatypeName::from("labelsz"), root, BTreeMap::new())
            .unwrap();
        repo.set_sync(&"idx".into(), vec!["synapses".into()]).unwrap();
        assert!(matches!(
            repo.set_sync(&"idx".into(), vec!["other".into()]),
            Err(DatastoreError::SyncAlreadySet)
        ));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let db = MemStore::new(StoreConfig::new("memstore"));
        let root = VersionUuid::random();
        let child = VersionUuid::random();

        let mut repo = Repo::new(root, &server_config());
        repo.dag_mut().lock(root).unwrap();
        repo.dag_mut().branch(root, child).unwrap();
        repo.new_data(
            "rankings".into(),
            DatatypeName::from("labelsz"),
            root,
            BTreeMap::from([("roi".to_string(), format!("myroi,{root}"))]),
        )
        .unwrap();
        repo.set_sync(&"rankings".into(), vec!["synapses".into()])
            .unwrap();
        repo.save(&db).unwrap();
        assert_eq!(Repo::metadata_keys(&db).unwrap().len(), 1);

        let loaded = Repo::load(&db).unwrap().expect("saved repo must load");
        assert_eq!(loaded.dag().len(), 2);
        assert!(loaded.dag().is_locked(root).unwrap());
        assert!(loaded.dag().contains(child));
        let data = loaded.data(&"rankings".into()).unwrap();
        assert_eq!(data.datatype, DatatypeName::from("labelsz"));
        assert_eq!(data.sync_sources, vec![InstanceName::from("synapses")]);
        assert_eq!(data.properties["roi"], format!("myroi,{root}"));
    }

    #[test]
    fn test_load_empty_store() {
        let db = MemStore::new(StoreConfig::new("memstore"));
        assert!(Repo::load(&db).unwrap().is_none());
    }
}

#[cfg(test)]
mod roi_tests {
    use std::collections::HashSet;

    use osprey_common::error::DatastoreError;
    use osprey_common::types::{BlockCoord, InstanceName, Point3d, VersionUuid};

    use crate::roi::{ImmutableRoi, RoiProvider, RoiSpec, StaticRoiProvider, DEFAULT_BLOCK_SIZE};

    #[test]
    fn test_spec_parse() {
        let v = VersionUuid::random();
        let spec = RoiSpec::parse(&format!("somevol,{v}")).unwrap();
        assert_eq!(spec.name, InstanceName::from("somevol"));
        assert_eq!(spec.version, v);

        assert!(matches!(
            RoiSpec::parse("missing-comma"),
            Err(DatastoreError::BadRoiSpec(_))
        ));
        assert!(matches!(
            RoiSpec::parse("name,not-a-uuid"),
            Err(DatastoreError::BadRoiSpec(_))
        ));
    }

    #[test]
    fn test_voxel_membership() {
        let v = VersionUuid::random();
        let blocks = HashSet::from([BlockCoord::new(0, 0, 0), BlockCoord::new(1, 0, 0)]);
        let roi = ImmutableRoi::new("r".into(), v, DEFAULT_BLOCK_SIZE, blocks);

        assert!(roi.voxel_within(Point3d::new(0, 0, 0)));
        assert!(roi.voxel_within(Point3d::new(31, 31, 31)));
        assert!(roi.voxel_within(Point3d::new(32, 5, 5)));
        assert!(!roi.voxel_within(Point3d::new(64, 0, 0)));
        assert!(!roi.voxel_within(Point3d::new(0, 32, 0)));
        assert!(!roi.voxel_within(Point3d::new(-1, 0, 0)));
    }

    #[test]
    fn test_static_provider_lookup() {
        let v = VersionUuid::random();
        let mut provider = StaticRoiProvider::new();
        provider.register(ImmutableRoi::new(
            "known".into(),
            v,
            DEFAULT_BLOCK_SIZE,
            HashSet::new(),
        ));

        let found = provider.immutable_roi(&RoiSpec {
            name: "known".into(),
            version: v,
        });
        assert!(found.is_ok());

        let missing = provider.immutable_roi(&RoiSpec {
            name: "unknown".into(),
            version: v,
        });
        assert!(missing.is_err());
    }
}
