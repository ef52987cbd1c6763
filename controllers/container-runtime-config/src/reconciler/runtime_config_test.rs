//! Unit tests for the ContainerRuntimeConfig synchronizer

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::FORCE_SYNC_ON_UPGRADE_KEY;
    use crate::test_utils::*;
    use config_render::{ConfigManifest, PIDS_LIMIT_DROPIN_PATH, STORAGE_CONFIG_PATH};
    use crds::well_known::{GENERATED_BY_CONTROLLER_VERSION_ANNOTATION, MACHINE_CONFIG_ROLE_LABEL, MC_NAME_SUFFIX_ANNOTATION};
    use crds::{ContainerRuntimeConfigConditionType, LabelSelector, MachineConfig, MachineConfigSpec};
    use kube::ResourceExt;

    const WORKER_KEY: &str = "99-worker-generated-containerruntime";

    fn manifest(mc: &MachineConfig) -> ConfigManifest {
        ConfigManifest::from_value(&mc.spec.config).unwrap()
    }

    #[tokio::test]
    async fn test_pids_limit_end_to_end() {
        let store = seeded_store(&["worker"]);
        store.add_runtime_config(create_test_runtime_config("set-pids", "worker"));
        let reconciler = test_reconciler(&store);

        reconciler.sync_container_runtime_config("set-pids").await.unwrap();

        let mc = store.machine_config(WORKER_KEY).expect("MachineConfig should be created");
        let pids = manifest(&mc).file(PIDS_LIMIT_DROPIN_PATH).unwrap().decoded_text().unwrap();
        assert!(pids.contains("pids_limit = 2048"));
        assert!(manifest(&mc).file(STORAGE_CONFIG_PATH).is_none());
        assert_eq!(
            mc.annotations().get(GENERATED_BY_CONTROLLER_VERSION_ANNOTATION).map(String::as_str),
            Some(TEST_BUILD_VERSION)
        );
        assert_eq!(mc.labels().get(MACHINE_CONFIG_ROLE_LABEL).map(String::as_str), Some("worker"));

        let owner = &mc.owner_references()[0];
        assert_eq!(owner.kind, "ContainerRuntimeConfig");
        assert_eq!(owner.name, "set-pids");
        assert_eq!(owner.controller, Some(true));

        let cfg = store.runtime_config("set-pids").unwrap();
        assert_eq!(cfg.finalizers(), &[WORKER_KEY.to_string()]);
        assert_eq!(cfg.annotations().get(MC_NAME_SUFFIX_ANNOTATION).map(String::as_str), Some(""));
        let status = cfg.status.as_ref().unwrap();
        assert_eq!(status.observed_generation, cfg.metadata.generation);
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].type_, ContainerRuntimeConfigConditionType::Success);

        assert_eq!(
            store.writes(),
            vec![
                "update ContainerRuntimeConfig/set-pids".to_string(),
                format!("create MachineConfig/{}", WORKER_KEY),
                "patch ContainerRuntimeConfig/set-pids".to_string(),
                "update ContainerRuntimeConfig/set-pids/status".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_second_pass_writes_nothing() {
        let store = seeded_store(&["worker"]);
        store.add_runtime_config(create_test_runtime_config("set-pids", "worker"));
        let reconciler = test_reconciler(&store);

        reconciler.sync_container_runtime_config("set-pids").await.unwrap();
        store.clear_writes();
        reconciler.sync_container_runtime_config("set-pids").await.unwrap();

        assert_eq!(store.writes(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_namespaced_key_is_accepted() {
        let store = seeded_store(&["worker"]);
        store.add_runtime_config(create_test_runtime_config("set-pids", "worker"));
        let reconciler = test_reconciler(&store);

        reconciler.sync_container_runtime_config("default/set-pids").await.unwrap();
        assert!(store.machine_config(WORKER_KEY).is_some());
    }

    #[tokio::test]
    async fn test_spec_edit_regenerates() {
        let store = seeded_store(&["worker"]);
        store.add_runtime_config(create_test_runtime_config("set-pids", "worker"));
        let reconciler = test_reconciler(&store);
        reconciler.sync_container_runtime_config("set-pids").await.unwrap();

        store.edit_runtime_config("set-pids", |cfg| {
            if let Some(settings) = cfg.spec.container_runtime_config.as_mut() {
                settings.pids_limit = Some(4096);
            }
        });
        reconciler.sync_container_runtime_config("set-pids").await.unwrap();

        let mc = store.machine_config(WORKER_KEY).unwrap();
        let pids = manifest(&mc).file(PIDS_LIMIT_DROPIN_PATH).unwrap().decoded_text().unwrap();
        assert!(pids.contains("pids_limit = 4096"));
        let cfg = store.runtime_config("set-pids").unwrap();
        assert_eq!(cfg.observed_generation(), 2);
        // same message: the condition is refreshed, not appended
        assert_eq!(cfg.status.unwrap().conditions.len(), 1);
    }

    #[tokio::test]
    async fn test_upgrade_rewrites_machine_config() {
        let store = seeded_store(&["worker"]);
        store.add_runtime_config(create_test_runtime_config("set-pids", "worker"));

        let old = test_reconciler_with(&store, config_render::TemplateRenderer::default(), "v1");
        old.sync_container_runtime_config("set-pids").await.unwrap();
        store.clear_writes();

        let new = test_reconciler_with(&store, config_render::TemplateRenderer::default(), "v2");
        new.sync_container_runtime_config("set-pids").await.unwrap();

        let mc = store.machine_config(WORKER_KEY).expect("upgraded MachineConfig must survive cleanup");
        assert_eq!(
            mc.annotations().get(GENERATED_BY_CONTROLLER_VERSION_ANNOTATION).map(String::as_str),
            Some("v2")
        );
        assert!(store.writes().contains(&format!("update MachineConfig/{}", WORKER_KEY)));
    }

    #[tokio::test]
    async fn test_missing_or_empty_selector_matches_nothing() {
        let store = seeded_store(&["worker", "master"]);
        let mut no_selector = create_test_runtime_config("none", "worker");
        no_selector.spec.machine_config_pool_selector = None;
        let mut empty_selector = create_test_runtime_config("empty", "worker");
        empty_selector.spec.machine_config_pool_selector = Some(LabelSelector::default());
        store.add_runtime_config(no_selector);
        store.add_runtime_config(empty_selector);
        let reconciler = test_reconciler(&store);

        for name in ["none", "empty"] {
            let err = reconciler.sync_container_runtime_config(name).await.unwrap_err();
            assert!(matches!(err, ControllerError::NoMatchingPools(_)));
            assert!(err.is_terminal());

            let cfg = store.runtime_config(name).unwrap();
            let condition = cfg.latest_condition().unwrap();
            assert_eq!(condition.type_, ContainerRuntimeConfigConditionType::Failure);
            assert!(condition.message.contains("could not find any MachineConfigPool"));
        }
        assert!(store.machine_config_names().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_failure_keeps_one_condition() {
        let store = seeded_store(&["worker"]);
        let mut cfg = create_test_runtime_config("bad", "worker");
        if let Some(settings) = cfg.spec.container_runtime_config.as_mut() {
            settings.log_level = Some("verbose".to_string());
        }
        store.add_runtime_config(cfg);
        let reconciler = test_reconciler(&store);

        for _ in 0..3 {
            let err = reconciler.sync_container_runtime_config("bad").await.unwrap_err();
            assert!(err.is_terminal());
        }
        let cfg = store.runtime_config("bad").unwrap();
        let conditions = &cfg.status.as_ref().unwrap().conditions;
        assert_eq!(conditions.len(), 1);
        assert!(conditions[0].message.starts_with("Error: invalid logLevel"));
        assert!(store.machine_config_names().is_empty());

        store.edit_runtime_config("bad", |cfg| {
            if let Some(settings) = cfg.spec.container_runtime_config.as_mut() {
                settings.log_level = Some("debug".to_string());
            }
        });
        reconciler.sync_container_runtime_config("bad").await.unwrap();
        let cfg = store.runtime_config("bad").unwrap();
        let conditions = &cfg.status.as_ref().unwrap().conditions;
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[1].type_, ContainerRuntimeConfigConditionType::Success);
    }

    #[tokio::test]
    async fn test_overlay_size_rewrites_storage_conf() {
        let store = seeded_store(&["worker"]);
        let mut cfg = create_test_runtime_config("overlay", "worker");
        if let Some(settings) = cfg.spec.container_runtime_config.as_mut() {
            settings.overlay_size = Some("10G".to_string());
        }
        store.add_runtime_config(cfg);
        let reconciler = test_reconciler(&store);

        reconciler.sync_container_runtime_config("overlay").await.unwrap();

        let mc = store.machine_config(WORKER_KEY).unwrap();
        let storage = manifest(&mc).file(STORAGE_CONFIG_PATH).unwrap().decoded_text().unwrap();
        assert!(storage.contains("size = \"10G\""));
        assert!(manifest(&mc).file(PIDS_LIMIT_DROPIN_PATH).is_some());
    }

    #[tokio::test]
    async fn test_storage_merge_failure_is_degraded_not_fatal() {
        let store = seeded_store(&["worker"]);
        let mut cfg = create_test_runtime_config("overlay", "worker");
        if let Some(settings) = cfg.spec.container_runtime_config.as_mut() {
            settings.overlay_size = Some("10G".to_string());
        }
        store.add_runtime_config(cfg);
        let reconciler = test_reconciler_with(&store, BrokenStorageRenderer, TEST_BUILD_VERSION);

        reconciler.sync_container_runtime_config("overlay").await.unwrap();

        let mc = store.machine_config(WORKER_KEY).unwrap();
        assert!(manifest(&mc).file(STORAGE_CONFIG_PATH).is_none());
        assert!(manifest(&mc).file(PIDS_LIMIT_DROPIN_PATH).is_some());

        let cfg = store.runtime_config("overlay").unwrap();
        let condition = cfg.latest_condition().unwrap();
        assert_eq!(condition.type_, ContainerRuntimeConfigConditionType::Failure);
        assert!(condition.message.starts_with("could not update storage config"));
    }

    #[tokio::test]
    async fn test_render_failure_is_retried() {
        let store = seeded_store(&["worker"]);
        store.add_runtime_config(create_test_runtime_config("set-pids", "worker"));
        let reconciler = test_reconciler_with(&store, FailingRenderer, TEST_BUILD_VERSION);

        let err = reconciler.sync_container_runtime_config("set-pids").await.unwrap_err();
        assert!(!err.is_terminal());
        let cfg = store.runtime_config("set-pids").unwrap();
        assert!(
            cfg.latest_condition()
                .unwrap()
                .message
                .starts_with("could not generate origin ContainerRuntime Configs")
        );
        assert!(store.machine_config_names().is_empty());
    }

    #[tokio::test]
    async fn test_missing_controller_config_is_transient() {
        let store = cluster_store::MockClusterStore::new();
        store.add_machine_config_pool(create_test_pool("worker"));
        store.add_runtime_config(create_test_runtime_config("set-pids", "worker"));
        let reconciler = test_reconciler(&store);

        let err = reconciler.sync_container_runtime_config("set-pids").await.unwrap_err();
        assert!(matches!(err, ControllerError::MissingObject { kind: "ControllerConfig", .. }));
        assert!(!err.is_terminal());
    }

    #[tokio::test]
    async fn test_deleted_config_is_a_no_op() {
        let store = seeded_store(&["worker"]);
        let reconciler = test_reconciler(&store);
        reconciler.sync_container_runtime_config("gone").await.unwrap();
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_two_configs_on_one_pool_get_distinct_suffixes() {
        let store = seeded_store(&["worker"]);
        store.add_runtime_config(create_test_runtime_config("first", "worker"));
        let reconciler = test_reconciler(&store);
        reconciler.sync_container_runtime_config("first").await.unwrap();

        store.add_runtime_config(create_test_runtime_config("second", "worker"));
        reconciler.sync_container_runtime_config("second").await.unwrap();

        assert_eq!(
            store.machine_config_names(),
            vec![WORKER_KEY.to_string(), format!("{}-1", WORKER_KEY)]
        );
        let second = store.runtime_config("second").unwrap();
        assert_eq!(second.annotations().get(MC_NAME_SUFFIX_ANNOTATION).map(String::as_str), Some("1"));
        assert_eq!(second.finalizers(), &[format!("{}-1", WORKER_KEY)]);

        // both keep their names on later passes
        store.clear_writes();
        reconciler.sync_container_runtime_config("first").await.unwrap();
        reconciler.sync_container_runtime_config("second").await.unwrap();
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_machine_configs_are_removed() {
        let store = seeded_store(&["worker"]);
        let mut stale = MachineConfig::new("99-infra-generated-containerruntime", MachineConfigSpec::default());
        stale
            .annotations_mut()
            .insert(GENERATED_BY_CONTROLLER_VERSION_ANNOTATION.to_string(), "old".to_string());
        store.add_machine_config(stale);
        let mut registries = MachineConfig::new("99-worker-generated-registries", MachineConfigSpec::default());
        registries
            .annotations_mut()
            .insert(GENERATED_BY_CONTROLLER_VERSION_ANNOTATION.to_string(), "old".to_string());
        store.add_machine_config(registries);
        store.add_runtime_config(create_test_runtime_config("set-pids", "worker"));
        let reconciler = test_reconciler(&store);

        reconciler.sync_container_runtime_config("set-pids").await.unwrap();

        assert_eq!(
            store.machine_config_names(),
            vec![WORKER_KEY.to_string(), "99-worker-generated-registries".to_string()]
        );
    }

    #[tokio::test]
    async fn test_stale_machine_config_delete_failure_is_recorded() {
        let store = seeded_store(&["worker"]);
        let mut stale = MachineConfig::new("99-infra-generated-containerruntime", MachineConfigSpec::default());
        stale
            .annotations_mut()
            .insert(GENERATED_BY_CONTROLLER_VERSION_ANNOTATION.to_string(), "old".to_string());
        store.add_machine_config(stale);
        store.add_runtime_config(create_test_runtime_config("set-pids", "worker"));
        store.fail_machine_config_deletes(1);
        let reconciler = test_reconciler(&store);

        let err = reconciler.sync_container_runtime_config("set-pids").await.unwrap_err();
        assert!(matches!(err, ControllerError::Reconciliation(_)));
        assert!(!err.is_terminal());

        let cfg = store.runtime_config("set-pids").unwrap();
        let condition = cfg.latest_condition().unwrap();
        assert_eq!(condition.type_, ContainerRuntimeConfigConditionType::Failure);
        assert!(condition.message.starts_with("could not delete stale MachineConfigs"));
        assert!(store.machine_config("99-infra-generated-containerruntime").is_some());

        // the next pass deletes it and clears the failure
        reconciler.sync_container_runtime_config("set-pids").await.unwrap();
        assert!(store.machine_config("99-infra-generated-containerruntime").is_none());
        assert_eq!(
            store.runtime_config("set-pids").unwrap().latest_condition().unwrap().type_,
            ContainerRuntimeConfigConditionType::Success
        );
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let store = seeded_store(&["worker"]);
        store.add_runtime_config(create_test_runtime_config("set-pids", "worker"));
        store.inject_conflicts(3);
        let reconciler = test_reconciler(&store);

        reconciler.sync_container_runtime_config("set-pids").await.unwrap();
        let cfg = store.runtime_config("set-pids").unwrap();
        assert_eq!(cfg.finalizers(), &[WORKER_KEY.to_string()]);
        assert_eq!(
            cfg.latest_condition().unwrap().type_,
            ContainerRuntimeConfigConditionType::Success
        );
    }

    #[tokio::test]
    async fn test_startup_key_runs_seccomp_rollout_once() {
        let store = seeded_store(&[]);
        store.add_machine_config_pool(create_test_builtin_pool("master"));
        store.add_machine_config_pool(create_test_builtin_pool("worker"));
        let reconciler = test_reconciler(&store);

        reconciler.sync_container_runtime_config(FORCE_SYNC_ON_UPGRADE_KEY).await.unwrap();
        assert_eq!(store.write_count(), 3);

        store.clear_writes();
        reconciler.sync_container_runtime_config(FORCE_SYNC_ON_UPGRADE_KEY).await.unwrap();
        assert_eq!(store.write_count(), 0);
    }
}
