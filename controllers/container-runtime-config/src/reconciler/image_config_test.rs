//! Unit tests for the Image config synchronizer

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::test_utils::*;
    use cluster_store::{ClusterStore, MockClusterStore};
    use config_render::{ConfigManifest, POLICY_CONFIG_PATH, REGISTRIES_CONFIG_PATH, TemplateRenderer};
    use crds::RegistrySources;
    use crds::well_known::GENERATED_BY_CONTROLLER_VERSION_ANNOTATION;
    use kube::ResourceExt;

    const MASTER_KEY: &str = "99-master-generated-registries";
    const WORKER_KEY: &str = "99-worker-generated-registries";

    fn image_store(sources: RegistrySources) -> MockClusterStore {
        let store = seeded_store(&["infra"]);
        store.add_machine_config_pool(create_test_builtin_pool("master"));
        store.add_machine_config_pool(create_test_builtin_pool("worker"));
        store.set_cluster_version(create_test_cluster_version(TEST_RELEASE_IMAGE));
        store.set_image_config(create_test_image(sources));
        store
    }

    fn manifest(store: &MockClusterStore, name: &str) -> ConfigManifest {
        let mc = store.machine_config(name).unwrap();
        ConfigManifest::from_value(&mc.spec.config).unwrap()
    }

    #[tokio::test]
    async fn test_insecure_registry_on_built_in_pools_only() {
        let store = image_store(RegistrySources {
            insecure_registries: vec!["registry.local:5000".to_string()],
            ..Default::default()
        });
        let reconciler = test_reconciler(&store);

        reconciler.sync_image_config("cluster").await.unwrap();

        assert_eq!(store.machine_config_names(), vec![MASTER_KEY.to_string(), WORKER_KEY.to_string()]);
        let worker = manifest(&store, WORKER_KEY);
        let registries = worker.file(REGISTRIES_CONFIG_PATH).unwrap().decoded_text().unwrap();
        assert!(registries.contains("registry.local:5000"));
        assert!(worker.file(POLICY_CONFIG_PATH).is_none());

        let mc = store.machine_config(WORKER_KEY).unwrap();
        assert_eq!(
            mc.annotations().get(GENERATED_BY_CONTROLLER_VERSION_ANNOTATION).map(String::as_str),
            Some(TEST_BUILD_VERSION)
        );
        let owner = &mc.owner_references()[0];
        assert_eq!(owner.kind, "Image");
        assert_eq!(owner.name, "cluster");
    }

    #[tokio::test]
    async fn test_release_registry_is_not_blocked() {
        let store = image_store(RegistrySources {
            blocked_registries: vec!["quay.io".to_string(), "docker.io".to_string()],
            ..Default::default()
        });
        let reconciler = test_reconciler(&store);

        reconciler.sync_image_config("cluster").await.unwrap();

        let master = manifest(&store, MASTER_KEY);
        let registries = master.file(REGISTRIES_CONFIG_PATH).unwrap().decoded_text().unwrap();
        assert!(!registries.contains("quay.io"));
        assert!(registries.contains("blocked = true"));

        let policy: serde_json::Value =
            serde_json::from_slice(&master.file(POLICY_CONFIG_PATH).unwrap().decoded_contents().unwrap()).unwrap();
        let blocked: Vec<&String> = policy["transports"]["docker"].as_object().unwrap().keys().collect();
        assert_eq!(blocked, vec!["docker.io"]);

        // the Image config itself is never rewritten
        let image = store
            .get_image_config("cluster")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(image.spec.registry_sources.blocked_registries.len(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_policy_is_not_rewritten() {
        let store = image_store(RegistrySources {
            allowed_registries: vec!["quay.io".to_string()],
            ..Default::default()
        });
        let reconciler = test_reconciler(&store);

        reconciler.sync_image_config("cluster").await.unwrap();
        store.clear_writes();
        reconciler.sync_image_config("cluster").await.unwrap();
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_new_build_rewrites_identical_payload() {
        let store = image_store(RegistrySources {
            container_runtime_search_registries: vec!["docker.io".to_string()],
            ..Default::default()
        });
        test_reconciler_with(&store, TemplateRenderer::default(), "v1")
            .sync_image_config("cluster")
            .await
            .unwrap();
        store.clear_writes();

        test_reconciler_with(&store, TemplateRenderer::default(), "v2")
            .sync_image_config("cluster")
            .await
            .unwrap();

        assert_eq!(
            store.writes(),
            vec![format!("update MachineConfig/{}", MASTER_KEY), format!("update MachineConfig/{}", WORKER_KEY)]
        );
        let mc = store.machine_config(MASTER_KEY).unwrap();
        assert_eq!(
            mc.annotations().get(GENERATED_BY_CONTROLLER_VERSION_ANNOTATION).map(String::as_str),
            Some("v2")
        );
    }

    #[tokio::test]
    async fn test_missing_inputs() {
        // no Image config: nothing to do
        let store = seeded_store(&[]);
        store.add_machine_config_pool(create_test_builtin_pool("worker"));
        store.set_cluster_version(create_test_cluster_version(TEST_RELEASE_IMAGE));
        test_reconciler(&store).sync_image_config("cluster").await.unwrap();
        assert_eq!(store.write_count(), 0);

        // no ClusterVersion: nothing to do
        let store = seeded_store(&[]);
        store.add_machine_config_pool(create_test_builtin_pool("worker"));
        store.set_image_config(create_test_image(RegistrySources::default()));
        test_reconciler(&store).sync_image_config("cluster").await.unwrap();
        assert_eq!(store.write_count(), 0);

        // no ControllerConfig: retried
        let store = MockClusterStore::new();
        store.set_image_config(create_test_image(RegistrySources::default()));
        store.set_cluster_version(create_test_cluster_version(TEST_RELEASE_IMAGE));
        let err = test_reconciler(&store).sync_image_config("cluster").await.unwrap_err();
        assert!(matches!(err, ControllerError::MissingObject { .. }));
    }

    #[tokio::test]
    async fn test_missing_release_image_is_fine_when_nothing_is_blocked() {
        let store = image_store(RegistrySources {
            insecure_registries: vec!["registry.local:5000".to_string()],
            ..Default::default()
        });
        store.set_cluster_version(create_test_cluster_version(""));
        let reconciler = test_reconciler(&store);

        reconciler.sync_image_config("cluster").await.unwrap();

        assert_eq!(store.machine_config_names(), vec![MASTER_KEY.to_string(), WORKER_KEY.to_string()]);
        let registries = manifest(&store, WORKER_KEY)
            .file(REGISTRIES_CONFIG_PATH)
            .unwrap()
            .decoded_text()
            .unwrap();
        assert!(registries.contains("registry.local:5000"));
    }

    #[tokio::test]
    async fn test_unparsable_release_image_fails() {
        let store = image_store(RegistrySources {
            blocked_registries: vec!["docker.io".to_string()],
            ..Default::default()
        });
        store.set_cluster_version(create_test_cluster_version("Not A Reference"));
        let reconciler = test_reconciler(&store);

        let err = reconciler.sync_image_config("cluster").await.unwrap_err();
        assert!(matches!(err, ControllerError::ReleaseImageParse(_)));
        assert!(store.machine_config_names().is_empty());
    }
}
