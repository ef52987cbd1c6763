//! Well-known labels, annotations and object names shared by the controller
//! and its bootstrap tooling.

/// Annotation on generated `MachineConfig`s recording the controller build that produced them
pub const GENERATED_BY_CONTROLLER_VERSION_ANNOTATION: &str =
    "machineconfiguration.openshift.io/generated-by-controller-version";

/// Annotation on a `ContainerRuntimeConfig` recording the suffix of its `MachineConfig` name
pub const MC_NAME_SUFFIX_ANNOTATION: &str = "machineconfiguration.openshift.io/mc-name-suffix";

/// Label carried by the built-in pools (`master`, `worker`)
pub const BUILT_IN_POOL_LABEL: &str = "machineconfiguration.openshift.io/mco-built-in";

/// Label tying a `MachineConfig` to the pool role it targets
pub const MACHINE_CONFIG_ROLE_LABEL: &str = "machineconfiguration.openshift.io/role";

/// Name of the cluster-wide `Image` config singleton
pub const IMAGE_CONFIG_NAME: &str = "cluster";

/// Name of the `ClusterVersion` singleton
pub const CLUSTER_VERSION_NAME: &str = "version";

/// Name of the `ControllerConfig` singleton
pub const CONTROLLER_CONFIG_NAME: &str = "machine-config-controller";

/// Marker `ConfigMap` recording that the seccomp default `MachineConfig`s were created
pub const SECCOMP_USE_DEFAULT_MARKER: &str = "crio-seccomp-use-default-when-empty";
