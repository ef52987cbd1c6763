//! Print the CRD manifests for every resource type as a YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen > deploy/crds.yaml`

use crds::{
    ClusterVersion, ContainerRuntimeConfig, ControllerConfig, Image, ImageContentSourcePolicy,
    MachineConfig, MachineConfigPool,
};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        ContainerRuntimeConfig::crd(),
        MachineConfig::crd(),
        MachineConfigPool::crd(),
        ControllerConfig::crd(),
        Image::crd(),
        ClusterVersion::crd(),
        ImageContentSourcePolicy::crd(),
    ];

    for crd in crds {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }

    Ok(())
}
