//! Print the PatroniCluster CustomResourceDefinition as YAML
//!
//! `cargo run --bin crdgen > deploy/crd.yaml`

use kube::CustomResourceExt;
use patroni_operator::PatroniCluster;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", serde_yaml::to_string(&PatroniCluster::crd())?);
    Ok(())
}
