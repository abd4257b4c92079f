//! Prints the CustomResourceDefinitions served by the controller as YAML.
//!
//! ```sh
//! cargo run --bin crdgen > config/crd/teams.yaml
//! ```

use kube::CustomResourceExt;
use tenancy_controller::crd::Team;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Team::crd())?);
    Ok(())
}
