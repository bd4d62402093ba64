use rollop_remote_sync::crd::RemoteSync;
use rollop_rollout::crd::{ProgressiveRolloutStrategy, Rollout};

use kube::CustomResourceExt;

fn main() {
    for crd in vec![
        Rollout::crd(),
        ProgressiveRolloutStrategy::crd(),
        RemoteSync::crd(),
    ] {
        // safe unwrap: we know CRD is serializable
        print!("---\n{}\n", serde_yaml::to_string(&crd).unwrap());
    }
}
