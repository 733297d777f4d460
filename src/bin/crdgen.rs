use kube::CustomResourceExt;
use shard_drain_k8s::crd::ReplicatedShard;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&ReplicatedShard::crd())?);
    Ok(())
}
