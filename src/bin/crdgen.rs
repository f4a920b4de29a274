use kube::CustomResourceExt;
use pvc_remediator::crd::RemediationPolicy;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&RemediationPolicy::crd())?);
    Ok(())
}
