use ipam_types::*;
use kube::CustomResourceExt;
use std::fs;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/networking.gke.io_network_crd.yaml",
        serde_yaml::to_string(&Network::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/networking.gke.io_gkenetworkparamset_crd.yaml",
        serde_yaml::to_string(&GKENetworkParamSet::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/networking.gke.io_nodetopology_crd.yaml",
        serde_yaml::to_string(&NodeTopology::crd()).unwrap(),
    )
    .unwrap();
}
