//! Generates yaml CRD resources from rust code.
//! Writes into `CRDS_DIR` when it is set, otherwise prints to stdout.
use std::{fs::File, io::Write, path};

use kube::CustomResourceExt;
use labelkeeper_crd::LabelSet;

#[allow(clippy::unwrap_used)]
fn main() {
    let schema = serde_yaml::to_string(&LabelSet::crd()).unwrap();

    match std::env::var_os("CRDS_DIR") {
        Some(dir) => {
            let crd_path = path::Path::new(&dir).join("labelset-crd.yaml");
            let mut file = File::create(crd_path).unwrap();
            file.write_all(schema.as_bytes()).unwrap();
        }
        None => print!("{schema}"),
    }
}
