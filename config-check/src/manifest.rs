//! Manifests for the short-lived objects one config check creates.
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::distributions::Uniform;
use rand::Rng;
use serde_json::{json, Value};

pub const CONFIG_FILE: &str = "config.json";
pub const COMPRESSED_CONFIG_FILE: &str = "config.json.gz";
pub const CONFIG_DIR: &str = "/etc/vector/";
const ARCHIVE_DIR: &str = "/tmp/archive";
const SUFFIX_LEN: usize = 5;

pub fn check_labels() -> Value {
    json!({
        "app.kubernetes.io/managed-by": "vector-operator",
        "app.kubernetes.io/name": "vector-configcheck",
        "app.kubernetes.io/component": "ConfigCheck",
        "vector.dev/exclude": "true",
    })
}

/// Five random lowercase letters, fresh for every run.
pub fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(Uniform::new_inclusive(b'a', b'z'))
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect()
}

/// Names and images for one check run. Every object of the run shares `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResources {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub unpack_image: String,
    pub compressed: bool,
}

impl CheckResources {
    pub fn new(
        instance: &str,
        suffix: &str,
        namespace: &str,
        image: &str,
        unpack_image: &str,
        compressed: bool,
    ) -> Self {
        Self {
            name: format!("configcheck-{instance}-{suffix}"),
            namespace: namespace.to_owned(),
            image: image.to_owned(),
            unpack_image: unpack_image.to_owned(),
            compressed,
        }
    }

    fn metadata(&self) -> Value {
        json!({
            "name": self.name,
            "namespace": self.namespace,
            "labels": check_labels(),
        })
    }

    pub fn config_file(&self) -> &'static str {
        if self.compressed {
            COMPRESSED_CONFIG_FILE
        } else {
            CONFIG_FILE
        }
    }

    pub fn service_account(&self) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": self.metadata(),
        })
    }

    pub fn secret(&self, payload: &[u8]) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": self.metadata(),
            "data": { self.config_file(): STANDARD.encode(payload) },
        })
    }

    pub fn pod(&self) -> Value {
        let mut volumes = vec![
            json!({ "name": "data", "emptyDir": {} }),
            host_path_volume("var-log", "/var/log/"),
            host_path_volume("var-lib", "/var/lib/"),
            host_path_volume("procfs", "/proc"),
            host_path_volume("sysfs", "/sys"),
        ];
        let mut init_containers = Vec::new();

        if self.compressed {
            volumes.push(json!({ "name": "config", "emptyDir": {} }));
            volumes.push(json!({
                "name": "config-archive",
                "secret": { "secretName": self.name }
            }));
            let archive = format!("{ARCHIVE_DIR}/{COMPRESSED_CONFIG_FILE}");
            let unpack = format!("gunzip -c {archive} > {CONFIG_DIR}{CONFIG_FILE}");
            init_containers.push(json!({
                "name": "unpack-config",
                "image": self.unpack_image,
                "command": ["sh", "-c", unpack],
                "volumeMounts": [
                    { "name": "config", "mountPath": CONFIG_DIR },
                    { "name": "config-archive", "mountPath": ARCHIVE_DIR },
                ],
            }));
        } else {
            volumes.push(json!({ "name": "config", "secret": { "secretName": self.name } }));
        }

        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": self.metadata(),
            "spec": {
                "serviceAccountName": self.name,
                "restartPolicy": "Never",
                "volumes": volumes,
                "initContainers": init_containers,
                "containers": [{
                    "name": "config-check",
                    "image": self.image,
                    "args": ["--require-healthy=false", "validate", format!("{CONFIG_DIR}*.json")],
                    "env": [
                        field_ref_env("VECTOR_SELF_NODE_NAME", "spec.nodeName"),
                        field_ref_env("VECTOR_SELF_POD_NAME", "metadata.name"),
                        field_ref_env("VECTOR_SELF_POD_NAMESPACE", "metadata.namespace"),
                        { "name": "PROCFS_ROOT", "value": "/host/proc" },
                        { "name": "SYSFS_ROOT", "value": "/host/sys" },
                    ],
                    "volumeMounts": [
                        { "name": "config", "mountPath": CONFIG_DIR },
                        { "name": "data", "mountPath": "/vector-data-dir" },
                        { "name": "var-log", "mountPath": "/var/log/" },
                        { "name": "var-lib", "mountPath": "/var/lib/" },
                        { "name": "procfs", "mountPath": "/host/proc" },
                        { "name": "sysfs", "mountPath": "/host/sys" },
                    ],
                }],
            },
        })
    }
}

fn host_path_volume(name: &str, path: &str) -> Value {
    json!({ "name": name, "hostPath": { "path": path } })
}

fn field_ref_env(name: &str, field_path: &str) -> Value {
    json!({
        "name": name,
        "valueFrom": { "fieldRef": { "apiVersion": "v1", "fieldPath": field_path } },
    })
}
