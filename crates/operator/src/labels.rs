//! Label bookkeeping: field ownership, apply bodies and JSON patch diffs

use std::collections::{BTreeMap, BTreeSet};

use json_patch::jsonptr::PointerBuf;
use json_patch::{AddOperation, Patch, PatchOperation, RemoveOperation, ReplaceOperation};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ManagedFieldsEntry;
use labelkeeper_crd::TargetDescriptor;
use serde_json::{Value, json};

/// Label keys owned by `manager` according to the object's managed fields.
///
/// When several entries belong to the manager, the last one that tracks labels wins.
#[must_use]
pub fn managed_labels(managed_fields: &[ManagedFieldsEntry], manager: &str) -> BTreeSet<String> {
    let mut owned = BTreeSet::new();

    for entry in managed_fields {
        if entry.manager.as_deref() != Some(manager) {
            continue;
        }
        let Some(fields) = &entry.fields_v1 else {
            continue;
        };
        if let Some(labels) = fields
            .0
            .get("f:metadata")
            .and_then(|m| m.get("f:labels"))
            .and_then(Value::as_object)
        {
            owned = labels
                .keys()
                .filter_map(|k| k.strip_prefix("f:"))
                .map(str::to_string)
                .collect();
        }
    }

    owned
}

/// Drops remote labels that are neither configured nor owned by this tool.
#[must_use]
pub fn retain_managed(
    mut remote: BTreeMap<String, String>,
    managed: &BTreeSet<String>,
    configured: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    remote.retain(|k, _| managed.contains(k) || configured.contains_key(k));
    remote
}

/// Server-side apply object carrying only identity and labels.
///
/// `namespace` must already be resolved; it is omitted for cluster scoped kinds.
#[must_use]
pub fn apply_patch_body(
    target: &TargetDescriptor,
    namespace: Option<&str>,
    labels: &BTreeMap<String, String>,
) -> Value {
    let mut metadata = json!({
        "name": target.name,
        "labels": labels,
    });
    if let Some(ns) = namespace {
        metadata["namespace"] = json!(ns);
    }

    json!({
        "apiVersion": target.api_version,
        "kind": target.kind,
        "metadata": metadata,
    })
}

/// RFC 6902 operations turning the `old` label map into `new` on an object whose current
/// labels are `remote` (`None` when the object has no label map).
///
/// Keys only in `old` are removed if the object still carries them. Changed values are
/// replaced when present and added otherwise, as are new keys and unchanged keys that were
/// removed from the object since. When the object has no label map and something is added,
/// the map is created first.
#[must_use]
pub fn label_diff(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
    remote: Option<&BTreeMap<String, String>>,
) -> Patch {
    let present = |key: &str| remote.is_some_and(|labels| labels.contains_key(key));
    let mut ops = Vec::new();
    let mut additions = Vec::new();

    for key in old.keys().filter(|k| !new.contains_key(*k) && present(k.as_str())) {
        ops.push(PatchOperation::Remove(RemoveOperation {
            path: label_pointer(key),
        }));
    }

    for (key, value) in new {
        let previous = old.get(key);
        if previous == Some(value) && present(key) {
            continue;
        }

        let path = label_pointer(key);
        let value = Value::String(value.clone());
        if previous.is_some() && present(key) {
            ops.push(PatchOperation::Replace(ReplaceOperation { path, value }));
        } else {
            additions.push(PatchOperation::Add(AddOperation { path, value }));
        }
    }

    if !additions.is_empty() && remote.is_none() {
        ops.push(PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["metadata", "labels"]),
            value: Value::Object(serde_json::Map::new()),
        }));
    }
    ops.extend(additions);

    Patch(ops)
}

fn label_pointer(key: &str) -> PointerBuf {
    PointerBuf::from_tokens(["metadata", "labels", key])
}
