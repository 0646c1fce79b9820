//! v1Alpha1 CRD resources

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How label changes are written to the target resource
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum PatchStrategy {
    /// Server-side apply of the full desired label map, owned by the field manager
    #[default]
    Apply,
    /// RFC 6902 patch computed from the previously applied and the desired labels
    JsonPatch,
}

/// Name and namespace of the resource to label
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetMetadata {
    /// Name of the target resource
    #[schemars(length(min = 1, max = 253))]
    pub name: String,
    /// Namespace of the target resource, `default` is used for namespaced kinds when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Spec object for the `LabelSet` CRD
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[serde(rename_all = "camelCase")]
#[kube(kind = "LabelSet", group = "labelkeeper.dev", version = "v1alpha1")]
#[kube(status = "LabelSetStatus", shortname = "lbs")]
#[kube(namespaced)]
#[kube(printcolumn = r#"{"name":"Kind","type":"string","jsonPath":".spec.kind"}"#)]
#[kube(printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.metadata.name"}"#)]
#[kube(printcolumn = r#"{"name":"Strategy","type":"string","jsonPath":".spec.patchStrategy"}"#)]
pub struct LabelSetSpec {
    /// The apiVersion of the resource to label (e.g., "v1", "apps/v1", "cert-manager.io/v1")
    #[schemars(length(min = 1, max = 253))]
    #[schemars(regex(
        pattern = r"^([a-z0-9]([a-z0-9.-]*[a-z0-9])?/)?[a-z0-9]([a-z0-9-]*[a-z0-9])?$"
    ))]
    pub api_version: String,
    /// The kind of the resource to label (e.g., "ConfigMap", "Deployment")
    #[schemars(length(min = 1, max = 63))]
    #[schemars(regex(pattern = r"^[A-Z][a-zA-Z0-9]*$"))]
    pub kind: String,
    /// Identifies the resource to label
    pub metadata: TargetMetadata,
    /// Labels to apply to the resource
    pub labels: BTreeMap<String, String>,
    /// Force overwriting labels that were created or edited by another field manager
    #[serde(default)]
    pub force: bool,
    /// Patch mode used to write the labels
    #[serde(default)]
    pub patch_strategy: PatchStrategy,
}

impl LabelSetSpec {
    /// Target resource described by this spec
    #[must_use]
    pub fn target(&self) -> TargetDescriptor {
        TargetDescriptor {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.metadata.name.clone(),
            namespace: self.metadata.namespace.clone(),
        }
    }
}

/// Fully describes a labeled resource, it never changes for the lifetime of a record
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetDescriptor {
    /// Target apiVersion
    pub api_version: String,
    /// Target kind
    pub kind: String,
    /// Target name
    pub name: String,
    /// Target namespace as configured, before any defaulting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// State object for the `LabelSet` CRD
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSetStatus {
    /// Identifier of the management record, absent until labels were first applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The resource the labels were applied to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetDescriptor>,
    /// Managed labels as last read from the target
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Labels sent by the last successful update
    #[serde(default)]
    pub applied_labels: BTreeMap<String, String>,
    /// Generation of the `LabelSet` the status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
