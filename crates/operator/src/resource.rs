// Copyright 2025 Labelkeeper Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of a label management record.
//!
//! A record points at an existing resource and owns a subset of its labels. `create`,
//! `update` and `delete` all funnel into a single patch routine, `read` refreshes the
//! record from the cluster.

use std::collections::BTreeMap;

use kube::Client;
use kube::api::{Patch, PatchParams};
use labelkeeper_crd::{LabelSetSpec, LabelSetStatus, PatchStrategy, TargetDescriptor};
use tracing::{debug, info, instrument};

use crate::labels::{apply_patch_body, label_diff, managed_labels, retain_managed};
use crate::resolver::resolve;
use crate::Result;

/// Typed attribute storage of one management record
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceData {
    /// Record identifier, `None` before creation and once deleted
    pub id: Option<String>,
    /// Resource whose labels are managed
    pub target: TargetDescriptor,
    /// Desired labels, replaced by the managed labels after every read
    pub labels: BTreeMap<String, String>,
    /// Take over labels owned by other field managers (apply strategy only)
    pub force: bool,
    /// Patch mode
    pub strategy: PatchStrategy,
    /// Labels sent by the last update, the base of the next JSON patch diff
    pub applied_labels: BTreeMap<String, String>,
}

impl ResourceData {
    /// Record described by a `LabelSet` spec and the state stored in its status
    #[must_use]
    pub fn from_parts(spec: &LabelSetSpec, status: &LabelSetStatus) -> Self {
        Self {
            id: status.id.clone(),
            target: spec.target(),
            labels: spec.labels.clone(),
            force: spec.force,
            strategy: spec.patch_strategy,
            applied_labels: status.applied_labels.clone(),
        }
    }
}

/// Identifier of a record managing labels on `target`
#[must_use]
pub fn record_id(target: &TargetDescriptor) -> String {
    let mut id = format!(
        "apiVersion={},kind={},name={}",
        target.api_version, target.kind, target.name
    );
    if let Some(ns) = target.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        id.push_str(",namespace=");
        id.push_str(ns);
    }
    id
}

/// Create/read/update/delete of label records against the cluster
#[derive(Clone)]
pub struct LabelsResource {
    client: Client,
    field_manager: String,
}

impl LabelsResource {
    /// Binds the lifecycle to a client and field manager identity
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    /// Assigns the record identifier and applies the desired labels.
    ///
    /// # Errors
    ///
    /// See [`LabelsResource::update`].
    #[instrument(skip(self, data), fields(target = %record_id(&data.target)))]
    pub async fn create(&self, data: &mut ResourceData) -> Result<()> {
        data.id = Some(record_id(&data.target));
        info!("creating label record");
        self.update(data).await
    }

    /// Refreshes `data.labels` from the target.
    ///
    /// With [`PatchStrategy::Apply`] only labels that are configured or owned by the field
    /// manager are kept; [`PatchStrategy::JsonPatch`] keeps the remote map as is.
    ///
    /// # Errors
    ///
    /// Propagates resolution and `get` failures unmodified, including a missing target.
    #[instrument(skip(self, data), fields(target = %record_id(&data.target)))]
    pub async fn read(&self, data: &mut ResourceData) -> Result<()> {
        let resolved = resolve(&self.client, &data.target).await?;
        let object = resolved.api.get(&data.target.name).await?;
        let remote = object.metadata.labels.unwrap_or_default();

        data.labels = match data.strategy {
            PatchStrategy::Apply => {
                let owned = managed_labels(
                    object.metadata.managed_fields.as_deref().unwrap_or_default(),
                    &self.field_manager,
                );
                retain_managed(remote, &owned, &data.labels)
            }
            PatchStrategy::JsonPatch => remote,
        };

        debug!(labels = data.labels.len(), "read target labels");
        Ok(())
    }

    /// Writes the desired labels to the target with a single patch, then reads them back.
    ///
    /// A record without identifier is being deleted and writes an empty label set. The
    /// target is fetched first so a missing object fails with not found and is never
    /// patched.
    ///
    /// # Errors
    ///
    /// Propagates resolution, patch and serialization failures unmodified.
    #[instrument(skip(self, data), fields(
        target = %record_id(&data.target),
        strategy = ?data.strategy,
        force = data.force,
    ))]
    pub async fn update(&self, data: &mut ResourceData) -> Result<()> {
        let resolved = resolve(&self.client, &data.target).await?;
        let name = data.target.name.as_str();
        // apply would create a missing target
        let current = resolved.api.get(name).await?;

        let desired = if data.id.is_some() {
            data.labels.clone()
        } else {
            BTreeMap::new()
        };

        match data.strategy {
            PatchStrategy::Apply => {
                let body = apply_patch_body(&data.target, resolved.namespace.as_deref(), &desired);
                let mut params = PatchParams::apply(&self.field_manager);
                if data.force {
                    params = params.force();
                }

                resolved.api.patch(name, &params, &Patch::Apply(&body)).await?;
            }
            PatchStrategy::JsonPatch => {
                let patch = label_diff(
                    &data.applied_labels,
                    &desired,
                    current.metadata.labels.as_ref(),
                );
                debug!(operations = patch.0.len(), "computed label diff");

                let params = PatchParams {
                    field_manager: Some(self.field_manager.clone()),
                    ..PatchParams::default()
                };
                resolved.api.patch(name, &params, &Patch::Json::<()>(patch)).await?;
            }
        }

        info!(labels = desired.len(), "patched target labels");
        data.applied_labels = desired;

        self.read(data).await
    }

    /// Clears the identifier and removes the labels this record owns.
    ///
    /// # Errors
    ///
    /// See [`LabelsResource::update`].
    #[instrument(skip(self, data), fields(target = %record_id(&data.target)))]
    pub async fn delete(&self, data: &mut ResourceData) -> Result<()> {
        data.id = None;
        info!("releasing label record");
        self.update(data).await
    }
}
