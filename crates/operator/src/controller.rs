use std::sync::Arc;
use std::time::Duration;

use crate::resource::{LabelsResource, ResourceData, record_id};
use crate::{Error, Result, Settings, telemetry};
use futures::StreamExt;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::chrono::Utc;
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::Controller;
use kube::runtime::events::{Event, EventType, Recorder};
use kube::runtime::finalizer::{Event as Finalizer, finalizer};
use kube::runtime::watcher::Config;
use kube::{Api, Resource, ResourceExt};
use kube::{Client, runtime::controller::Action};
use labelkeeper_crd::{LabelSet, LabelSetSpec, LabelSetStatus, TargetDescriptor};
use serde_json::json;
use tokio::sync::{RwLock, watch};
use tracing::{Span, debug, error, field, info, instrument, warn};

use crate::diagnostics::Diagnostics;

/// Finalizer guarding the release of labels before a `LabelSet` disappears
pub const FINALIZER: &str = "labelsets.labelkeeper.dev/cleanup";

/// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Diagnostics that contains the traces metrics and kube event recorder
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Kubernetes event emitter
    pub recorder: Recorder,
    /// Operator settings
    pub settings: Settings,
}

impl Context {
    fn labels_resource(&self) -> LabelsResource {
        LabelsResource::new(self.client.clone(), &self.settings.field_manager)
    }
}

/// Holds the state of the whole application
#[derive(Clone, Default)]
pub struct State {
    /// Atomic lock for kubernetes diagnostics
    pub diagnostics: Arc<RwLock<Diagnostics>>,
}

impl State {
    /// Getter for diagnostics with read lock
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    /// Converts the application state to controller context
    pub async fn to_ctrl_context(&self, client: Client, settings: Settings) -> Arc<Context> {
        Arc::new(Context {
            recorder: self.diagnostics.read().await.recorder(client.clone()),
            client,
            diagnostics: self.diagnostics.clone(),
            settings,
        })
    }
}

/// Runs the controller while `leader` reports leadership (given the crd is installed).
///
/// Returns when the controller shuts down on a signal or leadership is lost.
///
/// # Errors
///
/// Fails when the `LabelSet` CRD cannot be listed.
#[instrument(skip_all)]
pub async fn run(
    state: State,
    client: Client,
    settings: Settings,
    mut leader: watch::Receiver<bool>,
) -> Result<()> {
    info!("initializing labelkeeper controller");

    let label_sets: Api<LabelSet> = match &settings.watch_namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    if let Err(e) = label_sets.list(&ListParams::default().limit(1)).await {
        error!(
            error = %e,
            "failed to list labelset resources, CRD may not be installed"
        );
        return Err(e.into());
    }

    info!("labelset CRD verified, waiting for leadership");

    if leader.wait_for(|is_leader| *is_leader).await.is_err() {
        warn!("leader election stopped before leadership was acquired");
        return Ok(());
    }

    info!(
        namespace = settings.watch_namespace.as_deref(),
        "leadership acquired, starting controller"
    );

    let ctx = state.to_ctrl_context(client, settings).await;
    let controller = Controller::new(label_sets, Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()));

    tokio::select! {
        () = controller => info!("controller shutdown complete"),
        _ = leader.wait_for(|is_leader| !*is_leader) => warn!("leadership lost, stopping controller"),
    }

    Ok(())
}

#[instrument(skip(doc, ctx), fields(
    labelset_name = %doc.name_any(),
    labelset_namespace = doc.namespace().as_deref(),
    target_api_version = %doc.spec.api_version,
    target_kind = %doc.spec.kind,
    target_name = %doc.spec.metadata.name,
    trace_id = field::Empty,
))]
#[allow(clippy::needless_pass_by_value)]
async fn reconcile(doc: Arc<LabelSet>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    if trace_id != opentelemetry::trace::TraceId::INVALID {
        Span::current().record("trace_id", field::display(&trace_id));
    }

    let ns = doc
        .namespace()
        .ok_or_else(|| Error::from("Unable to get labelset namespace".to_string()))?;
    let api: Api<LabelSet> = Api::namespaced(ctx.client.clone(), &ns);

    finalizer(&api, FINALIZER, doc, |event| async {
        match event {
            Finalizer::Apply(doc) => apply(&doc, &ctx).await,
            Finalizer::Cleanup(doc) => cleanup(&doc, &ctx).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

/// Creates or updates the label record of `doc` and stores the outcome in its status.
async fn apply(doc: &LabelSet, ctx: &Context) -> Result<Action> {
    info!("starting reconciliation");

    let status = doc.status.clone().unwrap_or_default();
    let data = sync_record(&ctx.labels_resource(), &doc.spec, &status).await?;

    flush_state_to_api(doc, ctx, &data).await?;

    publish_event(
        &ctx.recorder,
        EventType::Normal,
        "LabelsApplied",
        "Labeling",
        Some(format!(
            "Manages {} label(s) on {} {}",
            data.applied_labels.len(),
            data.target.kind,
            data.target.name
        )),
        &doc.object_ref(&()),
    )
    .await;

    {
        let mut diag = ctx.diagnostics.write().await;
        diag.last_event = Utc::now();
        diag.records_applied += 1;
    }

    let requeue = ctx.settings.requeue_interval;
    info!(
        managed_labels = data.labels.len(),
        requeue_after_secs = requeue.as_secs(),
        "reconciliation completed successfully"
    );

    Ok(Action::requeue(requeue))
}

/// Brings the record described by `spec` in line with the cluster.
///
/// A record whose target changed releases the previous target and is created anew.
async fn sync_record(
    resource: &LabelsResource,
    spec: &LabelSetSpec,
    status: &LabelSetStatus,
) -> Result<ResourceData> {
    let mut data = ResourceData::from_parts(spec, status);

    if let Some(previous) = replaced_target(spec, status) {
        info!(
            previous_target = %record_id(&previous),
            "target changed, releasing labels of the previous target"
        );
        let mut old = ResourceData {
            target: previous,
            ..data.clone()
        };
        release(resource, &mut old).await?;
        data.id = None;
        data.applied_labels.clear();
    }

    if data.id.is_none() {
        resource.create(&mut data).await?;
    } else {
        resource.update(&mut data).await?;
    }

    Ok(data)
}

/// Releases the labels of a `LabelSet` that is being deleted.
async fn cleanup(doc: &LabelSet, ctx: &Context) -> Result<Action> {
    let Some(status) = doc.status.as_ref() else {
        debug!("labels were never applied, nothing to release");
        return Ok(Action::await_change());
    };
    let Some(target) = status.target.clone() else {
        debug!("no recorded target, nothing to release");
        return Ok(Action::await_change());
    };

    let mut data = ResourceData {
        target,
        ..ResourceData::from_parts(&doc.spec, status)
    };
    release(&ctx.labels_resource(), &mut data).await?;

    publish_event(
        &ctx.recorder,
        EventType::Normal,
        "LabelsReleased",
        "Cleanup",
        Some(format!(
            "Released labels on {} {}",
            data.target.kind, data.target.name
        )),
        &doc.object_ref(&()),
    )
    .await;

    {
        let mut diag = ctx.diagnostics.write().await;
        diag.last_event = Utc::now();
        diag.records_released += 1;
    }

    Ok(Action::await_change())
}

/// Deletes a record, a target that no longer exists has nothing left to release.
async fn release(resource: &LabelsResource, data: &mut ResourceData) -> Result<()> {
    match resource.delete(data).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            warn!(
                target_id = %record_id(&data.target),
                error = %e,
                "target no longer exists, skipping label release"
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// The previously labeled target when the immutable target fields changed
fn replaced_target(spec: &LabelSetSpec, status: &LabelSetStatus) -> Option<TargetDescriptor> {
    status.id.as_ref()?;
    let previous = status.target.as_ref()?;
    (*previous != spec.target()).then(|| previous.clone())
}

fn status_from_data(doc: &LabelSet, data: &ResourceData) -> LabelSetStatus {
    LabelSetStatus {
        id: data.id.clone(),
        target: Some(data.target.clone()),
        labels: data.labels.clone(),
        applied_labels: data.applied_labels.clone(),
        observed_generation: doc.metadata.generation,
    }
}

#[instrument(skip(object, err, ctx), fields(
    labelset_name = %object.name_any(),
    labelset_namespace = object.namespace().as_deref(),
    error_type = ?err,
))]
#[allow(clippy::needless_pass_by_value)]
fn error_policy(object: Arc<LabelSet>, err: &Error, ctx: Arc<Context>) -> Action {
    let err_msg = err.to_string();

    error!(
        error = %err_msg,
        requeue_after_secs = 60,
        "reconciliation failed, scheduling retry"
    );

    let ctx_clone = ctx.clone();
    let oref = object.object_ref(&());

    tokio::spawn(async move {
        ctx_clone.diagnostics.write().await.failures += 1;
        publish_event(
            &ctx_clone.recorder,
            EventType::Warning,
            "ReconciliationFailed",
            "Reconcile",
            Some(format!("Error: {err_msg}")),
            &oref,
        )
        .await;
    });

    Action::requeue(Duration::from_mins(1))
}

#[instrument(skip(doc, ctx, data), fields(
    labelset_name = doc.metadata.name.as_deref(),
    labelset_namespace = doc.metadata.namespace.as_deref(),
))]
async fn flush_state_to_api(doc: &LabelSet, ctx: &Context, data: &ResourceData) -> Result<LabelSet> {
    let ns = &doc
        .namespace()
        .ok_or_else(|| Error::from("Unable to get labelset namespace".to_string()))?;
    let api: Api<LabelSet> = Api::namespaced(ctx.client.clone(), ns);

    let name = doc
        .metadata
        .name
        .as_ref()
        .ok_or_else(|| "Object has a missing name".to_string())?;

    let status = status_from_data(doc, data);
    debug!(
        id = status.id.as_deref(),
        labels = status.labels.len(),
        applied_labels = status.applied_labels.len(),
        "flushing status to API server"
    );

    let status_patch = Patch::Apply(json!({
        "apiVersion": LabelSet::api_version(&()),
        "kind": LabelSet::kind(&()),
        "status": serde_json::to_value(status)?,
    }));

    let result = api
        .patch_status(
            name,
            &PatchParams::apply(&ctx.settings.field_manager).force(),
            &status_patch,
        )
        .await?;

    Ok(result)
}

/// Helper function to publish a Kubernetes event
async fn publish_event(
    recorder: &Recorder,
    event_type: EventType,
    reason: impl Into<String>,
    action: impl Into<String>,
    note: Option<String>,
    oref: &ObjectReference,
) {
    let _ = recorder
        .publish(
            &Event {
                type_: event_type,
                reason: reason.into(),
                note,
                action: action.into(),
                secondary: None,
            },
            oref,
        )
        .await;
}
