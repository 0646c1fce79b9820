//! In-process fake of the Kubernetes api server for lifecycle tests.
//!
//! Serves core/v1 discovery and a handful of objects, and simulates server-side apply
//! field ownership for labels as well as RFC 6902 patches.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use http::{Request, Response, StatusCode};
use kube::Client;
use kube::client::Body;
use serde_json::{Value, json};
use tower_test::mock::Handle;

/// Field manager used by the tests
pub const MANAGER: &str = "labelkeeper-test";

/// A request as seen by the fake
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub content_type: Option<String>,
    pub body: Value,
}

/// Fake cluster holding labeled objects keyed by their request path.
///
/// The object the cluster was built with is the primary one read by [`FakeCluster::labels`].
#[derive(Clone)]
pub struct FakeCluster {
    path: String,
    objects: Arc<Mutex<BTreeMap<String, Value>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl FakeCluster {
    /// A namespaced `ConfigMap`
    pub fn config_map(namespace: &str, name: &str, labels: &[(&str, &str)]) -> Self {
        let (path, object) = config_map_object(namespace, name, labels);
        Self::with_object(path, object)
    }

    /// A cluster scoped `Namespace`
    pub fn namespace(name: &str, labels: &[(&str, &str)]) -> Self {
        Self::with_object(
            format!("/api/v1/namespaces/{name}"),
            json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": { "name": name, "labels": label_map(labels) }
            }),
        )
    }

    /// Adds another `ConfigMap` next to the primary object
    pub fn and_config_map(self, namespace: &str, name: &str, labels: &[(&str, &str)]) -> Self {
        let (path, object) = config_map_object(namespace, name, labels);
        self.objects.lock().unwrap().insert(path, object);
        self
    }

    fn with_object(path: String, object: Value) -> Self {
        Self {
            objects: Arc::new(Mutex::new(BTreeMap::from([(path.clone(), object)]))),
            path,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A client talking to a fresh server task backed by this cluster
    pub fn client(&self) -> Client {
        let (service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        tokio::spawn(self.clone().serve(handle));
        Client::new(service, "default")
    }

    /// Current labels of the primary object
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.labels_at(&self.path)
    }

    /// Current labels of a `ConfigMap` added with [`FakeCluster::and_config_map`]
    pub fn config_map_labels(&self, namespace: &str, name: &str) -> BTreeMap<String, String> {
        self.labels_at(&config_map_path(namespace, name))
    }

    fn labels_at(&self, path: &str) -> BTreeMap<String, String> {
        let objects = self.objects.lock().unwrap();
        objects
            .get(path)
            .and_then(|object| serde_json::from_value(object["metadata"]["labels"].clone()).ok())
            .unwrap_or_default()
    }

    /// Removes the label map of the primary object entirely
    pub fn clear_labels(&self) {
        self.edit_metadata(|metadata| {
            metadata.remove("labels");
        });
    }

    /// Removes one label of the primary object, as another client would
    pub fn remove_label(&self, key: &str) {
        self.edit_metadata(|metadata| {
            if let Some(labels) = metadata.get_mut("labels").and_then(Value::as_object_mut) {
                labels.remove(key);
            }
        });
    }

    fn edit_metadata(&self, edit: impl FnOnce(&mut serde_json::Map<String, Value>)) {
        let mut objects = self.objects.lock().unwrap();
        if let Some(metadata) = objects
            .get_mut(&self.path)
            .and_then(|object| object["metadata"].as_object_mut())
        {
            edit(metadata);
        }
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Whether any request tried to modify an object
    pub fn patched(&self) -> bool {
        self.requests().iter().any(|r| r.method == "PATCH")
    }

    async fn serve(self, mut handle: Handle<Request<Body>, Response<Body>>) {
        while let Some((request, send)) = handle.next_request().await {
            let (parts, body) = request.into_parts();
            let bytes = body.collect_bytes().await.unwrap();
            let recorded = RecordedRequest {
                method: parts.method.to_string(),
                path: parts.uri.path().to_string(),
                query: parts.uri.query().unwrap_or_default().to_string(),
                content_type: parts
                    .headers
                    .get(http::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
                body: serde_json::from_slice(&bytes).unwrap_or(Value::Null),
            };
            self.requests.lock().unwrap().push(recorded.clone());

            let (status, reply) = self.handle(&recorded);
            let response = Response::builder()
                .status(status)
                .body(Body::from(serde_json::to_vec(&reply).unwrap()))
                .unwrap();
            send.send_response(response);
        }
    }

    fn handle(&self, request: &RecordedRequest) -> (StatusCode, Value) {
        let mut objects = self.objects.lock().unwrap();
        match (request.method.as_str(), objects.get_mut(&request.path)) {
            ("GET", _) if request.path == "/api/v1" => (StatusCode::OK, core_resources()),
            ("GET", Some(object)) => (StatusCode::OK, object.clone()),
            ("PATCH", Some(object)) => patch(object, request),
            _ => failure(StatusCode::NOT_FOUND, "NotFound", "the server could not find the requested resource"),
        }
    }
}

fn patch(object: &mut Value, request: &RecordedRequest) -> (StatusCode, Value) {
    let content_type = request.content_type.as_deref().unwrap_or_default();

    let outcome = if content_type.starts_with("application/apply-patch") {
        let params = query_params(&request.query);
        let manager = params.get("fieldManager").cloned().unwrap_or_default();
        let force = params.get("force").is_some_and(|f| f == "true");
        server_side_apply(object, &request.body, &manager, force)
    } else if content_type == "application/json-patch+json" {
        serde_json::from_value::<json_patch::Patch>(request.body.clone())
            .map_err(|e| failure(StatusCode::BAD_REQUEST, "BadRequest", &e.to_string()))
            .and_then(|patch| {
                json_patch::patch(&mut *object, &patch).map_err(|e| {
                    failure(StatusCode::UNPROCESSABLE_ENTITY, "Invalid", &e.to_string())
                })
            })
    } else {
        Err(failure(StatusCode::UNSUPPORTED_MEDIA_TYPE, "UnsupportedMediaType", content_type))
    };

    match outcome {
        Ok(()) => (StatusCode::OK, object.clone()),
        Err(reply) => reply,
    }
}

fn config_map_path(namespace: &str, name: &str) -> String {
    format!("/api/v1/namespaces/{namespace}/configmaps/{name}")
}

fn config_map_object(namespace: &str, name: &str, labels: &[(&str, &str)]) -> (String, Value) {
    (
        config_map_path(namespace, name),
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": namespace, "labels": label_map(labels) },
            "data": {}
        }),
    )
}

fn label_map(labels: &[(&str, &str)]) -> Value {
    labels
        .iter()
        .map(|(k, v)| ((*k).to_string(), json!(v)))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

fn query_params(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn owned_labels(object: &Value, manager: &str) -> BTreeSet<String> {
    object["metadata"]["managedFields"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|entry| entry["manager"] == manager)
        .filter_map(|entry| entry["fieldsV1"]["f:metadata"]["f:labels"].as_object())
        .flat_map(|labels| labels.keys().filter_map(|k| k.strip_prefix("f:")).map(str::to_string))
        .collect()
}

/// Label-only model of server-side apply: values owned by nobody else conflict unless
/// forced, keys the manager owned but no longer applies are removed.
fn server_side_apply(
    object: &mut Value,
    body: &Value,
    manager: &str,
    force: bool,
) -> Result<(), (StatusCode, Value)> {
    let applied: BTreeMap<String, String> =
        serde_json::from_value(body["metadata"]["labels"].clone()).unwrap_or_default();
    let owned = owned_labels(object, manager);
    let mut labels: BTreeMap<String, String> =
        serde_json::from_value(object["metadata"]["labels"].clone()).unwrap_or_default();

    if !force {
        if let Some(key) = applied
            .iter()
            .find(|(k, v)| !owned.contains(*k) && labels.get(*k).is_some_and(|cur| cur != *v))
            .map(|(k, _)| k)
        {
            return Err(failure(
                StatusCode::CONFLICT,
                "Conflict",
                &format!("Apply failed with 1 conflict: conflict with \"kubectl\": .metadata.labels.{key}"),
            ));
        }
    }

    labels.retain(|k, _| !owned.contains(k) || applied.contains_key(k));
    labels.extend(applied.clone());
    object["metadata"]["labels"] = json!(labels);

    let fields: serde_json::Map<String, Value> =
        applied.keys().map(|k| (format!("f:{k}"), json!({}))).collect();
    let entry = json!({
        "manager": manager,
        "operation": "Apply",
        "apiVersion": "v1",
        "fieldsType": "FieldsV1",
        "fieldsV1": { "f:metadata": { "f:labels": fields } }
    });

    let mut managed: Vec<Value> = object["metadata"]["managedFields"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    managed.retain(|e| e["manager"] != manager);
    managed.push(entry);
    object["metadata"]["managedFields"] = Value::Array(managed);

    Ok(())
}

fn failure(status: StatusCode, reason: &str, message: &str) -> (StatusCode, Value) {
    (
        status,
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": message,
            "reason": reason,
            "code": status.as_u16()
        }),
    )
}

fn core_resources() -> Value {
    json!({
        "kind": "APIResourceList",
        "apiVersion": "v1",
        "groupVersion": "v1",
        "resources": [
            {
                "name": "configmaps",
                "singularName": "configmap",
                "namespaced": true,
                "kind": "ConfigMap",
                "verbs": ["create", "delete", "get", "list", "patch", "update", "watch"]
            },
            {
                "name": "namespaces",
                "singularName": "namespace",
                "namespaced": false,
                "kind": "Namespace",
                "verbs": ["create", "delete", "get", "list", "patch", "update", "watch"]
            }
        ]
    })
}
