//! Resolves `{apiVersion, kind}` descriptors to concrete API endpoints through discovery

use std::collections::HashMap;

use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use kube::core::gvk::{GroupVersion, ParseGroupVersionError};
use kube::discovery::{self, ApiCapabilities, ApiResource, Scope};
use kube::{Api, Client};
use labelkeeper_crd::TargetDescriptor;
use tracing::{debug, instrument};

use crate::{Error, Result};

/// Namespace used for namespaced kinds when the target omits one
pub const DEFAULT_NAMESPACE: &str = "default";

/// The endpoint and scope a kind maps to
#[derive(Clone, Debug)]
pub struct RestMapping {
    /// Resource used to build the dynamic api
    pub resource: ApiResource,
    /// Namespaced or cluster wide
    pub scope: Scope,
}

impl RestMapping {
    /// Whether objects of this kind live inside a namespace
    #[must_use]
    pub fn is_namespaced(&self) -> bool {
        matches!(self.scope, Scope::Namespaced)
    }

    /// Namespace a request for this kind is scoped to: `None` for cluster scoped kinds,
    /// the requested namespace or [`DEFAULT_NAMESPACE`] otherwise.
    #[must_use]
    pub fn effective_namespace(&self, requested: Option<&str>) -> Option<String> {
        if !self.is_namespaced() {
            return None;
        }

        Some(
            requested
                .filter(|ns| !ns.is_empty())
                .unwrap_or(DEFAULT_NAMESPACE)
                .to_string(),
        )
    }
}

/// Kind to endpoint table built from discovery results
#[derive(Clone, Debug, Default)]
pub struct RestMapper {
    mappings: HashMap<GroupVersionKind, RestMapping>,
}

impl RestMapper {
    /// Builds the table from discovered resources
    pub fn new(resources: impl IntoIterator<Item = (ApiResource, ApiCapabilities)>) -> Self {
        let mappings = resources
            .into_iter()
            .map(|(resource, caps)| {
                let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
                (
                    gvk,
                    RestMapping {
                        resource,
                        scope: caps.scope,
                    },
                )
            })
            .collect();

        Self { mappings }
    }

    /// Queries discovery for every resource served under `gv`.
    ///
    /// # Errors
    ///
    /// Propagates discovery failures unmodified.
    #[instrument(skip(client), fields(group_version = %gv.api_version()))]
    pub async fn discover(client: &Client, gv: &GroupVersion) -> Result<Self> {
        let group = discovery::pinned_group(client, gv).await?;
        let mapper = Self::new(group.versioned_resources(&gv.version));
        debug!(kinds = mapper.mappings.len(), "built rest mapping table");
        Ok(mapper)
    }

    /// Looks up the mapping of `gvk`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MappingNotFound`] when discovery did not report the kind.
    pub fn rest_mapping(&self, gvk: &GroupVersionKind) -> Result<&RestMapping> {
        self.mappings
            .get(gvk)
            .ok_or_else(|| Error::MappingNotFound {
                api_version: GroupVersion::gv(&gvk.group, &gvk.version).api_version(),
                kind: gvk.kind.clone(),
            })
    }
}

/// Parses `version` or `group/version`.
///
/// Stricter than `GroupVersion`'s own parser, which splits on the first `/` only and
/// accepts `a/b/c` as group `a`, version `b/c`.
///
/// # Errors
///
/// Returns [`Error::ParseError`] for extra segments, an empty group or an empty version.
pub fn parse_group_version(api_version: &str) -> Result<GroupVersion> {
    let valid = match api_version.split_once('/') {
        Some((group, version)) => !group.is_empty() && !version.is_empty() && !version.contains('/'),
        None => !api_version.is_empty(),
    };
    if !valid {
        return Err(ParseGroupVersionError(api_version.into()).into());
    }

    Ok(api_version.parse()?)
}

/// Dynamic api for a resolved target
#[derive(Clone)]
pub struct ResolvedTarget {
    /// Api scoped to the target namespace when the kind is namespaced
    pub api: Api<DynamicObject>,
    /// Namespace after defaulting, `None` for cluster scoped kinds
    pub namespace: Option<String>,
    /// Mapping the api was built from
    pub mapping: RestMapping,
}

/// Resolves the endpoint of `target`. Discovery runs on every call.
///
/// # Errors
///
/// Fails on unparsable apiVersions, discovery errors and unknown kinds.
#[instrument(skip(client, target), fields(
    api_version = %target.api_version,
    kind = %target.kind,
))]
pub async fn resolve(client: &Client, target: &TargetDescriptor) -> Result<ResolvedTarget> {
    let gv = parse_group_version(&target.api_version)?;
    let gvk = gv.clone().with_kind(&target.kind);

    let mapper = RestMapper::discover(client, &gv).await?;
    let mapping = mapper.rest_mapping(&gvk)?.clone();
    let namespace = mapping.effective_namespace(target.namespace.as_deref());

    let api = match &namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &mapping.resource),
        None => Api::all_with(client.clone(), &mapping.resource),
    };

    debug!(
        plural = %mapping.resource.plural,
        namespace = namespace.as_deref(),
        "resolved target endpoint"
    );

    Ok(ResolvedTarget {
        api,
        namespace,
        mapping,
    })
}
