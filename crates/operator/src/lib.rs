// Copyright 2025 Labelkeeper Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Operator internals

/// Generic Error for the label lifecycle and the controller
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Kubernetes internal error
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    /// `serde` errors
    #[error("Serialization Error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Kubernetes API version parse errors
    #[error("Parse Error: {0}")]
    ParseError(#[from] ParseGroupVersionError),

    /// Discovery returned no resource for the requested kind
    #[error("no resource mapping found for kind {kind} in {api_version}")]
    MappingNotFound {
        /// Requested apiVersion
        api_version: String,
        /// Requested kind
        kind: String,
    },

    /// Environment configuration errors
    #[error("invalid value {value:?} for {key}")]
    InvalidSetting {
        /// Environment variable name
        key: &'static str,
        /// Offending value
        value: String,
    },

    /// Finalizer handling errors
    #[error("Finalizer Error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    /// Generic string error messages
    #[error("{0}")]
    Message(String),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Message(msg)
    }
}

impl Error {
    /// Whether the target resource, or its kind, does not exist on the cluster
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(response)) => response.code == 404,
            Error::MappingNotFound { .. } => true,
            _ => false,
        }
    }
}

/// Generic result type to be used in the operator
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod config;
pub mod controller;
mod diagnostics;
pub mod labels;
pub mod lease;
pub mod resolver;
pub mod resource;
pub mod telemetry;

#[cfg(test)]
pub mod fixtures;

use kube::core::gvk::ParseGroupVersionError;

pub use crate::config::Settings;
pub use crate::controller::{State, run};
pub use crate::diagnostics::*;
