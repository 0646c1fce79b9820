use k8s_openapi::chrono::{DateTime, Utc};
use kube::{
    Client,
    runtime::events::{Recorder, Reporter},
};
use serde::Serialize;

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    /// Last successful apply or release
    pub last_event: DateTime<Utc>,
    /// Successful apply reconciliations since startup
    pub records_applied: u64,
    /// Label records released on `LabelSet` deletion since startup
    pub records_released: u64,
    /// Failed reconciliations since startup
    pub failures: u64,
    /// Kubernetes event reporter
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            records_applied: 0,
            records_released: 0,
            failures: 0,
            reporter: "labelkeeper".into(),
        }
    }
}

impl Diagnostics {
    /// Creates a new recorder wrapper around self
    #[must_use]
    pub fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}
