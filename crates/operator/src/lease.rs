// Copyright 2026 Labelkeeper Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Leader election components, using the k8s lease pattern.
//! <https://kubernetes.io/docs/concepts/architecture/leases/>

use std::{env, time::Duration};

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::{sync::watch, time::sleep};
use tracing::{error, info};

const LEASE_TTL: Duration = Duration::from_secs(15);
const RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Runs a leader election loop on `lease_name` in the client's default namespace, using
/// HOSTNAME as holder identity. Leadership changes are published through `leader_tx`;
/// the loop ends once every receiver is gone.
pub async fn run_leader_election(client: Client, lease_name: String, leader_tx: watch::Sender<bool>) {
    let holder_id = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let namespace = client.default_namespace().to_string();

    info!(lease = %lease_name, holder = %holder_id, %namespace, "starting leader election");

    let leadership = LeaseLock::new(
        client,
        &namespace,
        LeaseLockParams {
            holder_id,
            lease_name,
            lease_ttl: LEASE_TTL,
        },
    );

    loop {
        match leadership.try_acquire_or_renew().await {
            Ok(ll) => {
                leader_tx.send_if_modified(|current| {
                    let changed = *current != ll.acquired_lease;
                    *current = ll.acquired_lease;
                    changed
                });
            }
            Err(err) => {
                error!(error = err.to_string(), "failed to acquire lease lock");
                leader_tx.send_replace(false);
            }
        }

        if leader_tx.is_closed() {
            return;
        }

        sleep(RENEW_INTERVAL).await;
    }
}
