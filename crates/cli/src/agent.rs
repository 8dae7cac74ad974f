//! Background sync loop
//!
//! Pulls every known network on a fixed interval. A cycle always runs to
//! completion; shutdown is only observed between cycles.

use crate::interface::InterfaceApplier;
use crate::sync::{SyncClient, ALL_NETWORKS};
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use wgmesh_common::{NodeService, Result, DEFAULT_CHECK_IN_INTERVAL};

/// Interval to use when none is given: the shortest check-in interval of the
/// known memberships.
pub fn default_interval<S: NodeService, A: InterfaceApplier>(client: &SyncClient<S, A>) -> Duration {
    let secs = client
        .store()
        .networks()
        .unwrap_or_default()
        .iter()
        .filter_map(|n| client.store().load(n).ok())
        .map(|c| c.node.check_in_interval)
        .filter(|&i| i > 0)
        .min()
        .unwrap_or(DEFAULT_CHECK_IN_INTERVAL);
    Duration::from_secs(u64::from(secs))
}

/// Run sync cycles until `shutdown` resolves. Returns the number of cycles
/// completed.
pub async fn run_until<S, A, F>(
    client: &SyncClient<S, A>,
    interval: Duration,
    shutdown: F,
) -> Result<u64>
where
    S: NodeService,
    A: InterfaceApplier,
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    info!("Sync agent started, interval {:?}", interval);
    let mut cycles = 0u64;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        let report = client.pull_selected(ALL_NETWORKS).await?;
        if let Some(err) = &report.last_error {
            warn!(
                "Cycle {}: {} networks failed, last error: {}",
                cycles,
                report.failed.len(),
                err
            );
        }
        cycles += 1;
    }

    info!("Sync agent stopped after {} cycles", cycles);
    Ok(cycles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, ServerConfig};
    use crate::sync::tests::{MockApplier, MockService};
    use wgmesh_common::Node;

    #[tokio::test(start_paused = true)]
    async fn test_runs_cycles_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let client = SyncClient::new(
            MockService::default(),
            MockApplier::default(),
            ConfigStore::new(dir.path()),
            ServerConfig::default(),
        );
        client
            .join(Node {
                mac_address: "02:00:00:00:00:01".to_string(),
                network: "mesh".to_string(),
                endpoint: "198.51.100.7".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let cycles = run_until(
            &client,
            Duration::from_secs(30),
            tokio::time::sleep(Duration::from_secs(95)),
        )
        .await
        .unwrap();

        // Ticks at 0, 30, 60 and 90 seconds
        assert_eq!(cycles, 4);
    }

    #[test]
    fn test_default_interval_without_memberships() {
        let dir = tempfile::tempdir().unwrap();
        let client = SyncClient::new(
            MockService::default(),
            MockApplier::default(),
            ConfigStore::new(dir.path()),
            ServerConfig::default(),
        );
        assert_eq!(
            default_interval(&client),
            Duration::from_secs(u64::from(DEFAULT_CHECK_IN_INTERVAL))
        );
    }
}
