//! Cluster-wide orphan reconciliation.
//!
//! Each host only knows its own [`ExecutorRegistry`]. Deciding that a work
//! item is running *nowhere* requires asking every host, so the reconciler
//! fans a `find_missing` query out to one [`HostProbe`] per host, each bounded
//! by a timeout. An id is declared orphaned only when every host answered and
//! every host reported it missing; one silent host blocks all verdicts.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::executor::ExecutorRegistry;

/// Asks a single host which of the given ids it is not running.
#[async_trait]
pub trait HostProbe: Send + Sync {
    /// Hostname this probe reaches.
    fn host(&self) -> &str;

    /// Returns the subset of `ids` with no live executor on the host.
    async fn find_missing(&self, ids: &BTreeSet<String>) -> anyhow::Result<BTreeSet<String>>;
}

/// Probe answering from this process's own registry.
#[derive(Debug)]
pub struct LocalProbe {
    host: String,
    registry: Arc<ExecutorRegistry>,
}

impl LocalProbe {
    pub fn new(host: impl Into<String>, registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            host: host.into(),
            registry,
        }
    }
}

#[async_trait]
impl HostProbe for LocalProbe {
    fn host(&self) -> &str {
        &self.host
    }

    async fn find_missing(&self, ids: &BTreeSet<String>) -> anyhow::Result<BTreeSet<String>> {
        Ok(self.registry.find_missing(ids.iter().map(String::as_str)))
    }
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Ids no reachable host is running. Empty whenever `unreachable` is not.
    pub orphaned: BTreeSet<String>,
    /// Hosts that failed or timed out.
    pub unreachable: Vec<String>,
}

impl ReconcileReport {
    /// Returns `true` if every host answered.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unreachable.is_empty()
    }
}

/// Fans `find_missing` out to every host in the cluster.
pub struct ClusterReconciler {
    probes: Vec<Arc<dyn HostProbe>>,
    timeout: Duration,
}

impl ClusterReconciler {
    #[must_use]
    pub fn new(probes: Vec<Arc<dyn HostProbe>>, timeout: Duration) -> Self {
        Self { probes, timeout }
    }

    /// Determines which of `ids` are not running on any host.
    pub async fn reconcile(&self, ids: &BTreeSet<String>) -> ReconcileReport {
        if ids.is_empty() || self.probes.is_empty() {
            return ReconcileReport::default();
        }

        let answers = join_all(self.probes.iter().map(|probe| async move {
            let outcome = tokio::time::timeout(self.timeout, probe.find_missing(ids)).await;
            (probe.host().to_string(), outcome)
        }))
        .await;

        let mut orphaned = ids.clone();
        let mut unreachable = Vec::new();

        for (host, outcome) in answers {
            match outcome {
                Ok(Ok(missing)) => orphaned.retain(|id| missing.contains(id)),
                Ok(Err(e)) => {
                    tracing::warn!(%host, error = %e, "host probe failed during reconciliation");
                    unreachable.push(host);
                }
                Err(_) => {
                    tracing::warn!(%host, timeout = ?self.timeout, "host probe timed out during reconciliation");
                    unreachable.push(host);
                }
            }
        }

        if !unreachable.is_empty() {
            orphaned.clear();
        }

        tracing::info!(
            candidates = ids.len(),
            orphaned = orphaned.len(),
            unreachable = unreachable.len(),
            "cluster reconciliation complete"
        );

        ReconcileReport {
            orphaned,
            unreachable,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::executor::CooperativeHandle;

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| (*s).to_string()).collect()
    }

    fn registry_with(running: &[&str]) -> Arc<ExecutorRegistry> {
        let registry = Arc::new(ExecutorRegistry::new());
        for id in running {
            registry
                .add(id, "test", Arc::new(CooperativeHandle::new(CancellationToken::new())))
                .unwrap();
        }
        registry
    }

    fn probe(p: impl HostProbe + 'static) -> Arc<dyn HostProbe> {
        Arc::new(p)
    }

    struct StalledProbe;

    #[async_trait]
    impl HostProbe for StalledProbe {
        fn host(&self) -> &str {
            "node-stalled"
        }

        async fn find_missing(&self, _ids: &BTreeSet<String>) -> anyhow::Result<BTreeSet<String>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(BTreeSet::new())
        }
    }

    struct FailingProbe;

    #[async_trait]
    impl HostProbe for FailingProbe {
        fn host(&self) -> &str {
            "node-down"
        }

        async fn find_missing(&self, _ids: &BTreeSet<String>) -> anyhow::Result<BTreeSet<String>> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    #[tokio::test]
    async fn id_running_on_any_host_is_not_orphaned() {
        let reconciler = ClusterReconciler::new(
            vec![
                probe(LocalProbe::new("node-1", registry_with(&["T-1"]))),
                probe(LocalProbe::new("node-2", registry_with(&["T-2"]))),
            ],
            Duration::from_secs(1),
        );

        let report = reconciler.reconcile(&ids(&["T-1", "T-2", "T-3"])).await;
        assert!(report.is_complete());
        assert_eq!(report.orphaned, ids(&["T-3"]));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_host_blocks_orphan_verdicts() {
        let reconciler = ClusterReconciler::new(
            vec![
                probe(LocalProbe::new("node-1", registry_with(&[]))),
                probe(StalledProbe),
            ],
            Duration::from_millis(200),
        );

        let report = reconciler.reconcile(&ids(&["T-1"])).await;
        assert!(report.orphaned.is_empty());
        assert_eq!(report.unreachable, vec!["node-stalled".to_string()]);
    }

    #[tokio::test]
    async fn failed_host_is_reported_unreachable() {
        let reconciler = ClusterReconciler::new(
            vec![
                probe(LocalProbe::new("node-1", registry_with(&[]))),
                probe(FailingProbe),
            ],
            Duration::from_secs(1),
        );

        let report = reconciler.reconcile(&ids(&["T-1"])).await;
        assert!(!report.is_complete());
        assert!(report.orphaned.is_empty());
    }

    #[tokio::test]
    async fn empty_candidate_set_short_circuits() {
        let reconciler = ClusterReconciler::new(vec![probe(FailingProbe)], Duration::from_secs(1));
        assert_eq!(reconciler.reconcile(&BTreeSet::new()).await, ReconcileReport::default());
    }
}
