use std::time::Duration;

/// Per-process configuration for the service scheduling layer.
///
/// Controls the coordinator tick rate, continuous-worker launch/stop bounds,
/// and cross-host reconciliation timeouts.
#[derive(Debug, Clone)]
pub struct ServicerConfig {
    /// Hostname of this node, matched against host lists and `Server` records.
    pub host_name: String,
    /// How often the coordinator checks whether periodic services are due.
    pub tick_interval: Duration,
    /// Interval used when a definition carries an interval of zero.
    pub default_service_interval: Duration,
    /// How long `start()` waits for a continuous worker to report ready.
    pub worker_start_timeout: Duration,
    /// How long `terminate()` waits for a continuous worker to exit.
    pub worker_stop_timeout: Duration,
    /// Per-host timeout for cluster-wide orphan reconciliation.
    pub reconcile_timeout: Duration,
}

impl Default for ServicerConfig {
    fn default() -> Self {
        Self {
            host_name: "localhost".to_string(),
            tick_interval: Duration::from_secs(1),
            default_service_interval: Duration::from_secs(60),
            worker_start_timeout: Duration::from_secs(5),
            worker_stop_timeout: Duration::from_secs(10),
            reconcile_timeout: Duration::from_secs(5),
        }
    }
}

impl ServicerConfig {
    /// Config for the given host with all other settings defaulted.
    pub fn for_host(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            ..Self::default()
        }
    }

    /// Converts a definition interval to a `Duration`, substituting the default for zero.
    #[must_use]
    pub fn effective_interval(&self, interval_secs: u64) -> Duration {
        if interval_secs == 0 {
            self.default_service_interval
        } else {
            Duration::from_secs(interval_secs)
        }
    }
}
