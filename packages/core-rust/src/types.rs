use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Free-form key/value configuration attached to definitions and servers.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Well-known service names and the sentinel host list value.
pub mod service_names {
    /// Task scheduler service. Always present on every cluster.
    pub const TASK: &str = "Task";
    /// Request processor service. Always present on every cluster.
    pub const REQUEST: &str = "Request";
    /// Services that `get_definitions` synthesizes when storage lacks them.
    pub const FOUNDATIONAL: [&str; 2] = [TASK, REQUEST];
    /// Host list value meaning "every host in the cluster".
    pub const ALL_HOSTS: &str = "global";
    /// Default interval assigned to synthesized definitions.
    pub const DEFAULT_INTERVAL_SECS: u64 = 60;

    /// Conventional executor kind for a service name (`"Task"` -> `"TaskService"`).
    #[must_use]
    pub fn executor_kind_for(name: &str) -> String {
        format!("{name}Service")
    }
}

// ---------------------------------------------------------------------------
// HostList
// ---------------------------------------------------------------------------

/// Parsed form of a definition's raw host list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostList {
    /// Runs on every host.
    All,
    /// Runs only on the named hosts.
    Explicit(BTreeSet<String>),
    /// No host list configured; runs nowhere unless a server includes it.
    Unassigned,
}

impl HostList {
    /// Parses a comma-separated host list.
    ///
    /// `"global"` (any case) and `"*"` mean every host. Blank segments are
    /// skipped with a warning rather than rejected.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::Unassigned;
        };

        let mut hosts = BTreeSet::new();
        let mut blanks = 0usize;
        for segment in raw.split(',') {
            let host = segment.trim();
            if host.is_empty() {
                blanks += 1;
                continue;
            }
            if host.eq_ignore_ascii_case(service_names::ALL_HOSTS) || host == "*" {
                return Self::All;
            }
            hosts.insert(host.to_string());
        }

        if blanks > 0 {
            tracing::warn!(host_list = raw, blanks, "host list contains empty entries");
        }

        if hosts.is_empty() {
            Self::Unassigned
        } else {
            Self::Explicit(hosts)
        }
    }

    /// Returns `true` if `host` is covered by this list.
    #[must_use]
    pub fn contains(&self, host: &str) -> bool {
        match self {
            Self::All => true,
            Self::Explicit(hosts) => hosts.contains(host),
            Self::Unassigned => false,
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceDefinition
// ---------------------------------------------------------------------------

/// Persisted description of a cluster-wide background service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    /// Unique cluster-wide name.
    pub name: String,
    /// Symbolic service kind resolved through the service factory.
    pub executor: String,
    /// Raw host list: `"global"`, a comma-separated list, or absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts: Option<String>,
    /// Default execution interval in seconds.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

fn default_interval() -> u64 {
    service_names::DEFAULT_INTERVAL_SECS
}

impl ServiceDefinition {
    /// Creates a definition with no attributes.
    pub fn new(
        name: impl Into<String>,
        executor: impl Into<String>,
        hosts: Option<&str>,
        interval_secs: u64,
    ) -> Self {
        Self {
            name: name.into(),
            executor: executor.into(),
            hosts: hosts.map(str::to_string),
            interval_secs,
            attributes: Attributes::new(),
        }
    }

    /// Builds the minimal stand-in used when storage lacks a foundational service.
    #[must_use]
    pub fn synthesized(name: &str) -> Self {
        Self::new(
            name,
            service_names::executor_kind_for(name),
            Some(service_names::ALL_HOSTS),
            service_names::DEFAULT_INTERVAL_SECS,
        )
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with_attribute(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn host_list(&self) -> HostList {
        HostList::parse(self.hosts.as_deref())
    }

    #[must_use]
    pub fn attribute_u64(&self, key: &str) -> Option<u64> {
        self.attributes.get(key).and_then(serde_json::Value::as_u64)
    }

    #[must_use]
    pub fn attribute_bool(&self, key: &str) -> Option<bool> {
        self.attributes.get(key).and_then(serde_json::Value::as_bool)
    }

    #[must_use]
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(serde_json::Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// One cluster node's local overrides of the global service placement policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    /// Hostname identifying the node.
    pub name: String,
    /// Services forced onto this host regardless of the definition's host list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_services: Option<Vec<String>>,
    /// Services forbidden on this host. Wins over `include_services`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_services: Option<Vec<String>>,
    /// Monitoring and other free-form node configuration.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

impl Server {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn including(mut self, services: &[&str]) -> Self {
        self.include_services = Some(services.iter().map(|s| (*s).to_string()).collect());
        self
    }

    #[must_use]
    pub fn excluding(mut self, services: &[&str]) -> Self {
        self.exclude_services = Some(services.iter().map(|s| (*s).to_string()).collect());
        self
    }

    #[must_use]
    pub fn includes(&self, service: &str) -> bool {
        list_contains(self.include_services.as_deref(), service)
    }

    #[must_use]
    pub fn excludes(&self, service: &str) -> bool {
        list_contains(self.exclude_services.as_deref(), service)
    }
}

fn list_contains(list: Option<&[String]>, service: &str) -> bool {
    list.is_some_and(|names| names.iter().any(|n| n == service))
}

// ---------------------------------------------------------------------------
// Work items
// ---------------------------------------------------------------------------

/// Category of a unit of work tracked by the executor registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkKind {
    Task,
    Request,
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task => f.write_str("task"),
            Self::Request => f.write_str("request"),
        }
    }
}

/// Persisted state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkState {
    Pending,
    Running,
    Completed,
    Failed,
    Terminated,
}

impl WorkState {
    /// Returns `true` once the item can no longer run.
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }
}

/// A task result or request owned by the definition store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: String,
    /// Display name shown in diagnostics.
    pub name: String,
    pub kind: WorkKind,
    /// Host that claimed the item, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub state: WorkState,
    /// Reason recorded when the item was terminated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_note: Option<String>,
}

impl WorkItem {
    /// Creates a pending, unclaimed item.
    pub fn pending(id: impl Into<String>, name: impl Into<String>, kind: WorkKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            host: None,
            state: WorkState::Pending,
            completion_note: None,
        }
    }
}
