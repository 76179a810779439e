//! Host affinity: decides whether a service may run on a given host.
//!
//! Three policy sources are combined, strongest first:
//! 1. the host's `Server` exclusion list,
//! 2. the host's `Server` inclusion list,
//! 3. the `ServiceDefinition` host list.

use servicer_core::{Server, ServiceDefinition};

/// Outcome of consulting a host's `Server` override lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffinityVerdict {
    /// The server excludes the service. Final.
    Forbidden,
    /// The server includes the service. Final.
    Allowed,
    /// The server says nothing; the definition's host list decides.
    Deferred,
}

/// Consults only the `Server` override lists. A missing server record defers.
#[must_use]
pub fn is_allowed(service_name: &str, server: Option<&Server>) -> AffinityVerdict {
    match server {
        Some(s) if s.excludes(service_name) => AffinityVerdict::Forbidden,
        Some(s) if s.includes(service_name) => AffinityVerdict::Allowed,
        _ => AffinityVerdict::Deferred,
    }
}

/// Final placement answer for `definition` on `host`.
///
/// `server` is the override record for `host`, if one is registered.
#[must_use]
pub fn resolve(definition: &ServiceDefinition, server: Option<&Server>, host: &str) -> bool {
    match is_allowed(&definition.name, server) {
        AffinityVerdict::Forbidden => false,
        AffinityVerdict::Allowed => true,
        AffinityVerdict::Deferred => definition.host_list().contains(host),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn def(name: &str, hosts: Option<&str>) -> ServiceDefinition {
        ServiceDefinition::new(name, format!("{name}Service"), hosts, 60)
    }

    #[test]
    fn exclusion_beats_inclusion() {
        let server = Server::new("node-1")
            .including(&["Index"])
            .excluding(&["Index"]);
        assert_eq!(is_allowed("Index", Some(&server)), AffinityVerdict::Forbidden);
        assert!(!resolve(&def("Index", Some("global")), Some(&server), "node-1"));
    }

    #[test]
    fn inclusion_beats_definition_host_list() {
        let server = Server::new("node-9").including(&["Index"]);
        assert_eq!(is_allowed("Index", Some(&server)), AffinityVerdict::Allowed);
        assert!(resolve(&def("Index", Some("node-1,node-2")), Some(&server), "node-9"));
        assert!(resolve(&def("Index", None), Some(&server), "node-9"));
    }

    #[test]
    fn missing_server_defers_to_definition() {
        assert_eq!(is_allowed("Index", None), AffinityVerdict::Deferred);
        assert!(resolve(&def("Index", Some("node-1,node-2")), None, "node-2"));
        assert!(!resolve(&def("Index", Some("node-1,node-2")), None, "node-3"));
        assert!(resolve(&def("Index", Some("global")), None, "anything"));
        assert!(!resolve(&def("Index", None), None, "node-1"));
    }

    #[test]
    fn server_without_mention_defers() {
        let server = Server::new("node-1").including(&["Other"]).excluding(&["Another"]);
        assert_eq!(is_allowed("Index", Some(&server)), AffinityVerdict::Deferred);
        assert!(resolve(&def("Index", Some("node-1")), Some(&server), "node-1"));
    }

    #[test]
    fn node_2_excluding_request_forbids_global_request() {
        let server = Server::new("node-2").excluding(&["Request"]);
        let request = ServiceDefinition::synthesized("Request");
        assert!(!resolve(&request, Some(&server), "node-2"));
    }

    fn arb_service() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["Task", "Request", "Index", "Listener"]).prop_map(String::from)
    }

    fn arb_names() -> impl Strategy<Value = Option<Vec<String>>> {
        prop::option::of(prop::collection::vec(arb_service(), 0..4))
    }

    proptest! {
        #[test]
        fn resolve_follows_precedence(
            service in arb_service(),
            include in arb_names(),
            exclude in arb_names(),
            hosts in prop::sample::select(vec![None, Some("global"), Some("node-1"), Some("node-2,node-3")]),
            host in prop::sample::select(vec!["node-1", "node-2", "node-3"]),
        ) {
            let definition = def(&service, hosts);
            let server = Server {
                name: host.to_string(),
                include_services: include,
                exclude_services: exclude,
                ..Server::default()
            };

            let expected = if server.excludes(&service) {
                false
            } else if server.includes(&service) {
                true
            } else {
                definition.host_list().contains(host)
            };

            prop_assert_eq!(resolve(&definition, Some(&server), host), expected);
        }
    }
}
