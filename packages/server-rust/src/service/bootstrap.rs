//! Bootstrap of service definitions and the combined placement check.

use std::collections::BTreeSet;

use servicer_core::{service_names, DefinitionStore, Server, ServiceDefinition};

use crate::cluster::affinity;

/// Returns the stored definitions plus a synthesized stand-in for each
/// foundational service storage does not have.
///
/// Idempotent and read-only. A store failure is logged and treated as an
/// empty store, so the foundational services still come up.
pub async fn get_definitions(store: &dyn DefinitionStore) -> Vec<ServiceDefinition> {
    let mut definitions = match store.list_service_definitions().await {
        Ok(definitions) => definitions,
        Err(e) => {
            tracing::error!(error = %e, "failed to list service definitions; using built-in defaults");
            Vec::new()
        }
    };

    let present: BTreeSet<String> = definitions.iter().map(|d| d.name.clone()).collect();
    for name in service_names::FOUNDATIONAL {
        if !present.contains(name) {
            tracing::debug!(service = name, "synthesizing foundational service definition");
            definitions.push(ServiceDefinition::synthesized(name));
        }
    }
    definitions
}

/// Two-tier placement check: the Server record's overrides first, then the
/// definition's host list.
#[must_use]
pub fn is_service_allowed_on_server(
    definition: &ServiceDefinition,
    server: Option<&Server>,
    host: &str,
) -> bool {
    affinity::resolve(definition, server, host)
}

/// Same as [`is_service_allowed_on_server`], loading `host`'s Server record
/// from `store`. A store error is logged and treated as "no record".
pub async fn is_service_allowed_on_host(
    store: &dyn DefinitionStore,
    definition: &ServiceDefinition,
    host: &str,
) -> bool {
    let server = load_server(store, host).await;
    is_service_allowed_on_server(definition, server.as_ref(), host)
}

/// Loads the Server record for `host`, logging and discarding store errors.
pub async fn load_server(store: &dyn DefinitionStore, host: &str) -> Option<Server> {
    match store.get_server_by_name(host).await {
        Ok(server) => server,
        Err(e) => {
            tracing::warn!(%host, error = %e, "failed to load server record; deferring to definitions");
            None
        }
    }
}

/// Writes a stand-in for every foundational service missing from storage.
///
/// Returns how many definitions were written. Nothing is committed when
/// nothing is missing.
///
/// # Errors
///
/// Returns an error if listing, saving or committing fails.
pub async fn persist_missing_definitions(store: &dyn DefinitionStore) -> anyhow::Result<usize> {
    let present: BTreeSet<String> = store
        .list_service_definitions()
        .await?
        .into_iter()
        .map(|d| d.name)
        .collect();

    let mut written = 0;
    for name in service_names::FOUNDATIONAL {
        if present.contains(name) {
            continue;
        }
        store
            .save_service_definition(&ServiceDefinition::synthesized(name))
            .await?;
        written += 1;
    }

    if written > 0 {
        store.commit().await?;
        tracing::info!(written, "persisted foundational service definitions");
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use servicer_core::HostList;

    use super::*;
    use crate::store::MemoryDefinitionStore;

    #[tokio::test]
    async fn empty_store_yields_foundational_stand_ins() {
        let store = MemoryDefinitionStore::new();
        let definitions = get_definitions(&store).await;

        let names: Vec<&str> = definitions.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Task", "Request"]);

        for definition in &definitions {
            assert_eq!(definition.host_list(), HostList::All);
            assert_eq!(definition.executor, format!("{}Service", definition.name));
            assert_eq!(definition.interval_secs, service_names::DEFAULT_INTERVAL_SECS);
        }
    }

    #[tokio::test]
    async fn stored_definitions_win_over_stand_ins() {
        let store = MemoryDefinitionStore::new();
        store.put_definition(ServiceDefinition::new("Task", "TaskService", Some("node-1"), 5));
        store.put_definition(ServiceDefinition::new("Nightly", "IndexRefreshService", None, 3600));

        let definitions = get_definitions(&store).await;
        assert_eq!(definitions.len(), 3);

        let task = definitions.iter().find(|d| d.name == "Task").unwrap();
        assert_eq!(task.hosts.as_deref(), Some("node-1"));
        assert_eq!(task.interval_secs, 5);
    }

    #[tokio::test]
    async fn get_definitions_is_idempotent() {
        let store = MemoryDefinitionStore::new();
        assert_eq!(get_definitions(&store).await, get_definitions(&store).await);
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn unavailable_store_still_yields_stand_ins() {
        let store = MemoryDefinitionStore::new();
        store.put_definition(ServiceDefinition::new("Nightly", "IndexRefreshService", None, 3600));
        store.set_unavailable(true);

        let definitions = get_definitions(&store).await;
        assert_eq!(definitions.len(), 2);
    }

    #[test]
    fn node_two_excludes_request_under_global_definition() {
        let request = ServiceDefinition::new("Request", "RequestService", Some("global"), 60);
        let node2 = Server::new("node-2").excluding(&["Request"]);

        assert!(!is_service_allowed_on_server(&request, Some(&node2), "node-2"));
        assert!(is_service_allowed_on_server(&request, None, "node-1"));
    }

    #[test]
    fn inclusion_overrides_unassigned_host_list() {
        let definition = ServiceDefinition::new("Stats", "IndexRefreshService", None, 60);
        let server = Server::new("node-3").including(&["Stats"]);

        assert!(is_service_allowed_on_server(&definition, Some(&server), "node-3"));
        assert!(!is_service_allowed_on_server(&definition, None, "node-3"));
    }

    #[tokio::test]
    async fn host_check_loads_server_record() {
        let store = MemoryDefinitionStore::new();
        store.put_server(Server::new("node-2").excluding(&["Task"]));
        let task = ServiceDefinition::synthesized("Task");

        assert!(!is_service_allowed_on_host(&store, &task, "node-2").await);
        assert!(is_service_allowed_on_host(&store, &task, "node-1").await);

        store.set_unavailable(true);
        assert!(is_service_allowed_on_host(&store, &task, "node-2").await);
    }

    #[tokio::test]
    async fn persist_writes_only_missing_and_commits_once() {
        let store = MemoryDefinitionStore::new();
        store.put_definition(ServiceDefinition::synthesized("Task"));

        assert_eq!(persist_missing_definitions(&store).await.unwrap(), 1);
        assert_eq!(store.commit_count(), 1);
        assert!(store.get_service_definition("Request").await.unwrap().is_some());

        assert_eq!(persist_missing_definitions(&store).await.unwrap(), 0);
        assert_eq!(store.commit_count(), 1);
    }
}
