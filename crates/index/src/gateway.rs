//! Two-phase persistence of a normalized entity graph.
//!
//! Phase one writes every entity node, phase two every relationship edge.
//! Within a phase writes run concurrently up to `max_concurrent_writes`,
//! each with its own timeout and retry budget. A failed write is recorded
//! in the [`PersistenceReport`] and never stops the others.

use extract::{Entity, Relationship};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::retry::{Attempted, RetryPolicy};
use crate::store::{EdgeCommand, GraphCommand, GraphStore, NodeRef, NodeWrite, StoreError};

pub const SURFACE_PROPERTY: &str = "surface";
pub const CONTEXT_PROPERTY: &str = "context";
pub const DEFAULT_EDGE_TYPE: &str = "RELATED";

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub max_concurrent_writes: usize,
    pub write_timeout: Duration,
    pub edge_type: String,
    pub retry: RetryPolicy,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_writes: 8,
            write_timeout: Duration::from_secs(60),
            edge_type: DEFAULT_EDGE_TYPE.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// A write that did not make it into the store, with enough detail to
/// replay just that command.
#[derive(Debug, Clone, Serialize)]
pub struct PersistenceFailure {
    pub command: GraphCommand,
    pub error: String,
    pub retryable: bool,
    pub attempts: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PersistenceReport {
    pub nodes_created: usize,
    pub nodes_existing: usize,
    pub edges_created: usize,
    pub failures: Vec<PersistenceFailure>,
}

impl PersistenceReport {
    pub fn merge(&mut self, other: PersistenceReport) {
        self.nodes_created += other.nodes_created;
        self.nodes_existing += other.nodes_existing;
        self.edges_created += other.edges_created;
        self.failures.extend(other.failures);
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn record_failure(&mut self, command: GraphCommand, error: StoreError, attempts: usize) {
        tracing::warn!(command = %command, error = %error, attempts, "Write failed");
        self.failures.push(PersistenceFailure {
            command,
            retryable: error.is_retryable(),
            error: error.to_string(),
            attempts,
        });
    }
}

enum WriteOutcome {
    Node(NodeWrite),
    Edge,
}

pub struct PersistenceGateway {
    store: Arc<dyn GraphStore>,
    config: PersistenceConfig,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn GraphStore>, config: PersistenceConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn node_for(entity: &Entity) -> NodeRef {
        NodeRef::new(entity.entity_type.clone()).with_property(SURFACE_PROPERTY, entity.surface.clone())
    }

    pub fn edge_for(&self, relationship: &Relationship) -> EdgeCommand {
        EdgeCommand {
            from: Self::node_for(&relationship.source),
            to: Self::node_for(&relationship.target),
            edge_type: self.config.edge_type.clone(),
            properties: BTreeMap::from([(
                CONTEXT_PROPERTY.to_string(),
                relationship.context.clone(),
            )]),
        }
    }

    /// Write all nodes, then all edges.
    ///
    /// Edges touching a node whose write failed are not attempted; they are
    /// reported as failures instead.
    pub async fn persist(
        &self,
        entities: &[Entity],
        relationships: &[Relationship],
    ) -> PersistenceReport {
        let mut report = self.persist_entities(entities).await;

        let failed_nodes: HashSet<NodeRef> = report
            .failures
            .iter()
            .filter_map(|f| match &f.command {
                GraphCommand::CreateNodeIfAbsent(node) => Some(node.clone()),
                GraphCommand::CreateEdge(_) => None,
            })
            .collect();

        let edges = relationships
            .iter()
            .map(|r| GraphCommand::CreateEdge(self.edge_for(r)))
            .collect();

        report.merge(self.run_phase("edges", edges, &failed_nodes).await);
        report
    }

    /// Phase one only: ensure a node per entity.
    pub async fn persist_entities(&self, entities: &[Entity]) -> PersistenceReport {
        let labels: Vec<String> = entities
            .iter()
            .map(|e| e.entity_type.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if let Err(e) = self.store.prepare(&labels).await {
            tracing::warn!(error = %e, "Store preparation failed, continuing without it");
        }

        let nodes = entities
            .iter()
            .map(|e| GraphCommand::CreateNodeIfAbsent(Self::node_for(e)))
            .collect();
        self.run_phase("nodes", nodes, &HashSet::new()).await
    }

    /// Phase two only: one new edge per relationship.
    pub async fn persist_relationships(&self, relationships: &[Relationship]) -> PersistenceReport {
        let edges = relationships
            .iter()
            .map(|r| GraphCommand::CreateEdge(self.edge_for(r)))
            .collect();
        self.run_phase("edges", edges, &HashSet::new()).await
    }

    /// Run every command, bounded by the write semaphore. Returns once all
    /// of them have finished, with failures in command order.
    ///
    /// Edges touching one of `failed_nodes` are not sent to the store.
    async fn run_phase(
        &self,
        phase: &str,
        commands: Vec<GraphCommand>,
        failed_nodes: &HashSet<NodeRef>,
    ) -> PersistenceReport {
        tracing::info!(phase, writes = commands.len(), "Persisting");

        let blocked: Vec<Option<StoreError>> = commands
            .iter()
            .map(|command| missing_endpoint(command, failed_nodes))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_writes.max(1)));
        let mut tasks = JoinSet::new();

        for (idx, command) in commands.iter().enumerate() {
            if blocked[idx].is_some() {
                continue;
            }

            let command = command.clone();
            let store = self.store.clone();
            let policy = self.config.retry.clone();
            let timeout = self.config.write_timeout;
            let semaphore = semaphore.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (idx, execute(store, &policy, timeout, &command).await)
            });
        }

        let mut outcomes: Vec<Option<Attempted<WriteOutcome, StoreError>>> =
            commands.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                Err(e) => tracing::error!(phase, error = %e, "Write task failed"),
            }
        }

        let mut report = PersistenceReport::default();
        for ((command, blocked), outcome) in commands.into_iter().zip(blocked).zip(outcomes) {
            if let Some(error) = blocked {
                report.record_failure(command, error, 0);
                continue;
            }

            let Some(outcome) = outcome else {
                report.record_failure(
                    command,
                    StoreError::Unavailable("write task aborted".to_string()),
                    0,
                );
                continue;
            };

            match outcome.result {
                Ok(WriteOutcome::Node(NodeWrite::Created)) => report.nodes_created += 1,
                Ok(WriteOutcome::Node(NodeWrite::AlreadyExisted)) => report.nodes_existing += 1,
                Ok(WriteOutcome::Edge) => report.edges_created += 1,
                Err(e) => report.record_failure(command, e, outcome.attempts),
            }
        }

        tracing::info!(
            phase,
            nodes_created = report.nodes_created,
            nodes_existing = report.nodes_existing,
            edges_created = report.edges_created,
            failed = report.failures.len(),
            "Phase complete"
        );
        report
    }
}

fn missing_endpoint(command: &GraphCommand, failed_nodes: &HashSet<NodeRef>) -> Option<StoreError> {
    let GraphCommand::CreateEdge(edge) = command else {
        return None;
    };

    [&edge.from, &edge.to]
        .into_iter()
        .find(|node| failed_nodes.contains(*node))
        .map(|node| StoreError::MissingEndpoint(format!("{} was not persisted", node)))
}

async fn execute(
    store: Arc<dyn GraphStore>,
    policy: &RetryPolicy,
    timeout: Duration,
    command: &GraphCommand,
) -> Attempted<WriteOutcome, StoreError> {
    let operation = match command {
        GraphCommand::CreateNodeIfAbsent(_) => "create_node_if_absent",
        GraphCommand::CreateEdge(_) => "create_edge",
    };

    policy
        .retry(operation, StoreError::is_retryable, || {
            let store = store.clone();
            async move {
                let write = async {
                    match command {
                        GraphCommand::CreateNodeIfAbsent(node) => {
                            store.create_node_if_absent(node).await.map(WriteOutcome::Node)
                        }
                        GraphCommand::CreateEdge(edge) => {
                            store.create_edge(edge).await.map(|_| WriteOutcome::Edge)
                        }
                    }
                };

                match tokio::time::timeout(timeout, write).await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Timeout(timeout)),
                }
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::{CallKind, InMemoryGraphStore};

    fn entity(entity_type: &str, surface: &str) -> Entity {
        Entity {
            entity_type: entity_type.to_string(),
            surface: surface.to_string(),
            start: 0,
            end: surface.chars().count(),
        }
    }

    fn relationship(source: Entity, target: Entity, context: &str) -> Relationship {
        Relationship {
            source,
            target,
            context: context.to_string(),
        }
    }

    fn apple_john_paris() -> (Vec<Entity>, Vec<Relationship>) {
        let apple = entity("ORG", "Apple");
        let john = entity("PERSON", "John");
        let paris = entity("LOC", "Paris");
        let relationships = vec![
            relationship(apple.clone(), john.clone(), "D1"),
            relationship(john.clone(), paris.clone(), "D1"),
        ];
        (vec![apple, john, paris], relationships)
    }

    fn fast_config() -> PersistenceConfig {
        PersistenceConfig {
            max_concurrent_writes: 4,
            write_timeout: Duration::from_millis(200),
            edge_type: DEFAULT_EDGE_TYPE.to_string(),
            retry: RetryPolicy::new(2, 1, 2),
        }
    }

    fn gateway(store: Arc<InMemoryGraphStore>) -> PersistenceGateway {
        PersistenceGateway::new(store, fast_config())
    }

    #[tokio::test]
    async fn test_persist_graph() {
        let store = Arc::new(InMemoryGraphStore::new());
        let (entities, relationships) = apple_john_paris();

        let report = gateway(store.clone()).persist(&entities, &relationships).await;

        assert!(report.is_complete());
        assert_eq!(report.nodes_created, 3);
        assert_eq!(report.edges_created, 2);
        assert!(store.contains_node(&NodeRef::new("ORG").with_property("surface", "Apple")));

        let edges = store.edges();
        assert!(edges.iter().all(|e| e.edge_type == "RELATED"));
        assert!(edges.iter().all(|e| e.properties["context"] == "D1"));
    }

    #[tokio::test]
    async fn test_nodes_idempotent_edges_not() {
        let store = Arc::new(InMemoryGraphStore::new());
        let gateway = gateway(store.clone());
        let (entities, relationships) = apple_john_paris();

        gateway.persist(&entities, &relationships).await;
        let second = gateway.persist(&entities, &relationships).await;

        assert_eq!(second.nodes_created, 0);
        assert_eq!(second.nodes_existing, 3);
        assert_eq!(store.node_count(), 3);
        assert_eq!(store.edge_count(), 4);
    }

    #[tokio::test]
    async fn test_all_nodes_finish_before_any_edge() {
        let store = Arc::new(InMemoryGraphStore::new().with_latency(Duration::from_millis(5)));
        let entities: Vec<Entity> = (0..12).map(|i| entity("ORG", &format!("Org{}", i))).collect();
        let relationships: Vec<Relationship> = entities
            .windows(2)
            .map(|pair| relationship(pair[0].clone(), pair[1].clone(), "D1"))
            .collect();

        let report = gateway(store.clone()).persist(&entities, &relationships).await;
        assert!(report.is_complete());

        let calls = store.calls();
        let last_node = calls
            .iter()
            .filter(|c| c.kind == CallKind::Node)
            .map(|c| c.finished)
            .max()
            .unwrap();
        let first_edge = calls
            .iter()
            .filter(|c| c.kind == CallKind::Edge)
            .map(|c| c.started)
            .min()
            .unwrap();
        assert!(last_node < first_edge);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = Arc::new(InMemoryGraphStore::new().with_transient_failures(2));
        let gateway = PersistenceGateway::new(
            store.clone(),
            PersistenceConfig {
                max_concurrent_writes: 1,
                ..fast_config()
            },
        );

        let report = gateway.persist_entities(&[entity("ORG", "Apple")]).await;

        assert!(report.is_complete());
        assert_eq!(report.nodes_created, 1);
        assert_eq!(store.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_node_is_isolated() {
        let store = Arc::new(InMemoryGraphStore::new().with_failing_label("PERSON"));
        let (entities, relationships) = apple_john_paris();

        let report = gateway(store.clone()).persist(&entities, &relationships).await;

        assert_eq!(report.nodes_created, 2);
        assert_eq!(report.edges_created, 0);
        // John's node plus both edges that touch John
        assert_eq!(report.failures.len(), 3);

        let failure = &report.failures[0];
        assert_eq!(
            failure.command,
            GraphCommand::CreateNodeIfAbsent(NodeRef::new("PERSON").with_property("surface", "John"))
        );
        assert!(!failure.retryable);
        assert_eq!(failure.attempts, 1);

        assert!(report.failures[1..]
            .iter()
            .all(|f| matches!(f.command, GraphCommand::CreateEdge(_)) && f.attempts == 0));
        // blocked edges are never sent to the store
        assert!(store.calls().iter().all(|c| c.kind == CallKind::Node));
    }

    #[tokio::test]
    async fn test_edge_failures_keep_input_order() {
        let store = Arc::new(InMemoryGraphStore::new().with_failing_label("PERSON"));
        let apple = entity("ORG", "Apple");
        let john = entity("PERSON", "John");
        let paris = entity("LOC", "Paris");
        // Paris is never written, so the second edge fails in the store
        let relationships = vec![
            relationship(apple.clone(), john.clone(), "D1"),
            relationship(apple.clone(), paris, "D2"),
        ];

        let report = gateway(store.clone()).persist(&[apple, john], &relationships).await;

        let contexts: Vec<Option<&str>> = report
            .failures
            .iter()
            .map(|f| match &f.command {
                GraphCommand::CreateNodeIfAbsent(_) => None,
                GraphCommand::CreateEdge(edge) => Some(edge.properties["context"].as_str()),
            })
            .collect();
        assert_eq!(contexts, vec![None, Some("D1"), Some("D2")]);
        assert_eq!(report.failures[1].attempts, 0);
        assert_eq!(report.failures[2].attempts, 1);
    }

    #[tokio::test]
    async fn test_writes_bounded_by_limit() {
        let store = Arc::new(InMemoryGraphStore::new().with_latency(Duration::from_millis(20)));
        let gateway = PersistenceGateway::new(
            store.clone(),
            PersistenceConfig {
                max_concurrent_writes: 2,
                ..fast_config()
            },
        );
        let entities: Vec<Entity> = (0..10).map(|i| entity("ORG", &format!("Org{}", i))).collect();

        let report = gateway.persist_entities(&entities).await;
        assert_eq!(report.nodes_created, 10);

        // sweep the call log: +1 at each start tick, -1 at each finish tick
        let mut events: Vec<(u64, i64)> = store
            .calls()
            .iter()
            .flat_map(|c| [(c.started, 1), (c.finished, -1)])
            .collect();
        events.sort();

        let mut in_flight = 0;
        let mut peak = 0;
        for (_, delta) in events {
            in_flight += delta;
            peak = peak.max(in_flight);
        }
        assert_eq!(peak, 2);
    }

    #[tokio::test]
    async fn test_timeout_is_per_item_failure() {
        let store = Arc::new(InMemoryGraphStore::new().with_latency(Duration::from_millis(100)));
        let gateway = PersistenceGateway::new(
            store.clone(),
            PersistenceConfig {
                write_timeout: Duration::from_millis(10),
                retry: RetryPolicy::new(1, 1, 1),
                ..fast_config()
            },
        );

        let report = gateway.persist_entities(&[entity("ORG", "Apple")]).await;

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].retryable);
        assert_eq!(report.failures[0].attempts, 2);
        assert!(report.failures[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_invalid_label_reported() {
        let store = Arc::new(InMemoryGraphStore::new());
        let report = gateway(store.clone())
            .persist_entities(&[entity("B-ORG", "Apple"), entity("ORG", "Apple")])
            .await;

        assert_eq!(report.nodes_created, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.contains("invalid identifier"));
    }

    #[tokio::test]
    async fn test_relationships_alone_need_existing_nodes() {
        let store = Arc::new(InMemoryGraphStore::new());
        let (_, relationships) = apple_john_paris();

        let report = gateway(store.clone()).persist_relationships(&relationships).await;

        assert_eq!(report.edges_created, 0);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|f| f.error.contains("endpoint missing")));
    }
}
