use async_trait::async_trait;
use dashmap::DashSet;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::store::{
    EdgeCommand, GraphStats, GraphStore, NodeRef, NodeWrite, StoreError, StoreResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Node,
    Edge,
}

/// One store call with logical timestamps for when it began and returned.
#[derive(Debug, Clone)]
pub struct StoreCall {
    pub kind: CallKind,
    pub started: u64,
    pub finished: u64,
    pub succeeded: bool,
}

/// Graph store held in process memory.
///
/// Used for dry runs and as the store in tests; faults can be injected per
/// label, as a number of transient failures, or as added latency.
#[derive(Default)]
pub struct InMemoryGraphStore {
    nodes: DashSet<NodeRef>,
    edges: Mutex<Vec<EdgeCommand>>,
    calls: Mutex<Vec<StoreCall>>,
    clock: AtomicU64,
    failing_labels: HashSet<String>,
    transient_failures: AtomicUsize,
    latency: Option<Duration>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write touching this label fails with a non-retryable error.
    pub fn with_failing_label(mut self, label: impl Into<String>) -> Self {
        self.failing_labels.insert(label.into());
        self
    }

    /// The next `count` calls fail as unavailable.
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn contains_node(&self, node: &NodeRef) -> bool {
        self.nodes.contains(node)
    }

    pub fn edges(&self) -> Vec<EdgeCommand> {
        self.edges.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    async fn inject_faults(&self, labels: &[&str]) -> StoreResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let transient = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            return Err(StoreError::Unavailable("injected transient failure".to_string()));
        }

        if let Some(label) = labels.iter().find(|l| self.failing_labels.contains(**l)) {
            return Err(StoreError::Query(format!("injected failure for label {}", label)));
        }

        Ok(())
    }

    fn record(&self, kind: CallKind, started: u64, succeeded: bool) {
        let finished = self.tick();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(StoreCall {
                kind,
                started,
                finished,
                succeeded,
            });
        }
    }

    fn insert_edge(&self, edge: &EdgeCommand) -> StoreResult<()> {
        if !self.nodes.contains(&edge.from) {
            return Err(StoreError::MissingEndpoint(edge.from.to_string()));
        }
        if !self.nodes.contains(&edge.to) {
            return Err(StoreError::MissingEndpoint(edge.to.to_string()));
        }

        self.edges
            .lock()
            .map_err(|_| StoreError::Unavailable("edge list poisoned".to_string()))?
            .push(edge.clone());
        Ok(())
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn create_node_if_absent(&self, node: &NodeRef) -> StoreResult<NodeWrite> {
        let started = self.tick();

        let result = async {
            self.inject_faults(&[node.label.as_str()]).await?;
            node.validate()?;

            if self.nodes.insert(node.clone()) {
                Ok(NodeWrite::Created)
            } else {
                Ok(NodeWrite::AlreadyExisted)
            }
        }
        .await;

        self.record(CallKind::Node, started, result.is_ok());
        result
    }

    async fn create_edge(&self, edge: &EdgeCommand) -> StoreResult<()> {
        let started = self.tick();

        let result = async {
            self.inject_faults(&[edge.from.label.as_str(), edge.to.label.as_str()])
                .await?;
            edge.validate()?;
            self.insert_edge(edge)
        }
        .await;

        self.record(CallKind::Edge, started, result.is_ok());
        result
    }

    async fn stats(&self) -> StoreResult<GraphStats> {
        Ok(GraphStats {
            node_count: self.node_count(),
            edge_count: self.edge_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn apple() -> NodeRef {
        NodeRef::new("ORG").with_property("surface", "Apple")
    }

    fn john() -> NodeRef {
        NodeRef::new("PERSON").with_property("surface", "John")
    }

    fn edge() -> EdgeCommand {
        EdgeCommand {
            from: apple(),
            to: john(),
            edge_type: "RELATED".to_string(),
            properties: BTreeMap::from([("context".to_string(), "D1".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_nodes_are_created_once() {
        let store = InMemoryGraphStore::new();

        assert_eq!(store.create_node_if_absent(&apple()).await, Ok(NodeWrite::Created));
        assert_eq!(
            store.create_node_if_absent(&apple()).await,
            Ok(NodeWrite::AlreadyExisted)
        );
        assert_eq!(store.node_count(), 1);
    }

    #[tokio::test]
    async fn test_edges_are_not_deduplicated() {
        let store = InMemoryGraphStore::new();
        store.create_node_if_absent(&apple()).await.unwrap();
        store.create_node_if_absent(&john()).await.unwrap();

        store.create_edge(&edge()).await.unwrap();
        store.create_edge(&edge()).await.unwrap();
        assert_eq!(store.edge_count(), 2);
    }

    #[tokio::test]
    async fn test_edge_requires_endpoints() {
        let store = InMemoryGraphStore::new();
        store.create_node_if_absent(&apple()).await.unwrap();

        let result = store.create_edge(&edge()).await;
        assert!(matches!(result, Err(StoreError::MissingEndpoint(_))));
        assert_eq!(store.edge_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_run_out() {
        let store = InMemoryGraphStore::new().with_transient_failures(2);

        assert!(store.create_node_if_absent(&apple()).await.is_err());
        assert!(store.create_node_if_absent(&apple()).await.is_err());
        assert!(store.create_node_if_absent(&apple()).await.is_ok());

        let calls = store.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| c.started < c.finished));
        assert_eq!(calls.iter().filter(|c| c.succeeded).count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_label_rejected() {
        let store = InMemoryGraphStore::new();
        let node = NodeRef::new("B-ORG").with_property("surface", "Apple");

        let result = store.create_node_if_absent(&node).await;
        assert!(matches!(result, Err(StoreError::InvalidIdentifier(_))));
        assert_eq!(store.node_count(), 0);
    }
}
