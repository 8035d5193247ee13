use anyhow::{Context, Result};
use async_trait::async_trait;
use neo4rs::{Graph, Query};
use std::collections::BTreeMap;

use crate::store::{
    EdgeCommand, GraphStats, GraphStore, NodeRef, NodeWrite, StoreError, StoreResult,
    validate_identifier,
};

/// Graph store backed by Neo4j over Bolt.
///
/// Query text is assembled only from fixed templates and validated
/// identifiers; every property value is a bound parameter.
#[derive(Clone)]
pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .context(format!("Failed to connect to Neo4j at {}", uri))?;
        Ok(Self::new(graph))
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    async fn count(&self, cypher: &str) -> StoreResult<usize> {
        let mut result = self
            .graph
            .execute(Query::new(cypher.to_string()))
            .await
            .map_err(unavailable)?;

        let count = match result.next().await.map_err(unavailable)? {
            Some(row) => row.get::<i64>("count").unwrap_or(0) as usize,
            None => 0,
        };
        Ok(count)
    }
}

fn unavailable(e: neo4rs::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Render `var:`Label` {`key`: $prefix0, ...}` and the matching parameters.
fn node_pattern(var: &str, node: &NodeRef, prefix: &str) -> (String, Vec<(String, String)>) {
    let (properties, params) = property_map(&node.properties, prefix);
    (format!("{}:`{}`{}", var, node.label, properties), params)
}

fn property_map(
    properties: &BTreeMap<String, String>,
    prefix: &str,
) -> (String, Vec<(String, String)>) {
    if properties.is_empty() {
        return (String::new(), Vec::new());
    }

    let mut fields = Vec::with_capacity(properties.len());
    let mut params = Vec::with_capacity(properties.len());
    for (i, (key, value)) in properties.iter().enumerate() {
        let param = format!("{}{}", prefix, i);
        fields.push(format!("`{}`: ${}", key, param));
        params.push((param, value.clone()));
    }

    (format!(" {{{}}}", fields.join(", ")), params)
}

fn bind(mut query: Query, params: Vec<(String, String)>) -> Query {
    for (name, value) in params {
        query = query.param(&name, value);
    }
    query
}

fn node_query(node: &NodeRef) -> (String, Vec<(String, String)>) {
    let (existing, params) = node_pattern("existing", node, "n");
    let (merged, _) = node_pattern("n", node, "n");
    let cypher = format!(
        "OPTIONAL MATCH ({}) WITH count(existing) AS before MERGE ({}) RETURN before = 0 AS created",
        existing, merged
    );
    (cypher, params)
}

fn edge_query(edge: &EdgeCommand) -> (String, Vec<(String, String)>) {
    let (from, mut params) = node_pattern("a", &edge.from, "a");
    let (to, to_params) = node_pattern("b", &edge.to, "b");
    let (properties, edge_params) = property_map(&edge.properties, "r");
    params.extend(to_params);
    params.extend(edge_params);

    let cypher = format!(
        "MATCH ({}) MATCH ({}) CREATE (a)-[r:`{}`{}]->(b) RETURN count(r) AS count",
        from, to, edge.edge_type, properties
    );
    (cypher, params)
}

fn index_statements(labels: &[String]) -> Vec<String> {
    labels
        .iter()
        .filter(|label| match validate_identifier(label) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(label = %label, error = %e, "Skipping index for label");
                false
            }
        })
        .map(|label| {
            format!(
                "CREATE INDEX {}_surface_index IF NOT EXISTS FOR (n:`{}`) ON (n.surface)",
                label, label
            )
        })
        .collect()
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn create_node_if_absent(&self, node: &NodeRef) -> StoreResult<NodeWrite> {
        node.validate()?;
        let (cypher, params) = node_query(node);

        let mut result = self
            .graph
            .execute(bind(Query::new(cypher), params))
            .await
            .map_err(unavailable)?;

        let created = match result.next().await.map_err(unavailable)? {
            Some(row) => row.get::<bool>("created").unwrap_or(false),
            None => false,
        };

        Ok(if created {
            NodeWrite::Created
        } else {
            NodeWrite::AlreadyExisted
        })
    }

    async fn create_edge(&self, edge: &EdgeCommand) -> StoreResult<()> {
        edge.validate()?;
        let (cypher, params) = edge_query(edge);

        let mut result = self
            .graph
            .execute(bind(Query::new(cypher), params))
            .await
            .map_err(unavailable)?;

        let created = match result.next().await.map_err(unavailable)? {
            Some(row) => row.get::<i64>("count").unwrap_or(0),
            None => 0,
        };

        if created == 0 {
            return Err(StoreError::MissingEndpoint(format!(
                "{} or {} not found",
                edge.from, edge.to
            )));
        }
        Ok(())
    }

    async fn stats(&self) -> StoreResult<GraphStats> {
        let node_count = self.count("MATCH (n) RETURN count(n) AS count").await?;
        let edge_count = self.count("MATCH ()-[r]->() RETURN count(r) AS count").await?;

        Ok(GraphStats {
            node_count,
            edge_count,
        })
    }

    /// Index the surface property of every label in the batch.
    ///
    /// Labels that are not valid identifiers are skipped; their node writes
    /// fail on their own later.
    async fn prepare(&self, labels: &[String]) -> StoreResult<()> {
        let statements = index_statements(labels);
        for cypher in &statements {
            self.graph
                .run(Query::new(cypher.clone()))
                .await
                .map_err(unavailable)?;
        }

        tracing::info!(labels = statements.len(), "Neo4j indexes ensured");
        Ok(())
    }
}
