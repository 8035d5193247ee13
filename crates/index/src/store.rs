//! Command protocol between the persistence gateway and a graph store.
//!
//! Stores only ever see these fixed command shapes. Labels, property keys
//! and edge types are identifiers checked by [`validate_identifier`];
//! property values always travel as parameters.

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Connection or server-side failure; worth retrying.
    #[error("graph store unavailable: {0}")]
    Unavailable(String),

    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error("endpoint missing: {0}")]
    MissingEndpoint(String),

    #[error("invalid identifier {0:?}: expected [A-Za-z_][A-Za-z0-9_]*")]
    InvalidIdentifier(String),

    #[error("query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

pub fn validate_identifier(identifier: &str) -> StoreResult<()> {
    if IDENTIFIER.is_match(identifier) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(identifier.to_string()))
    }
}

/// A node addressed by label and property equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NodeRef {
    pub label: String,
    pub properties: BTreeMap<String, String>,
}

impl NodeRef {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> StoreResult<()> {
        validate_identifier(&self.label)?;
        self.properties.keys().try_for_each(|k| validate_identifier(k))
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(:{} {:?})", self.label, self.properties)
    }
}

/// A directed edge between two existing nodes. Never deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeCommand {
    pub from: NodeRef,
    pub to: NodeRef,
    pub edge_type: String,
    pub properties: BTreeMap<String, String>,
}

impl EdgeCommand {
    pub fn validate(&self) -> StoreResult<()> {
        self.from.validate()?;
        self.to.validate()?;
        validate_identifier(&self.edge_type)?;
        self.properties.keys().try_for_each(|k| validate_identifier(k))
    }
}

impl fmt::Display for EdgeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-[:{} {:?}]->{}", self.from, self.edge_type, self.properties, self.to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GraphCommand {
    CreateNodeIfAbsent(NodeRef),
    CreateEdge(EdgeCommand),
}

impl fmt::Display for GraphCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphCommand::CreateNodeIfAbsent(node) => write!(f, "CreateNodeIfAbsent{}", node),
            GraphCommand::CreateEdge(edge) => write!(f, "CreateEdge{}", edge),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeWrite {
    Created,
    AlreadyExisted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create the node unless one with the same label and properties exists.
    async fn create_node_if_absent(&self, node: &NodeRef) -> StoreResult<NodeWrite>;

    /// Create a new edge. Both endpoints must already exist.
    async fn create_edge(&self, edge: &EdgeCommand) -> StoreResult<()>;

    async fn stats(&self) -> StoreResult<GraphStats>;

    /// Called once per batch with the labels about to be written.
    async fn prepare(&self, _labels: &[String]) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers() {
        assert!(validate_identifier("ORG").is_ok());
        assert!(validate_identifier("B_PER2").is_ok());
        assert!(validate_identifier("_x").is_ok());

        for bad in ["", "2ORG", "ORG X", "ORG`) DETACH DELETE n //", "I-ORG"] {
            assert_eq!(
                validate_identifier(bad),
                Err(StoreError::InvalidIdentifier(bad.to_string()))
            );
        }
    }

    #[test]
    fn test_edge_validation_covers_all_identifiers() {
        let node = NodeRef::new("ORG").with_property("surface", "Apple");
        let mut edge = EdgeCommand {
            from: node.clone(),
            to: node.clone(),
            edge_type: "RELATED".to_string(),
            properties: BTreeMap::from([("context".to_string(), "D1".to_string())]),
        };
        assert!(edge.validate().is_ok());

        edge.properties.insert("bad key".to_string(), "x".to_string());
        assert!(edge.validate().is_err());

        edge.properties.remove("bad key");
        edge.to = NodeRef::new("B-LOC").with_property("surface", "Paris");
        assert!(edge.validate().is_err());
    }

    #[test]
    fn test_values_are_not_validated() {
        let node = NodeRef::new("ORG").with_property("surface", "Ben & Jerry's `x` {y}");
        assert!(node.validate().is_ok());
    }

    #[test]
    fn test_retryable() {
        assert!(StoreError::Unavailable("down".into()).is_retryable());
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!StoreError::MissingEndpoint("x".into()).is_retryable());
        assert!(!StoreError::InvalidIdentifier("x y".into()).is_retryable());
    }
}
