use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub neo4j: Neo4jConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub graph: GraphConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_extractions: usize,
    pub max_concurrent_writes: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Neo4j,  // Bolt connection to a Neo4j server
    Memory, // In-process store, nothing survives a restart
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub store: StoreBackend,
    pub edge_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "neo4j".to_string(),
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_extractions: 5,
            max_concurrent_writes: 8,
            request_timeout_secs: 60,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::Neo4j,
            edge_type: index::gateway::DEFAULT_EDGE_TYPE.to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the JSON file named by `GRAPH_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("GRAPH_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&content).context(format!("Invalid config file: {:?}", path))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(uri) = var("NEO4J_URI") {
            self.neo4j.uri = uri;
        }
        if let Some(user) = var("NEO4J_USER") {
            self.neo4j.user = user;
        }
        if let Some(password) = var("NEO4J_PASSWORD") {
            self.neo4j.password = password;
        }
        if let Some(addr) = var("BIND_ADDR") {
            self.server.bind_addr = addr;
        }
    }

    pub fn assembler_config(&self) -> extract::AssemblerConfig {
        extract::AssemblerConfig {
            max_concurrent_documents: self.concurrency.max_concurrent_extractions,
        }
    }

    pub fn persistence_config(&self) -> index::PersistenceConfig {
        index::PersistenceConfig {
            max_concurrent_writes: self.concurrency.max_concurrent_writes,
            write_timeout: Duration::from_secs(self.concurrency.request_timeout_secs),
            edge_type: self.graph.edge_type.clone(),
            retry: index::RetryPolicy::new(
                self.retry.max_retries,
                self.retry.initial_backoff_ms,
                self.retry.max_backoff_ms,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"graph": {"store": "memory"}, "concurrency": {"max_concurrent_writes": 2}}"#,
        )
        .unwrap();

        assert_eq!(config.graph.store, StoreBackend::Memory);
        assert_eq!(config.graph.edge_type, "RELATED");
        assert_eq!(config.concurrency.max_concurrent_writes, 2);
        assert_eq!(config.concurrency.max_concurrent_extractions, 5);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config.apply_env(|key| match key {
            "NEO4J_URI" => Some("bolt://graph:7687".to_string()),
            "BIND_ADDR" => Some("127.0.0.1:8080".to_string()),
            _ => None,
        });

        assert_eq!(config.neo4j.uri, "bolt://graph:7687");
        assert_eq!(config.neo4j.user, "neo4j");
        assert_eq!(config.server.bind_addr, "127.0.0.1:8080");
    }

    #[test]
    fn test_persistence_config() {
        let config = AppConfig::default();
        let persistence = config.persistence_config();

        assert_eq!(persistence.write_timeout, Duration::from_secs(60));
        assert_eq!(persistence.max_concurrent_writes, 8);
        assert_eq!(persistence.retry.max_retries(), 3);
    }
}
