use std::collections::HashMap;
use std::time::Duration;

use fxn_protocol::DEFAULT_TOPIC;
use serde::{Deserialize, Serialize};

use crate::error::NodeError;

/// Settings shared by both roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Topics to subscribe to. The default topic is always included.
    pub topics: Vec<String>,
    /// Interval between health broadcasts.
    pub health_interval_secs: u64,
    /// Maximum number of inbound requests handled at once. Responses are
    /// not counted.
    pub concurrency: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            topics: vec![DEFAULT_TOPIC.to_string()],
            health_interval_secs: 60,
            concurrency: 10,
        }
    }
}

impl NodeConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    /// Topics to subscribe to, with the default topic first and no duplicates.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics = vec![DEFAULT_TOPIC.to_string()];
        for topic in &self.topics {
            if !topic.is_empty() && !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }
        topics
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        if self.concurrency == 0 {
            return Err(NodeError::InvalidConfig("concurrency must be positive".into()));
        }
        if self.health_interval_secs == 0 {
            return Err(NodeError::InvalidConfig(
                "health_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Head node settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadConfig {
    /// How long a roll call collects replies.
    pub roll_call_timeout_secs: u64,
    /// How long to wait for execution results.
    pub execution_timeout_secs: u64,
    /// How long peers have to confirm cluster membership.
    pub cluster_formation_timeout_secs: u64,
    /// Capacity of the execution result cache, the per-peer response maps
    /// and the detached execution table.
    pub result_cache_size: usize,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            roll_call_timeout_secs: 5,
            execution_timeout_secs: 20,
            cluster_formation_timeout_secs: 10,
            result_cache_size: 1000,
        }
    }
}

impl HeadConfig {
    pub fn roll_call_timeout(&self) -> Duration {
        Duration::from_secs(self.roll_call_timeout_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub fn cluster_formation_timeout(&self) -> Duration {
        Duration::from_secs(self.cluster_formation_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        for (name, value) in [
            ("roll_call_timeout_secs", self.roll_call_timeout_secs),
            ("execution_timeout_secs", self.execution_timeout_secs),
            ("cluster_formation_timeout_secs", self.cluster_formation_timeout_secs),
        ] {
            if value == 0 {
                return Err(NodeError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// Worker node settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Attributes matched against roll call constraints.
    pub attributes: HashMap<String, String>,
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.attributes.keys().any(|k| k.is_empty()) {
            return Err(NodeError::InvalidConfig("attribute names must not be empty".into()));
        }
        Ok(())
    }
}
