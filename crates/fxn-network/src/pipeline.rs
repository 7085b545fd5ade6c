//! Delivery pipelines and the whitelist of message types legal on each.

use fxn_protocol::{MessageType, DEFAULT_TOPIC};
use serde::{Deserialize, Serialize};

/// How an inbound message reached the node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pipeline {
    /// Point-to-point delivery from a single peer.
    Direct,
    /// Broadcast on a subscribed topic.
    PubSub { topic: String },
}

impl Pipeline {
    pub fn pubsub(topic: impl Into<String>) -> Self {
        Self::PubSub {
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Direct => None,
            Self::PubSub { topic } => Some(topic),
        }
    }
}

impl std::fmt::Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::PubSub { topic } => write!(f, "pubsub({topic})"),
        }
    }
}

/// Which topics a message type may be broadcast on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicRule {
    Denied,
    Any,
    Only(&'static str),
}

/// Pipelines a message type is legal on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineRule {
    /// Allowed point to point.
    pub direct: bool,
    /// Topics the type may be broadcast on.
    pub pubsub: TopicRule,
}

impl PipelineRule {
    pub const DIRECT: Self = Self {
        direct: true,
        pubsub: TopicRule::Denied,
    };
    pub const PUBSUB: Self = Self {
        direct: false,
        pubsub: TopicRule::Any,
    };
    pub const BOTH: Self = Self {
        direct: true,
        pubsub: TopicRule::Any,
    };

    pub fn permits(&self, pipeline: &Pipeline) -> bool {
        match pipeline {
            Pipeline::Direct => self.direct,
            Pipeline::PubSub { topic } => match self.pubsub {
                TopicRule::Denied => false,
                TopicRule::Any => true,
                TopicRule::Only(only) => topic == only,
            },
        }
    }
}

/// Whitelist of message types and the pipelines they may arrive on.
pub const PIPELINE_RULES: &[(MessageType, PipelineRule)] = &[
    (
        MessageType::HealthCheck,
        PipelineRule {
            direct: false,
            pubsub: TopicRule::Only(DEFAULT_TOPIC),
        },
    ),
    (MessageType::RollCall, PipelineRule::PUBSUB),
    (MessageType::InstallFunction, PipelineRule::BOTH),
    (MessageType::RollCallResponse, PipelineRule::DIRECT),
    (MessageType::Execute, PipelineRule::DIRECT),
    (MessageType::ExecuteResponse, PipelineRule::DIRECT),
    (MessageType::FormCluster, PipelineRule::DIRECT),
    (MessageType::FormClusterResponse, PipelineRule::DIRECT),
    (MessageType::DisbandCluster, PipelineRule::DIRECT),
    (MessageType::InstallFunctionResponse, PipelineRule::DIRECT),
    (MessageType::ExecControl, PipelineRule::DIRECT),
    (MessageType::ExecControlResponse, PipelineRule::DIRECT),
];

/// Whitelist entry for a message type, if it has one.
pub fn rule_for(msg_type: MessageType) -> Option<PipelineRule> {
    PIPELINE_RULES
        .iter()
        .find(|(t, _)| *t == msg_type)
        .map(|(_, rule)| *rule)
}

/// Whether a message of this type may arrive on this pipeline.
pub fn allowed(msg_type: MessageType, pipeline: &Pipeline) -> bool {
    rule_for(msg_type).is_some_and(|rule| rule.permits(pipeline))
}
