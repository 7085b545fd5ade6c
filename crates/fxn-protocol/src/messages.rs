use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codes::Code;
use crate::consensus::ConsensusType;
use crate::error::ProtocolError;
use crate::execute::{Attributes, ExecutionRequest, ResultMap};
use crate::identity::PeerId;

/// Name of the JSON field holding the message type discriminator.
pub const TYPE_FIELD: &str = "type";

/// All message types exchanged between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    HealthCheck,
    RollCall,
    RollCallResponse,
    Execute,
    ExecuteResponse,
    ExecControl,
    ExecControlResponse,
    FormCluster,
    FormClusterResponse,
    DisbandCluster,
    InstallFunction,
    InstallFunctionResponse,
}

impl MessageType {
    pub const ALL: [MessageType; 12] = [
        Self::HealthCheck,
        Self::RollCall,
        Self::RollCallResponse,
        Self::Execute,
        Self::ExecuteResponse,
        Self::ExecControl,
        Self::ExecControlResponse,
        Self::FormCluster,
        Self::FormClusterResponse,
        Self::DisbandCluster,
        Self::InstallFunction,
        Self::InstallFunctionResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HealthCheck => "health_check",
            Self::RollCall => "roll_call",
            Self::RollCallResponse => "roll_call_response",
            Self::Execute => "execute",
            Self::ExecuteResponse => "execute_response",
            Self::ExecControl => "exec_control",
            Self::ExecControlResponse => "exec_control_response",
            Self::FormCluster => "form_cluster",
            Self::FormClusterResponse => "form_cluster_response",
            Self::DisbandCluster => "disband_cluster",
            Self::InstallFunction => "install_function",
            Self::InstallFunctionResponse => "install_function_response",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Replies and liveness pings. Handling one never waits on the network.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Self::HealthCheck
                | Self::RollCallResponse
                | Self::ExecuteResponse
                | Self::ExecControlResponse
                | Self::FormClusterResponse
                | Self::InstallFunctionResponse
        )
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload that can travel between nodes.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: MessageType;
}

/// Serialize a message with its type tag.
pub fn encode<M: Message>(msg: &M) -> Result<Vec<u8>, ProtocolError> {
    let mut value = serde_json::to_value(msg)?;
    match value.as_object_mut() {
        Some(fields) => {
            fields.insert(
                TYPE_FIELD.to_string(),
                serde_json::Value::String(M::TYPE.as_str().to_string()),
            );
        }
        None => {
            return Err(ProtocolError::InvalidRequest(format!(
                "{} does not serialize to an object",
                M::TYPE
            )))
        }
    }
    Ok(serde_json::to_vec(&value)?)
}

/// Decode a payload into a typed message. The type tag is ignored.
pub fn decode<M: Message>(payload: &[u8]) -> Result<M, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

#[derive(Deserialize)]
struct TypeTag {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Read only the type tag of a payload.
pub fn message_type(payload: &[u8]) -> Result<MessageType, ProtocolError> {
    let tag: TypeTag = serde_json::from_slice(payload)?;
    let kind = tag.kind.ok_or(ProtocolError::MissingType)?;
    MessageType::from_str(&kind).ok_or(ProtocolError::UnknownMessageType(kind))
}

// ── Health ──

/// Periodic liveness broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub code: Code,
}

impl Message for HealthCheck {
    const TYPE: MessageType = MessageType::HealthCheck;
}

// ── Roll call ──

/// Solicitation published by a head looking for peers able to run a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollCall {
    /// Head that published the roll call.
    pub origin: PeerId,
    /// Function the head needs run.
    pub function_id: String,
    /// Request the roll call is for.
    pub request_id: String,
    /// Consensus the selected peers will form.
    #[serde(default)]
    pub consensus: ConsensusType,
    /// Constraints a worker must satisfy to answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

impl Message for RollCall {
    const TYPE: MessageType = MessageType::RollCall;
}

/// A peer's answer to a roll call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollCallResponse {
    /// Roll call being answered.
    pub request_id: String,
    /// Echo of the roll call's function.
    pub function_id: String,
    /// `Accepted` to volunteer.
    pub code: Code,
}

impl Message for RollCallResponse {
    const TYPE: MessageType = MessageType::RollCallResponse;
}

// ── Execution ──

/// Work order. From a client to a head the request ID is empty and the head
/// mints one; from a head to a worker it carries the head's ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execute {
    /// Empty when a client asks a head to pick one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    /// Work to run, inlined in the message.
    #[serde(flatten)]
    pub request: ExecutionRequest,
    /// Topic for the head's roll call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl Message for Execute {
    const TYPE: MessageType = MessageType::Execute;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    /// Request the response is for.
    pub request_id: String,
    /// Overall outcome.
    pub code: Code,
    /// Result reported by each peer.
    #[serde(default)]
    pub results: ResultMap,
    /// Peers the work ran on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster: Vec<PeerId>,
    /// Error text when the execution failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Message for ExecuteResponse {
    const TYPE: MessageType = MessageType::ExecuteResponse;
}

// ── Execution control ──

/// Operation on a detached execution. Only `Wait` is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecAction {
    Stat,
    Wait,
    Kill,
}

impl ExecAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stat => "stat",
            Self::Wait => "wait",
            Self::Kill => "kill",
        }
    }
}

impl std::str::FromStr for ExecAction {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stat" => Ok(Self::Stat),
            "wait" => Ok(Self::Wait),
            "kill" => Ok(Self::Kill),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }
}

impl std::fmt::Display for ExecAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecControl {
    /// Set by the sender; receivers overwrite it with the transport peer.
    #[serde(default)]
    pub from: PeerId,
    /// Detached execution to act on.
    pub request_id: String,
    /// Action to take.
    pub action: ExecAction,
}

impl Message for ExecControl {
    const TYPE: MessageType = MessageType::ExecControl;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecControlResponse {
    /// Detached execution acted on.
    pub request_id: String,
    /// Peer that ran the action.
    #[serde(default)]
    pub from: PeerId,
    pub action: ExecAction,
    /// Result of the action, keyed by the replying peer.
    #[serde(default)]
    pub results: ResultMap,
    /// Error text when the action failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Message for ExecControlResponse {
    const TYPE: MessageType = MessageType::ExecControlResponse;
}

// ── Clusters ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormCluster {
    /// Request the cluster serves.
    pub request_id: String,
    /// Every member of the cluster.
    pub peers: Vec<PeerId>,
    /// Protocol the members run.
    pub consensus: ConsensusType,
}

impl Message for FormCluster {
    const TYPE: MessageType = MessageType::FormCluster;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormClusterResponse {
    /// Cluster being confirmed.
    pub request_id: String,
    /// `Ok` once the peer has joined.
    pub code: Code,
    pub consensus: ConsensusType,
    /// Why the peer could not join.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Message for FormClusterResponse {
    const TYPE: MessageType = MessageType::FormClusterResponse;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisbandCluster {
    /// Cluster to tear down.
    pub request_id: String,
}

impl Message for DisbandCluster {
    const TYPE: MessageType = MessageType::DisbandCluster;
}

// ── Function install ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallFunction {
    /// Where the worker fetches the function from.
    pub manifest_url: String,
    /// Content ID the function is installed under.
    pub cid: String,
}

impl InstallFunction {
    /// Install request for `cid`. An empty `manifest_url` falls back to the
    /// gateway location of the CID's manifest.
    pub fn new(manifest_url: &str, cid: &str) -> Self {
        let manifest_url = if manifest_url.is_empty() {
            manifest_url_from_cid(cid)
        } else {
            manifest_url.to_string()
        };
        Self {
            manifest_url,
            cid: cid.to_string(),
        }
    }
}

impl Message for InstallFunction {
    const TYPE: MessageType = MessageType::InstallFunction;
}

/// Gateway URL of the manifest published under `cid`.
pub fn manifest_url_from_cid(cid: &str) -> String {
    format!("https://{cid}.ipfs.w3s.link/manifest.json")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallFunctionResponse {
    /// Function the install was for.
    pub cid: String,
    /// `Ok` when the function is ready to run.
    pub code: Code,
    /// Why the install failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Message for InstallFunctionResponse {
    const TYPE: MessageType = MessageType::InstallFunctionResponse;
}
