/// Topic every node joins; heads publish roll calls and installs here unless
/// the request names another topic.
pub const DEFAULT_TOPIC: &str = "fxn/general";

/// Protocol version string announced by the connector's health endpoint.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Minimum number of replicas a PBFT cluster needs to tolerate one faulty node.
pub const PBFT_MINIMUM_REPLICA_COUNT: usize = 4;

/// Node count value meaning "as many peers as answer in the window".
pub const ANY_NODE_COUNT: i32 = -1;
