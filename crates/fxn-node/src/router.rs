//! Message dispatch table.
//!
//! Each role declares which message types it handles. The table is checked
//! against the pipeline whitelist when it is built, so a role cannot
//! register a handler for a type that could never legally arrive.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use fxn_network::{allowed, rule_for, Pipeline};
use fxn_protocol::{decode, message_type, Message, MessageType, PeerId};

use crate::error::NodeError;

type Handler<N> = Box<
    dyn Fn(Arc<N>, PeerId, &[u8], Pipeline) -> BoxFuture<'static, Result<(), NodeError>>
        + Send
        + Sync,
>;

pub struct Router<N> {
    routes: HashMap<MessageType, Handler<N>>,
}

pub struct RouterBuilder<N> {
    routes: Vec<(MessageType, Handler<N>)>,
}

impl<N: Send + Sync + 'static> Router<N> {
    pub fn builder() -> RouterBuilder<N> {
        RouterBuilder { routes: Vec::new() }
    }

    pub fn handles(&self, msg_type: MessageType) -> bool {
        self.routes.contains_key(&msg_type)
    }

    /// Route one inbound payload to its handler.
    ///
    /// Payloads on a pipeline their type is not allowed on are logged and
    /// dropped. Unknown or unhandled types are errors. Every error is logged
    /// here before it is returned.
    pub async fn dispatch(
        &self,
        node: Arc<N>,
        from: PeerId,
        payload: &[u8],
        pipeline: Pipeline,
    ) -> Result<(), NodeError> {
        let msg_type = match message_type(payload) {
            Ok(msg_type) => msg_type,
            Err(e) => {
                tracing::warn!(
                    peer = %from,
                    pipeline = %pipeline,
                    error = %e,
                    "Malformed message envelope, dropping"
                );
                return Err(e.into());
            }
        };

        if !allowed(msg_type, &pipeline) {
            tracing::warn!(
                peer = %from,
                msg_type = %msg_type,
                pipeline = %pipeline,
                "Message not allowed on pipeline, dropping"
            );
            return Ok(());
        }

        let Some(handler) = self.routes.get(&msg_type) else {
            tracing::warn!(
                peer = %from,
                msg_type = %msg_type,
                pipeline = %pipeline,
                "No handler for message type"
            );
            return Err(NodeError::UnhandledMessage(msg_type));
        };

        tracing::debug!(peer = %from, msg_type = %msg_type, pipeline = %pipeline, "Processing message");

        handler(node, from.clone(), payload, pipeline.clone())
            .await
            .map_err(|e| {
                tracing::warn!(
                    peer = %from,
                    msg_type = %msg_type,
                    pipeline = %pipeline,
                    error = %e,
                    "Handler failed"
                );
                e
            })
    }
}

impl<N: Send + Sync + 'static> RouterBuilder<N> {
    /// Register the handler for messages of type `M`.
    pub fn route<M, F, Fut>(mut self, handler: F) -> Self
    where
        M: Message,
        F: Fn(Arc<N>, PeerId, M, Pipeline) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), NodeError>> + Send + 'static,
    {
        let boxed: Handler<N> = Box::new(
            move |node: Arc<N>,
                  from: PeerId,
                  payload: &[u8],
                  pipeline: Pipeline|
                  -> BoxFuture<'static, Result<(), NodeError>> {
                match decode::<M>(payload) {
                    Ok(msg) => Box::pin(handler(node, from, msg, pipeline)),
                    Err(e) => Box::pin(futures::future::ready(Err(NodeError::Protocol(e)))),
                }
            },
        );
        self.routes.push((M::TYPE, boxed));
        self
    }

    /// Build the table, rejecting duplicate registrations and types with no
    /// whitelist entry.
    pub fn build(self) -> Result<Router<N>, NodeError> {
        let mut routes = HashMap::with_capacity(self.routes.len());
        for (msg_type, handler) in self.routes {
            if rule_for(msg_type).is_none() {
                return Err(NodeError::InvalidRouter(format!(
                    "{msg_type} has no pipeline rule"
                )));
            }
            if routes.insert(msg_type, handler).is_some() {
                return Err(NodeError::InvalidRouter(format!(
                    "{msg_type} registered twice"
                )));
            }
        }
        Ok(Router { routes })
    }
}
