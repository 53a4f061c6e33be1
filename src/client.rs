//! Client for starting saga runs

use crate::message::routing_key;
use crate::{
    ClientError, ExecutionId, MessageSender, SagaMessage, SenderOptions, Transport,
};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Sends start requests to one saga's routing key.
///
/// `execute` returns once the transport accepted the request; it does not
/// wait for, or report, the outcome of the run.
pub struct SagaClient {
    transport: Arc<dyn Transport>,
    saga: Box<str>,
    sender: OnceCell<Arc<dyn MessageSender>>,
}

impl SagaClient {
    /// Client for `saga`; the sender is created on first use
    pub fn new(transport: Arc<dyn Transport>, saga: impl Into<Box<str>>) -> Self {
        Self {
            transport,
            saga: saga.into(),
            sender: OnceCell::new(),
        }
    }

    /// Saga this client starts
    pub fn saga(&self) -> &str {
        &self.saga
    }

    /// Start a new run with `args`; returns its eid for log correlation.
    pub async fn execute(&self, args: impl Into<Vec<u8>>) -> Result<ExecutionId, ClientError> {
        let sender = self
            .sender
            .get_or_try_init(|| async {
                self.transport
                    .create_sender(&routing_key(&self.saga), SenderOptions::fire_and_forget())
                    .await
            })
            .await?;

        let eid = ExecutionId::new();
        let message = SagaMessage::StartSaga {
            eid: eid.as_str().to_owned(),
            saga: self.saga.to_string(),
            args: args.into(),
        };
        sender.send(message.encode()?).await?;

        tracing::debug!(eid = %eid, saga = %self.saga, "Saga requested");
        Ok(eid)
    }
}
