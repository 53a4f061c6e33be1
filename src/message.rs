//! Wire messages exchanged between clients and coordinator replicas

use crate::CodecError;
use rkyv::util::AlignedVec;

/// Message delivered to a saga's routing key.
///
/// `StartSaga` comes from clients; the other variants are handoffs from a
/// stopping coordinator and resume the run at exactly the carried state.
#[derive(Clone, Debug, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum SagaMessage {
    /// Begin a new run at action 0
    StartSaga {
        /// Run identifier chosen by the client
        eid: String,
        /// Saga name
        saga: String,
        /// Invocation arguments, opaque to the coordinator
        args: Vec<u8>,
    },
    /// Resume by executing `actions[index]`
    StartAction {
        /// Run identifier
        eid: String,
        /// Saga name
        saga: String,
        /// Invocation arguments
        args: Vec<u8>,
        /// Action to execute
        index: u32,
    },
    /// Resume by compensating `actions[index]`
    StartCompensateAction {
        /// Run identifier
        eid: String,
        /// Saga name
        saga: String,
        /// Invocation arguments
        args: Vec<u8>,
        /// Action to compensate
        index: u32,
        /// Failed compensation attempts so far
        retries: u32,
    },
    /// Resume by waiting for a retry delay, then compensating
    DelayCompensateAction {
        /// Run identifier
        eid: String,
        /// Saga name
        saga: String,
        /// Invocation arguments
        args: Vec<u8>,
        /// Action to compensate
        index: u32,
        /// Failed compensation attempts so far
        retries: u32,
        /// Absolute wake time, millis since UNIX epoch
        schedule_millis: u64,
    },
}

impl SagaMessage {
    /// Run this message belongs to
    pub fn eid(&self) -> &str {
        match self {
            Self::StartSaga { eid, .. } => eid,
            Self::StartAction { eid, .. } => eid,
            Self::StartCompensateAction { eid, .. } => eid,
            Self::DelayCompensateAction { eid, .. } => eid,
        }
    }

    /// Saga name, also the routing key suffix
    pub fn saga(&self) -> &str {
        match self {
            Self::StartSaga { saga, .. } => saga,
            Self::StartAction { saga, .. } => saga,
            Self::StartCompensateAction { saga, .. } => saga,
            Self::DelayCompensateAction { saga, .. } => saga,
        }
    }

    /// Stable kebab-case name, used in logs and observer calls
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::StartSaga { .. } => "start-saga",
            Self::StartAction { .. } => "start-action",
            Self::StartCompensateAction { .. } => "start-compensate-action",
            Self::DelayCompensateAction { .. } => "delay-compensate-action",
        }
    }

    /// Serialize with rkyv
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| CodecError::Encode(e.to_string().into()))
    }

    /// Deserialize, validating the archive
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        // Transports hand out plain byte buffers; rkyv validation needs alignment.
        let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| CodecError::Decode(e.to_string().into()))
    }
}

/// Routing key (queue name) for a saga
pub fn routing_key(saga: &str) -> String {
    format!("saga:{}", saga)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_message_keeps_schedule_and_retries() {
        let message = SagaMessage::DelayCompensateAction {
            eid: "e-1".into(),
            saga: "transfer".into(),
            args: vec![1, 2, 3],
            index: 2,
            retries: 4,
            schedule_millis: 1_700_000_000_123,
        };

        let bytes = message.encode().unwrap();
        let decoded = SagaMessage::decode(&bytes).unwrap();

        assert_eq!(decoded, message);
        assert_eq!(decoded.message_type(), "delay-compensate-action");
        assert_eq!(decoded.eid(), "e-1");
        assert_eq!(decoded.saga(), "transfer");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(SagaMessage::decode(&[0xff, 0x00, 0x13]).is_err());
        assert!(SagaMessage::decode(&[]).is_err());
    }

    #[test]
    fn test_routing_key() {
        assert_eq!(routing_key("transfer"), "saga:transfer");
    }
}
