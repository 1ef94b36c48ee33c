//! Broker transport errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Initial connection to an endpoint failed.
    #[error("failed to connect to broker endpoint {endpoint}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// An established connection failed mid-operation.
    #[error("broker connection error")]
    Io(#[from] std::io::Error),

    /// Wire frame could not be encoded or decoded.
    #[error("broker wire codec error")]
    Codec(#[from] bincode::Error),

    /// The (topic, channel) pair already has an attached consumer.
    #[error("a consumer is already attached to {topic}/{channel}")]
    ChannelBusy { topic: String, channel: String },

    /// A subscriber or publisher was built with no endpoints to talk to.
    #[error("no broker endpoints configured")]
    NoEndpoints,
}
