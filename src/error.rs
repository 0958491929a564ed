//! Error taxonomy for the graph engine.
//!
//! Missing keys are never errors: lookups on absent assoc-lists or node
//! attributes return empty results. Everything that is an error falls into
//! one of the variants below.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Bad input file or request argument; local to the request.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid or unloadable process configuration.
    #[error("config error: {0}")]
    Config(String),

    /// A node id was sent to a shard that does not own it.
    #[error("node {node_id} does not belong to shard {shard_id} (mod {num_shards})")]
    Routing {
        node_id: i64,
        shard_id: u32,
        num_shards: u32,
    },

    /// A suffix or log tier was missing or mid-swap past the retry budget.
    #[error("tier {tier} unavailable")]
    TierUnavailable { tier: &'static str },

    /// A fan-out lost at least one shard; carries the ids that failed.
    #[error("fan-out degraded: {failed} of {total} shards unavailable")]
    PartialUnavailable { failed: usize, total: usize },

    /// An ordering or layout invariant was violated at read time. Fatal to
    /// the shard process.
    #[error("index corruption in {context}: {detail}")]
    IndexCorruption {
        context: &'static str,
        detail: String,
    },

    #[error("artifact format error: {0}")]
    Artifact(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
}

impl From<figment::Error> for StoreError {
    fn from(err: figment::Error) -> Self {
        StoreError::Config(err.to_string())
    }
}

impl StoreError {
    /// Map onto the RPC status space at the service boundary.
    pub fn into_status(self) -> tonic::Status {
        match &self {
            StoreError::Parse(_) | StoreError::Config(_) => {
                tonic::Status::invalid_argument(self.to_string())
            }
            StoreError::Routing { .. } => tonic::Status::failed_precondition(self.to_string()),
            StoreError::TierUnavailable { .. } => tonic::Status::unavailable(self.to_string()),
            StoreError::PartialUnavailable { .. } => tonic::Status::unavailable(self.to_string()),
            StoreError::IndexCorruption { .. } => tonic::Status::data_loss(self.to_string()),
            StoreError::Artifact(_) | StoreError::Encode(_) => {
                tonic::Status::internal(self.to_string())
            }
            StoreError::Io(_) => tonic::Status::internal(self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_error_names_the_shard() {
        let err = StoreError::Routing {
            node_id: 11,
            shard_id: 0,
            num_shards: 2,
        };
        let text = err.to_string();
        assert!(text.contains("11"));
        assert!(text.contains("shard 0"));
    }

    #[test]
    fn status_codes_follow_the_taxonomy() {
        let status = StoreError::Parse("bad line".into()).into_status();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status = StoreError::IndexCorruption {
            context: "assoc list",
            detail: "time order".into(),
        }
        .into_status();
        assert_eq!(status.code(), tonic::Code::DataLoss);
    }
}
