//! Error types shared by the resolver, the credential providers and the client roles.

use std::time::Duration;

use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use thiserror::Error;

use crate::credentials::CredentialStrategy;
use crate::security::SecurityProtocol;
use crate::ClientRole;

/// Invalid or incomplete configuration. Always fatal before any client is built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unsupported security protocol {0:?}")]
    UnsupportedProtocol(String),

    #[error("{0} requires a non-empty username and password")]
    MissingCredentials(SecurityProtocol),

    #[error("no AWS region configured (set KAFKA_AWSREGION or AWS_REGION)")]
    MissingRegion,

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// AWS identity resolution failures, tagged with the strategy that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("no AWS credentials available ({strategy} strategy): {reason}")]
    NoCredentialsAvailable {
        strategy: CredentialStrategy,
        reason: String,
    },

    #[error("MSK IAM signing failed ({strategy} strategy): {reason}")]
    SigningFailed {
        strategy: CredentialStrategy,
        reason: String,
    },

    #[error("AWS credential resolution timed out after {after:?} ({strategy} strategy)")]
    Timeout {
        strategy: CredentialStrategy,
        after: Duration,
    },
}

/// A role adapter could not produce a client.
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("unable to create {role} client: {source}")]
    Client {
        role: ClientRole,
        #[source]
        source: KafkaError,
    },

    #[error("unable to hand an MSK IAM token to the {role} client: {reason}")]
    Token { role: ClientRole, reason: String },

    #[error("{role} client setup did not complete: {reason}")]
    Task { role: ClientRole, reason: String },

    #[error("topic {topic} has no partitions to read")]
    NoPartitions { topic: String },
}

impl ConstructionError {
    pub(crate) fn client(role: ClientRole) -> impl FnOnce(KafkaError) -> Self {
        move |source| ConstructionError::Client { role, source }
    }
}

/// A single admin call, produce or read failed.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("{operation} failed for {target}: {source}")]
    Kafka {
        operation: &'static str,
        target: String,
        #[source]
        source: KafkaError,
    },

    #[error("{operation} rejected by broker for {target}: {code}")]
    Rejected {
        operation: &'static str,
        target: String,
        code: RDKafkaErrorCode,
    },

    #[error("{operation} returned no result for {target}")]
    NotFound {
        operation: &'static str,
        target: String,
    },

    #[error("{operation} task for {target} did not complete: {reason}")]
    Task {
        operation: &'static str,
        target: String,
        reason: String,
    },

    #[error("iteration {iteration} of {total} failed: {source}")]
    Batch {
        iteration: usize,
        total: usize,
        #[source]
        source: Box<OperationError>,
    },
}

impl OperationError {
    pub(crate) fn kafka(
        operation: &'static str,
        target: impl Into<String>,
    ) -> impl FnOnce(KafkaError) -> Self {
        let target = target.into();
        move |source| OperationError::Kafka {
            operation,
            target,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages() {
        assert_eq!(
            ConfigError::UnsupportedProtocol("KERBEROS".into()).to_string(),
            "unsupported security protocol \"KERBEROS\""
        );
        assert_eq!(
            ConfigError::MissingCredentials(SecurityProtocol::SaslSsl).to_string(),
            "SASL_SSL requires a non-empty username and password"
        );
    }

    #[test]
    fn test_credential_error_names_strategy() {
        let err = CredentialError::NoCredentialsAvailable {
            strategy: CredentialStrategy::ProviderChain,
            reason: "not on EC2".into(),
        };
        assert!(err.to_string().contains("v1"));
    }

    #[test]
    fn test_batch_error_keeps_iteration() {
        let err = OperationError::Batch {
            iteration: 3,
            total: 10,
            source: Box::new(OperationError::NotFound {
                operation: "produce",
                target: "events".into(),
            }),
        };
        assert!(err.to_string().starts_with("iteration 3 of 10 failed"));
    }
}
