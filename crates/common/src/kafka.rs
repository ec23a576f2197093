use std::sync::Arc;

use rdkafka::ClientConfig;
use tracing::{debug, info};

use crate::config::KafkaConfig;
use crate::context::KafkaContext;
use crate::credentials::CredentialProvider;
use crate::error::ConstructionError;
use crate::roles::admin::{self, Admin};
use crate::roles::consumer::{self, ConsumerMode, TopicConsumer};
use crate::roles::producer::{self, TopicProducer};
use crate::security::{SaslMechanism, SecurityDescriptor};
use crate::ClientRole;

/// Connection settings shared by every role, before any security keys are applied.
pub fn base_config(config: &KafkaConfig, descriptor: &SecurityDescriptor) -> ClientConfig {
    let mut cfg = ClientConfig::new();
    cfg.set("bootstrap.servers", config.bootstrap_list())
        .set("client.id", &config.client_id)
        .set("socket.timeout.ms", config.timeout.as_millis().to_string());

    if descriptor.use_tls {
        if let Some(ca) = &config.ssl_ca_location {
            cfg.set("ssl.ca.location", ca);
        }
    }

    cfg
}

/// Applies `descriptor` to `base` and builds the matching client context.
///
/// MSK IAM resolves the AWS identity here, so a missing or unreachable credential source
/// fails construction instead of surfacing later inside librdkafka's refresh callback.
pub async fn secure(
    mut base: ClientConfig,
    role: ClientRole,
    descriptor: &SecurityDescriptor,
    credentials: &dyn CredentialProvider,
) -> Result<(ClientConfig, KafkaContext), ConstructionError> {
    descriptor.apply(&mut base);

    let context = match &descriptor.mechanism {
        Some(SaslMechanism::AwsMskIam { region, .. }) => {
            let signer = credentials.resolve_aws_identity(region).await?;
            KafkaContext::new(role).with_signer(signer)
        }
        _ => KafkaContext::new(role),
    };

    debug!(
        %role,
        protocol = descriptor.rdkafka_protocol(),
        mechanism = descriptor.mechanism.as_ref().map(SaslMechanism::rdkafka_name),
        "Client security configured"
    );

    Ok((base, context))
}

/// Builds admin, producer and consumer clients from one immutable configuration.
///
/// The security profile is resolved again for every client, so each role binds to its
/// own descriptor and all of them agree.
#[derive(Clone)]
pub struct ClientFactory {
    config: Arc<KafkaConfig>,
    credentials: Arc<dyn CredentialProvider>,
}

impl ClientFactory {
    pub fn new(config: KafkaConfig) -> Self {
        let credentials = config.security.aws_credentials.provider(config.aws_timeout);
        Self {
            config: Arc::new(config),
            credentials,
        }
    }

    /// Replaces the AWS credential strategy picked from the configuration.
    pub fn with_credential_provider(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    pub fn descriptor_for(&self, role: ClientRole) -> Result<SecurityDescriptor, ConstructionError> {
        let descriptor = self.config.security.resolve()?;
        info!(
            %role,
            brokers = %self.config.bootstrap_list(),
            protocol = descriptor.rdkafka_protocol(),
            "Resolved security profile"
        );
        Ok(descriptor)
    }

    pub async fn admin(&self) -> Result<Admin, ConstructionError> {
        let descriptor = self.descriptor_for(ClientRole::Admin)?;
        admin::build(
            base_config(&self.config, &descriptor),
            &descriptor,
            self.credentials.as_ref(),
            self.config.timeout,
        )
        .await
    }

    pub async fn producer(&self, topic: &str) -> Result<TopicProducer, ConstructionError> {
        let descriptor = self.descriptor_for(ClientRole::Producer)?;
        producer::build(
            base_config(&self.config, &descriptor),
            &descriptor,
            self.credentials.as_ref(),
            producer::ProducerSettings {
                topic: topic.to_string(),
                acks: self.config.required_acks,
                timeout: self.config.timeout,
            },
        )
        .await
    }

    pub async fn consumer(
        &self,
        topic: &str,
        mode: ConsumerMode,
    ) -> Result<TopicConsumer, ConstructionError> {
        let descriptor = self.descriptor_for(ClientRole::Consumer)?;
        consumer::build(
            base_config(&self.config, &descriptor),
            &descriptor,
            self.credentials.as_ref(),
            consumer::ConsumerSettings {
                topic: topic.to_string(),
                mode,
                start_offset: self.config.start_offset,
                timeout: self.config.timeout,
            },
        )
        .await
    }
}
