//! AWS MSK IAM identity resolution.
//!
//! Two strategies sit behind [`CredentialProvider`]:
//!
//! - [`ProviderChainCredentials`] (v1): environment credentials, then EC2 instance
//!   metadata, probed once and bound to the region.
//! - [`DefaultConfigCredentials`] (v2): the SDK's default config loader, followed by an
//!   explicit signing handshake before the signer is handed out.
//!
//! Every network call here is bounded by a timeout; instance metadata lookups hang
//! indefinitely off EC2 otherwise.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::environment::credentials::EnvironmentVariableCredentialsProvider;
use aws_config::imds;
use aws_config::imds::credentials::ImdsCredentialsProvider;
use aws_config::meta::credentials::CredentialsProviderChain;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_types::region::Region;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::error::{ConfigError, CredentialError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CredentialStrategy {
    /// Explicit environment → EC2 instance-role chain.
    ProviderChain,
    /// SDK default configuration loader.
    #[default]
    DefaultConfig,
}

impl CredentialStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStrategy::ProviderChain => "v1",
            CredentialStrategy::DefaultConfig => "v2",
        }
    }

    /// The provider implementing this strategy.
    pub fn provider(&self, timeout: Duration) -> Arc<dyn CredentialProvider> {
        match self {
            CredentialStrategy::ProviderChain => Arc::new(ProviderChainCredentials::new(timeout)),
            CredentialStrategy::DefaultConfig => Arc::new(DefaultConfigCredentials::new(timeout)),
        }
    }
}

impl Display for CredentialStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialStrategy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "v1" | "chain" => Ok(CredentialStrategy::ProviderChain),
            "v2" | "default" => Ok(CredentialStrategy::DefaultConfig),
            _ => Err(ConfigError::InvalidValue {
                key: "KAFKA_AWSCREDENTIALS",
                value: value.to_string(),
                reason: "expected v1 or v2".to_string(),
            }),
        }
    }
}

/// Resolves a region-bound MSK IAM signer.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn strategy(&self) -> CredentialStrategy;

    async fn resolve_aws_identity(&self, region: &str) -> Result<MskIamSigner, CredentialError>;
}

/// A signed MSK IAM auth token and its absolute expiry (ms since the epoch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub token: String,
    pub expires_at_ms: i64,
}

/// Signs MSK IAM auth tokens with a region and a credentials provider.
#[derive(Clone)]
pub struct MskIamSigner {
    region: Region,
    credentials: SharedCredentialsProvider,
    strategy: CredentialStrategy,
    timeout: Duration,
}

impl fmt::Debug for MskIamSigner {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MskIamSigner")
            .field("region", &self.region)
            .field("strategy", &self.strategy)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl MskIamSigner {
    pub fn new(
        region: impl Into<String>,
        credentials: SharedCredentialsProvider,
        strategy: CredentialStrategy,
        timeout: Duration,
    ) -> Self {
        Self {
            region: Region::new(region.into()),
            credentials,
            strategy,
            timeout,
        }
    }

    pub fn region(&self) -> &str {
        self.region.as_ref()
    }

    pub fn strategy(&self) -> CredentialStrategy {
        self.strategy
    }

    /// Signs a fresh token.
    pub async fn token(&self) -> Result<AuthToken, CredentialError> {
        let signing = aws_msk_iam_sasl_signer::generate_auth_token_from_credentials_provider(
            self.region.clone(),
            self.credentials.clone(),
        );

        let (token, expires_at_ms) = tokio::time::timeout(self.timeout, signing)
            .await
            .map_err(|_| CredentialError::Timeout {
                strategy: self.strategy,
                after: self.timeout,
            })?
            .map_err(|e| CredentialError::SigningFailed {
                strategy: self.strategy,
                reason: e.to_string(),
            })?;

        Ok(AuthToken {
            token,
            expires_at_ms,
        })
    }

    /// Performs one signing handshake so failures surface before a client is built.
    pub async fn start(&self) -> Result<(), CredentialError> {
        let token = self.token().await?;
        debug!(
            region = %self.region(),
            strategy = %self.strategy,
            expires_at_ms = token.expires_at_ms,
            "MSK IAM signer started"
        );
        Ok(())
    }

    /// Signs a token from a thread that may not be able to enter the runtime.
    ///
    /// librdkafka asks for tokens from its own threads and, for stream consumers, from
    /// inside `recv()` on a runtime worker; blocking on `runtime` from a fresh thread is
    /// valid in both cases.
    ///
    /// `runtime` must be a multi-thread runtime. On a current-thread runtime only the
    /// runtime's own thread drives IO and timers, so a credential fetch issued from here
    /// never completes while that thread is parked in `recv()`.
    pub fn blocking_token(&self, runtime: &Handle) -> Result<AuthToken, CredentialError> {
        let signer = self.clone();
        let runtime = runtime.clone();
        let strategy = self.strategy;

        std::thread::spawn(move || runtime.block_on(signer.token()))
            .join()
            .map_err(|_| CredentialError::SigningFailed {
                strategy,
                reason: "signing thread panicked".to_string(),
            })?
    }
}

/// Asks `provider` for credentials once, within `timeout`.
async fn probe(
    provider: &SharedCredentialsProvider,
    strategy: CredentialStrategy,
    timeout: Duration,
) -> Result<(), CredentialError> {
    tokio::time::timeout(timeout, provider.provide_credentials())
        .await
        .map_err(|_| CredentialError::Timeout {
            strategy,
            after: timeout,
        })?
        .map_err(|e| CredentialError::NoCredentialsAvailable {
            strategy,
            reason: e.to_string(),
        })?;
    Ok(())
}

/// v1: environment variables, then EC2 instance-role credentials.
#[derive(Debug, Clone)]
pub struct ProviderChainCredentials {
    timeout: Duration,
    chain: SharedCredentialsProvider,
}

impl ProviderChainCredentials {
    pub fn new(timeout: Duration) -> Self {
        let imds_client = imds::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .max_attempts(1)
            .build();

        let chain = CredentialsProviderChain::first_try(
            "Environment",
            EnvironmentVariableCredentialsProvider::new(),
        )
        .or_else(
            "Ec2InstanceMetadata",
            ImdsCredentialsProvider::builder()
                .imds_client(imds_client)
                .build(),
        );

        Self::from_provider(SharedCredentialsProvider::new(chain), timeout)
    }

    /// Uses `chain` in place of the environment and instance-metadata lookups.
    pub fn from_provider(chain: SharedCredentialsProvider, timeout: Duration) -> Self {
        Self { timeout, chain }
    }
}

#[async_trait]
impl CredentialProvider for ProviderChainCredentials {
    fn strategy(&self) -> CredentialStrategy {
        CredentialStrategy::ProviderChain
    }

    async fn resolve_aws_identity(&self, region: &str) -> Result<MskIamSigner, CredentialError> {
        let provider = self.chain.clone();
        probe(&provider, self.strategy(), self.timeout).await?;

        info!(region = %region, strategy = %self.strategy(), "Resolved AWS credentials");
        Ok(MskIamSigner::new(region, provider, self.strategy(), self.timeout))
    }
}

/// v2: the SDK default config loader, plus an explicit signing handshake.
#[derive(Debug, Clone)]
pub struct DefaultConfigCredentials {
    timeout: Duration,
    credentials: Option<SharedCredentialsProvider>,
}

impl DefaultConfigCredentials {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            credentials: None,
        }
    }

    /// Loads the SDK config with `credentials` instead of the default provider chain.
    pub fn with_credentials_provider(mut self, credentials: SharedCredentialsProvider) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

#[async_trait]
impl CredentialProvider for DefaultConfigCredentials {
    fn strategy(&self) -> CredentialStrategy {
        CredentialStrategy::DefaultConfig
    }

    async fn resolve_aws_identity(&self, region: &str) -> Result<MskIamSigner, CredentialError> {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(credentials) = &self.credentials {
            loader = loader.credentials_provider(credentials.clone());
        }
        let loading = loader.load();
        let sdk_config = tokio::time::timeout(self.timeout, loading)
            .await
            .map_err(|_| CredentialError::Timeout {
                strategy: self.strategy(),
                after: self.timeout,
            })?;

        let provider = sdk_config.credentials_provider().ok_or_else(|| {
            CredentialError::NoCredentialsAvailable {
                strategy: self.strategy(),
                reason: "default config loader produced no credentials provider".to_string(),
            }
        })?;
        probe(&provider, self.strategy(), self.timeout).await?;

        let signer = MskIamSigner::new(region, provider, self.strategy(), self.timeout);
        signer.start().await?;

        info!(region = %region, strategy = %self.strategy(), "Resolved AWS credentials");
        Ok(signer)
    }
}
