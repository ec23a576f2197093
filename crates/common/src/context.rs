//! rdkafka client context shared by all three roles.

use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rdkafka::client::{ClientContext, OAuthToken};
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::ConsumerContext;
use rdkafka::error::KafkaError;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};

use crate::credentials::{AuthToken, MskIamSigner};
use crate::ClientRole;

/// MSK accepts any principal name; librdkafka only insists that one is present.
pub(crate) const MSK_PRINCIPAL: &str = "aws-msk-iam";

/// Forwards librdkafka logs into `tracing` and serves OAUTHBEARER tokens for MSK IAM.
#[derive(Debug, Clone)]
pub struct KafkaContext {
    role: ClientRole,
    signer: Option<Arc<MskIamSigner>>,
    runtime: Option<Handle>,
    refreshes: Arc<AtomicU64>,
}

impl KafkaContext {
    pub fn new(role: ClientRole) -> Self {
        Self {
            role,
            signer: None,
            runtime: None,
            refreshes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Binds an MSK IAM signer. Must be called from inside a tokio runtime.
    ///
    /// Token refreshes requested by librdkafka block on that runtime from a helper
    /// thread, which only makes progress on a multi-thread runtime.
    pub fn with_signer(mut self, signer: MskIamSigner) -> Self {
        let runtime = Handle::current();
        if runtime.runtime_flavor() == RuntimeFlavor::CurrentThread {
            warn!(
                role = %self.role,
                "MSK IAM token refresh needs a multi-thread runtime; refreshes may stall"
            );
        }
        self.signer = Some(Arc::new(signer));
        self.runtime = Some(runtime);
        self
    }

    pub(crate) fn signer(&self) -> Option<&Arc<MskIamSigner>> {
        self.signer.as_ref()
    }

    /// Number of OAUTHBEARER tokens handed to librdkafka so far.
    pub fn token_refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub(crate) fn record_refresh(&self, token: &AuthToken) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        info!(
            role = %self.role,
            expires_at_ms = token.expires_at_ms,
            "Refreshed MSK IAM token"
        );
    }

    pub fn role(&self) -> ClientRole {
        self.role
    }

    pub fn has_signer(&self) -> bool {
        self.signer.is_some()
    }
}

impl ClientContext for KafkaContext {
    const ENABLE_REFRESH_OAUTH_TOKEN: bool = true;

    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        let role = self.role;
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error
            | RDKafkaLogLevel::Warning => {
                warn!(%role, facility = %fac, "{}", log_message)
            }
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info | RDKafkaLogLevel::Debug => {
                debug!(%role, facility = %fac, "{}", log_message)
            }
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        warn!(role = %self.role, error = %error, "{}", reason);
    }

    fn generate_oauth_token(
        &self,
        _oauthbearer_config: Option<&str>,
    ) -> Result<OAuthToken, Box<dyn Error>> {
        let (Some(signer), Some(runtime)) = (&self.signer, &self.runtime) else {
            return Err(format!("{} client has no MSK IAM signer", self.role).into());
        };

        let token = signer.blocking_token(runtime)?;
        self.record_refresh(&token);

        Ok(OAuthToken {
            token: token.token,
            principal_name: MSK_PRINCIPAL.to_string(),
            lifetime_ms: token.expires_at_ms,
        })
    }
}

impl ConsumerContext for KafkaContext {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use aws_credential_types::provider::SharedCredentialsProvider;
    use aws_credential_types::Credentials;

    use crate::security::tests::WarnCounter;
    use crate::CredentialStrategy;

    #[test]
    fn test_token_requires_signer() {
        let context = KafkaContext::new(ClientRole::Producer);
        let err = context.generate_oauth_token(None).err().unwrap();
        assert_eq!(err.to_string(), "producer client has no MSK IAM signer");
    }

    #[test]
    fn test_new_context_has_no_signer() {
        let context = KafkaContext::new(ClientRole::Admin);
        assert_eq!(context.role(), ClientRole::Admin);
        assert!(!context.has_signer());
        assert_eq!(context.token_refreshes(), 0);
    }

    fn signer() -> MskIamSigner {
        MskIamSigner::new(
            "eu-west-1",
            SharedCredentialsProvider::new(Credentials::new("AKIDEXAMPLE", "secret", None, None, "test")),
            CredentialStrategy::DefaultConfig,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_signer_on_current_thread_runtime_warns() {
        let counter = WarnCounter::default();
        let context = counter.capture(|| KafkaContext::new(ClientRole::Consumer).with_signer(signer()));

        assert!(context.has_signer());
        assert_eq!(counter.count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_signer_on_multi_thread_runtime_serves_tokens() {
        let counter = WarnCounter::default();
        let context = counter.capture(|| KafkaContext::new(ClientRole::Producer).with_signer(signer()));
        assert_eq!(counter.count(), 0);

        let refreshed = context.clone();
        let token = tokio::task::spawn_blocking(move || {
            refreshed.generate_oauth_token(None).map_err(|e| e.to_string())
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(token.principal_name, MSK_PRINCIPAL);
        assert!(!token.token.is_empty());
        assert_eq!(context.token_refreshes(), 1);
    }
}
