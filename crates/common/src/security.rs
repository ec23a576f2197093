//! Security profile resolution.
//!
//! Every client role goes through [`resolve`] (or [`SecurityProfile::resolve`] for raw
//! configuration strings), so the admin, producer and consumer transports can never
//! disagree on TLS or SASL settings.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use rdkafka::ClientConfig;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::credentials::CredentialStrategy;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityProtocol {
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
    AwsMskIam,
}

impl SecurityProtocol {
    pub const ALL: [SecurityProtocol; 5] = [
        SecurityProtocol::Plaintext,
        SecurityProtocol::Ssl,
        SecurityProtocol::SaslPlaintext,
        SecurityProtocol::SaslSsl,
        SecurityProtocol::AwsMskIam,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "PLAINTEXT",
            SecurityProtocol::Ssl => "SSL",
            SecurityProtocol::SaslPlaintext => "SASL_PLAINTEXT",
            SecurityProtocol::SaslSsl => "SASL_SSL",
            SecurityProtocol::AwsMskIam => "AWS_MSK_IAM",
        }
    }

    pub fn is_scram(&self) -> bool {
        matches!(self, SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl)
    }
}

impl Display for SecurityProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityProtocol {
    type Err = ConfigError;

    /// Case-insensitive, ignoring `_` and `-`, so `SASL_SSL`, `sasl-ssl` and `SaslSSL`
    /// all name the same protocol. Anything else is rejected.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match normalized.as_str() {
            "plaintext" => Ok(SecurityProtocol::Plaintext),
            "ssl" => Ok(SecurityProtocol::Ssl),
            "saslplaintext" => Ok(SecurityProtocol::SaslPlaintext),
            "saslssl" => Ok(SecurityProtocol::SaslSsl),
            "awsmskiam" => Ok(SecurityProtocol::AwsMskIam),
            _ => Err(ConfigError::UnsupportedProtocol(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SaslAlgorithm {
    ScramSha256,
    #[default]
    ScramSha512,
}

impl SaslAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaslAlgorithm::ScramSha256 => "SCRAM-SHA-256",
            SaslAlgorithm::ScramSha512 => "SCRAM-SHA-512",
        }
    }

    /// Lenient parse: unknown names fall back to the default with a warning.
    pub fn from_config(value: &str) -> Self {
        match value {
            "SCRAM-SHA-256" => SaslAlgorithm::ScramSha256,
            "SCRAM-SHA-512" => SaslAlgorithm::ScramSha512,
            other => {
                let fallback = SaslAlgorithm::default();
                warn!(
                    mechanism = %other,
                    fallback = %fallback,
                    "Unsupported SASL mechanism, assuming default"
                );
                fallback
            }
        }
    }
}

impl Display for SaslAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity material matching a protocol.
#[derive(Debug, Clone)]
pub enum Credentials {
    None,
    Scram {
        username: String,
        password: SecretString,
    },
    /// The role chain is resolved lazily by `strategy` when a client is built.
    AwsIam {
        region: Option<String>,
        strategy: CredentialStrategy,
    },
}

impl Credentials {
    pub fn scram(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Scram {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SaslMechanism {
    Scram {
        algorithm: SaslAlgorithm,
        username: String,
        password: SecretString,
    },
    AwsMskIam {
        region: String,
        strategy: CredentialStrategy,
    },
}

impl SaslMechanism {
    pub fn kind(&self) -> MechanismKind {
        match self {
            SaslMechanism::Scram { algorithm, .. } => MechanismKind::Scram(*algorithm),
            SaslMechanism::AwsMskIam { .. } => MechanismKind::AwsMskIam,
        }
    }

    /// Value for librdkafka's `sasl.mechanism`.
    pub fn rdkafka_name(&self) -> &'static str {
        match self {
            SaslMechanism::Scram { algorithm, .. } => algorithm.as_str(),
            SaslMechanism::AwsMskIam { .. } => "OAUTHBEARER",
        }
    }
}

impl PartialEq for SaslMechanism {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                SaslMechanism::Scram {
                    algorithm: a1,
                    username: u1,
                    password: p1,
                },
                SaslMechanism::Scram {
                    algorithm: a2,
                    username: u2,
                    password: p2,
                },
            ) => a1 == a2 && u1 == u2 && p1.expose_secret() == p2.expose_secret(),
            (
                SaslMechanism::AwsMskIam {
                    region: r1,
                    strategy: s1,
                },
                SaslMechanism::AwsMskIam {
                    region: r2,
                    strategy: s2,
                },
            ) => r1 == r2 && s1 == s2,
            _ => false,
        }
    }
}

impl Eq for SaslMechanism {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MechanismKind {
    Scram(SaslAlgorithm),
    AwsMskIam,
}

/// Resolved transport security. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityDescriptor {
    pub use_tls: bool,
    pub mechanism: Option<SaslMechanism>,
}

impl SecurityDescriptor {
    pub fn kind(&self) -> (bool, Option<MechanismKind>) {
        (self.use_tls, self.mechanism.as_ref().map(SaslMechanism::kind))
    }

    pub fn requires_aws_identity(&self) -> bool {
        matches!(self.mechanism, Some(SaslMechanism::AwsMskIam { .. }))
    }

    /// Value for librdkafka's `security.protocol`.
    pub fn rdkafka_protocol(&self) -> &'static str {
        match (self.use_tls, self.mechanism.is_some()) {
            (false, false) => "plaintext",
            (true, false) => "ssl",
            (false, true) => "sasl_plaintext",
            (true, true) => "sasl_ssl",
        }
    }

    pub fn apply(&self, config: &mut ClientConfig) {
        config.set("security.protocol", self.rdkafka_protocol());

        let Some(mechanism) = &self.mechanism else {
            return;
        };
        config.set("sasl.mechanism", mechanism.rdkafka_name());

        if let SaslMechanism::Scram {
            username, password, ..
        } = mechanism
        {
            config
                .set("sasl.username", username)
                .set("sasl.password", password.expose_secret());
        }
    }
}

/// Maps a protocol, algorithm and credentials onto a [`SecurityDescriptor`].
pub fn resolve(
    protocol: SecurityProtocol,
    algorithm: SaslAlgorithm,
    credentials: &Credentials,
) -> Result<SecurityDescriptor, ConfigError> {
    let descriptor = match protocol {
        SecurityProtocol::Plaintext => SecurityDescriptor {
            use_tls: false,
            mechanism: None,
        },
        SecurityProtocol::Ssl => SecurityDescriptor {
            use_tls: true,
            mechanism: None,
        },
        SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl => {
            let (username, password) = match credentials {
                Credentials::Scram { username, password }
                    if !username.is_empty() && !password.expose_secret().is_empty() =>
                {
                    (username.clone(), password.clone())
                }
                _ => return Err(ConfigError::MissingCredentials(protocol)),
            };
            SecurityDescriptor {
                use_tls: protocol == SecurityProtocol::SaslSsl,
                mechanism: Some(SaslMechanism::Scram {
                    algorithm,
                    username,
                    password,
                }),
            }
        }
        SecurityProtocol::AwsMskIam => {
            let Credentials::AwsIam { region, strategy } = credentials else {
                return Err(ConfigError::MissingCredentials(protocol));
            };
            let region = region
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or(ConfigError::MissingRegion)?;
            SecurityDescriptor {
                use_tls: true,
                mechanism: Some(SaslMechanism::AwsMskIam {
                    region: region.to_string(),
                    strategy: *strategy,
                }),
            }
        }
    };

    Ok(descriptor)
}

/// Raw security settings as they come out of the environment.
#[derive(Debug, Clone)]
pub struct SecurityProfile {
    pub protocol: String,
    pub sasl_mechanism: String,
    pub username: String,
    pub password: SecretString,
    pub aws_region: Option<String>,
    pub aws_credentials: CredentialStrategy,
}

impl Default for SecurityProfile {
    fn default() -> Self {
        Self {
            protocol: SecurityProtocol::Ssl.as_str().to_string(),
            sasl_mechanism: SaslAlgorithm::default().as_str().to_string(),
            username: String::new(),
            password: SecretString::new(String::new()),
            aws_region: None,
            aws_credentials: CredentialStrategy::default(),
        }
    }
}

impl SecurityProfile {
    /// Parses the protocol strictly and only consults the SASL mechanism when the
    /// protocol actually uses SCRAM.
    pub fn resolve(&self) -> Result<SecurityDescriptor, ConfigError> {
        let protocol: SecurityProtocol = self.protocol.parse()?;

        let algorithm = if protocol.is_scram() {
            SaslAlgorithm::from_config(&self.sasl_mechanism)
        } else {
            SaslAlgorithm::default()
        };

        let credentials = match protocol {
            SecurityProtocol::Plaintext | SecurityProtocol::Ssl => Credentials::None,
            SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl => Credentials::Scram {
                username: self.username.clone(),
                password: self.password.clone(),
            },
            SecurityProtocol::AwsMskIam => Credentials::AwsIam {
                region: self.aws_region.clone(),
                strategy: self.aws_credentials,
            },
        };

        resolve(protocol, algorithm, &credentials)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Counts WARN events emitted while it is the default subscriber.
    #[derive(Clone, Default)]
    pub(crate) struct WarnCounter(Arc<AtomicUsize>);

    impl WarnCounter {
        pub(crate) fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }

        pub(crate) fn capture<T>(&self, f: impl FnOnce() -> T) -> T {
            let subscriber = tracing_subscriber::registry().with(self.clone());
            tracing::subscriber::with_default(subscriber, f)
        }
    }

    impl<S: Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn profile(protocol: &str) -> SecurityProfile {
        SecurityProfile {
            protocol: protocol.to_string(),
            username: "u".to_string(),
            password: SecretString::new("p".to_string()),
            aws_region: Some("eu-west-1".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_protocol_table() {
        let expected = [
            (SecurityProtocol::Plaintext, false, false),
            (SecurityProtocol::Ssl, true, false),
            (SecurityProtocol::SaslPlaintext, false, true),
            (SecurityProtocol::SaslSsl, true, true),
            (SecurityProtocol::AwsMskIam, true, true),
        ];

        for (protocol, tls, has_mechanism) in expected {
            let descriptor = profile(protocol.as_str()).resolve().unwrap();
            assert_eq!(descriptor.use_tls, tls, "{protocol}");
            assert_eq!(descriptor.mechanism.is_some(), has_mechanism, "{protocol}");
        }
    }

    #[test]
    fn test_unknown_protocol_is_rejected() {
        for value in ["KERBEROS", "", "SASL_SSL_PLUS", "tls"] {
            assert_eq!(
                profile(value).resolve(),
                Err(ConfigError::UnsupportedProtocol(value.to_string()))
            );
        }
    }

    #[test]
    fn test_protocol_parsing_is_case_insensitive() {
        assert_eq!("ssl".parse::<SecurityProtocol>(), Ok(SecurityProtocol::Ssl));
        assert_eq!("SaslSSL".parse::<SecurityProtocol>(), Ok(SecurityProtocol::SaslSsl));
        assert_eq!("sasl-plaintext".parse::<SecurityProtocol>(), Ok(SecurityProtocol::SaslPlaintext));
        assert_eq!("AwsMskIam".parse::<SecurityProtocol>(), Ok(SecurityProtocol::AwsMskIam));
        assert_eq!(" PLAINTEXT ".parse::<SecurityProtocol>(), Ok(SecurityProtocol::Plaintext));
    }

    #[test]
    fn test_scram_requires_username() {
        for protocol in [SecurityProtocol::SaslPlaintext, SecurityProtocol::SaslSsl] {
            let err = resolve(
                protocol,
                SaslAlgorithm::ScramSha256,
                &Credentials::scram("", "p"),
            )
            .unwrap_err();
            assert_eq!(err, ConfigError::MissingCredentials(protocol));

            let err = resolve(protocol, SaslAlgorithm::ScramSha256, &Credentials::None)
                .unwrap_err();
            assert_eq!(err, ConfigError::MissingCredentials(protocol));
        }
    }

    #[test]
    fn test_scram_requires_password() {
        let err = resolve(
            SecurityProtocol::SaslSsl,
            SaslAlgorithm::ScramSha512,
            &Credentials::scram("u", ""),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingCredentials(SecurityProtocol::SaslSsl));
    }

    #[test]
    fn test_scram_carries_requested_algorithm() {
        for algorithm in [SaslAlgorithm::ScramSha256, SaslAlgorithm::ScramSha512] {
            let descriptor = resolve(
                SecurityProtocol::SaslPlaintext,
                algorithm,
                &Credentials::scram("u", "p"),
            )
            .unwrap();
            assert_eq!(
                descriptor.kind(),
                (false, Some(MechanismKind::Scram(algorithm)))
            );
        }
    }

    #[test]
    fn test_sasl_ssl_scram_sha256() {
        let profile = SecurityProfile {
            protocol: "SaslSSL".into(),
            sasl_mechanism: "SCRAM-SHA-256".into(),
            ..profile("")
        };

        let descriptor = profile.resolve().unwrap();
        assert_eq!(
            descriptor,
            SecurityDescriptor {
                use_tls: true,
                mechanism: Some(SaslMechanism::Scram {
                    algorithm: SaslAlgorithm::ScramSha256,
                    username: "u".into(),
                    password: SecretString::new("p".into()),
                }),
            }
        );
    }

    #[test]
    fn test_unknown_algorithm_falls_back_with_one_warning() {
        let counter = WarnCounter::default();
        let profile = SecurityProfile {
            sasl_mechanism: "SCRAM-SHA-1".into(),
            ..profile("SASL_SSL")
        };

        let descriptor = counter.capture(|| profile.resolve()).unwrap();

        assert_eq!(
            descriptor.kind(),
            (true, Some(MechanismKind::Scram(SaslAlgorithm::ScramSha512)))
        );
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn test_algorithm_match_is_exact() {
        let counter = WarnCounter::default();
        let algorithm = counter.capture(|| SaslAlgorithm::from_config("scram-sha-256"));
        assert_eq!(algorithm, SaslAlgorithm::ScramSha512);
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn test_non_scram_protocols_ignore_mechanism() {
        let counter = WarnCounter::default();
        let profile = SecurityProfile {
            sasl_mechanism: "bogus".into(),
            ..profile("SSL")
        };
        counter.capture(|| profile.resolve()).unwrap();
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_aws_requires_region() {
        for region in [None, Some(String::new()), Some("  ".to_string())] {
            let credentials = Credentials::AwsIam {
                region,
                strategy: CredentialStrategy::DefaultConfig,
            };
            assert_eq!(
                resolve(SecurityProtocol::AwsMskIam, SaslAlgorithm::default(), &credentials),
                Err(ConfigError::MissingRegion)
            );
        }
    }

    #[test]
    fn test_aws_binds_region_and_strategy() {
        let credentials = Credentials::AwsIam {
            region: Some("ap-southeast-2".into()),
            strategy: CredentialStrategy::ProviderChain,
        };
        let descriptor =
            resolve(SecurityProtocol::AwsMskIam, SaslAlgorithm::default(), &credentials)
                .unwrap();
        assert_eq!(
            descriptor.mechanism,
            Some(SaslMechanism::AwsMskIam {
                region: "ap-southeast-2".into(),
                strategy: CredentialStrategy::ProviderChain,
            })
        );
        assert!(descriptor.requires_aws_identity());
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let profile = profile("SASL_PLAINTEXT");
        let first = profile.resolve().unwrap();
        for _ in 0..10 {
            assert_eq!(profile.resolve().unwrap(), first);
        }
    }

    #[test]
    fn test_apply_sets_rdkafka_keys() {
        let mut config = ClientConfig::new();
        profile("SASL_SSL").resolve().unwrap().apply(&mut config);

        assert_eq!(config.get("security.protocol"), Some("sasl_ssl"));
        assert_eq!(config.get("sasl.mechanism"), Some("SCRAM-SHA-512"));
        assert_eq!(config.get("sasl.username"), Some("u"));
        assert_eq!(config.get("sasl.password"), Some("p"));
    }

    #[test]
    fn test_apply_aws_uses_oauthbearer() {
        let mut config = ClientConfig::new();
        profile("AWS_MSK_IAM").resolve().unwrap().apply(&mut config);

        assert_eq!(config.get("security.protocol"), Some("sasl_ssl"));
        assert_eq!(config.get("sasl.mechanism"), Some("OAUTHBEARER"));
        assert_eq!(config.get("sasl.username"), None);
    }

    #[test]
    fn test_debug_redacts_password() {
        let descriptor = profile("SASL_SSL").resolve().unwrap();
        let rendered = format!("{descriptor:?}");
        assert!(!rendered.contains("\"p\""));
    }
}
