//! Configuration loaded once from the environment.
//!
//! Variable names follow the `KAFKA_*` / `LOGGING_*` scheme used by the existing
//! deployments. An optional `.env` file is honoured. Everything else in the crate takes
//! these values read-only.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::credentials::CredentialStrategy;
use crate::error::ConfigError;
use crate::security::SecurityProfile;

#[derive(Debug, Clone)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            kafka: KafkaConfig::from_lookup(&get)?,
            logging: LoggingConfig::from_lookup(&get)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequiredAcks {
    /// `acks=1`
    #[default]
    Leader,
    /// `acks=all`
    AllReplicas,
}

impl RequiredAcks {
    pub fn as_rdkafka(&self) -> &'static str {
        match self {
            RequiredAcks::Leader => "1",
            RequiredAcks::AllReplicas => "all",
        }
    }
}

impl FromStr for RequiredAcks {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "1" => Ok(RequiredAcks::Leader),
            "2" => Ok(RequiredAcks::AllReplicas),
            _ => Err(ConfigError::InvalidValue {
                key: "KAFKA_REQUIREDACKS",
                value: value.to_string(),
                reason: "expected 1 (leader) or 2 (all replicas)".to_string(),
            }),
        }
    }
}

/// Where a consumer starts when it has no committed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartOffset {
    #[default]
    Earliest,
    Latest,
}

impl StartOffset {
    pub fn as_rdkafka(&self) -> &'static str {
        match self {
            StartOffset::Earliest => "earliest",
            StartOffset::Latest => "latest",
        }
    }
}

impl FromStr for StartOffset {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "earliest" | "first" => Ok(StartOffset::Earliest),
            "latest" | "last" => Ok(StartOffset::Latest),
            _ => Err(ConfigError::InvalidValue {
                key: "KAFKA_OFFSET",
                value: value.to_string(),
                reason: "expected earliest or latest".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub bootstrap_servers: Vec<String>,
    pub client_id: String,
    pub required_acks: RequiredAcks,
    pub start_offset: StartOffset,
    pub timeout: Duration,
    pub aws_timeout: Duration,
    pub ssl_ca_location: Option<String>,
    pub security: SecurityProfile,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: vec!["localhost:9092".to_string()],
            client_id: "kafka-cli".to_string(),
            required_acks: RequiredAcks::default(),
            start_offset: StartOffset::default(),
            timeout: Duration::from_secs(10),
            aws_timeout: Duration::from_secs(10),
            ssl_ca_location: None,
            security: SecurityProfile::default(),
        }
    }
}

impl KafkaConfig {
    fn from_lookup(get: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bootstrap_servers = match get("KAFKA_BOOTSTRAPSERVERS") {
            Some(list) => parse_servers(&list)?,
            None => defaults.bootstrap_servers,
        };

        // Explicit config wins, then the SDK's own region variables.
        let aws_region = get("KAFKA_AWSREGION")
            .or_else(|| get("AWS_REGION"))
            .or_else(|| get("AWS_DEFAULT_REGION"));

        let security = SecurityProfile {
            protocol: get("KAFKA_SECURITYPROTOCOL").unwrap_or(defaults.security.protocol),
            sasl_mechanism: get("KAFKA_SASLMECHANISM")
                .unwrap_or(defaults.security.sasl_mechanism),
            username: get("KAFKA_USERNAME").unwrap_or_default(),
            password: SecretString::new(get("KAFKA_PASSWORD").unwrap_or_default()),
            aws_region,
            aws_credentials: parse_or(get("KAFKA_AWSCREDENTIALS"), CredentialStrategy::default())?,
        };

        Ok(Self {
            bootstrap_servers,
            client_id: get("KAFKA_CLIENTID").unwrap_or(defaults.client_id),
            required_acks: parse_or(get("KAFKA_REQUIREDACKS"), defaults.required_acks)?,
            start_offset: parse_or(get("KAFKA_OFFSET"), defaults.start_offset)?,
            timeout: parse_secs("KAFKA_TIMEOUTSECS", get("KAFKA_TIMEOUTSECS"), defaults.timeout)?,
            aws_timeout: parse_secs(
                "KAFKA_AWSTIMEOUTSECS",
                get("KAFKA_AWSTIMEOUTSECS"),
                defaults.aws_timeout,
            )?,
            ssl_ca_location: get("KAFKA_SSLCALOCATION"),
            security,
        })
    }

    pub fn bootstrap_list(&self) -> String {
        self.bootstrap_servers.join(",")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidValue {
                key: "LOGGING_FORMAT",
                value: value.to_string(),
                reason: "expected text or json".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub timestamps: bool,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            timestamps: true,
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    fn from_lookup(get: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let timestamps = match get("LOGGING_TIMESTAMPS") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "LOGGING_TIMESTAMPS",
                value,
                reason: "expected true or false".to_string(),
            })?,
            None => defaults.timestamps,
        };

        Ok(Self {
            level: get("LOGGING_LEVEL").unwrap_or(defaults.level),
            timestamps,
            format: parse_or(get("LOGGING_FORMAT"), defaults.format)?,
        })
    }
}

fn parse_or<T>(value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr<Err = ConfigError>,
{
    value.map(|v| v.parse()).unwrap_or(Ok(default))
}

fn parse_secs(
    key: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected a positive number of seconds".to_string(),
        }),
    }
}

fn parse_servers(list: &str) -> Result<Vec<String>, ConfigError> {
    let servers: Vec<String> = list
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if let Some(bad) = servers.iter().find(|s| !s.contains(':')) {
        return Err(ConfigError::InvalidValue {
            key: "KAFKA_BOOTSTRAPSERVERS",
            value: bad.clone(),
            reason: "expected host:port".to_string(),
        });
    }
    if servers.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "KAFKA_BOOTSTRAPSERVERS",
            value: list.to_string(),
            reason: "no brokers listed".to_string(),
        });
    }
    Ok(servers)
}
