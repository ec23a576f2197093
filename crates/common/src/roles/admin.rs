//! Cluster administration: metadata, broker parameters, topics and consumer groups.
//!
//! Every call is a single attempt bounded by the configured timeout. Metadata and group
//! listings go through librdkafka's blocking API, so they run on the blocking pool.

use std::ffi::{c_char, CStr, CString};
use std::ptr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use rdkafka::admin::{
    AdminClient, AdminOptions, ConfigEntry, ConfigResourceResult, NewTopic, ResourceSpecifier,
    TopicReplication,
};
use rdkafka::bindings;
use rdkafka::client::Client;
use rdkafka::error::KafkaResult;
use rdkafka::types::{RDKafkaErrorCode, RDKafkaRespErr};
use rdkafka::ClientConfig;
use serde::Serialize;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::context::{KafkaContext, MSK_PRINCIPAL};
use crate::credentials::{AuthToken, CredentialProvider, MskIamSigner};
use crate::error::{ConstructionError, OperationError};
use crate::kafka::secure;
use crate::security::SecurityDescriptor;
use crate::ClientRole;

const MASKED: &str = "******";

/// Delay before signing again after a failed refresh.
const TOKEN_RETRY: Duration = Duration::from_secs(5);

pub async fn build(
    base: ClientConfig,
    descriptor: &SecurityDescriptor,
    credentials: &dyn CredentialProvider,
    timeout: Duration,
) -> Result<Admin, ConstructionError> {
    let (config, context) = secure(base, ClientRole::Admin, descriptor, credentials).await?;
    let signer = context.signer().cloned();

    let client: Arc<AdminClient<KafkaContext>> = Arc::new(
        config
            .create_with_context(context)
            .map_err(ConstructionError::client(ClientRole::Admin))?,
    );

    // AdminClient only polls its own result queue, so the OAUTHBEARER refresh that
    // librdkafka queues on the main queue is never served. Tokens are installed here.
    let token_refresh = match signer {
        Some(signer) => {
            let token = signer.token().await?;
            install_token(client.inner(), &token).map_err(|reason| ConstructionError::Token {
                role: ClientRole::Admin,
                reason,
            })?;
            client.inner().context().record_refresh(&token);
            let delay = refresh_delay(token.expires_at_ms, Utc::now().timestamp_millis());
            Some(spawn_token_refresh(Arc::downgrade(&client), signer, delay))
        }
        None => None,
    };

    Ok(Admin {
        client,
        timeout,
        _token_refresh: token_refresh,
    })
}

/// Hands `token` to librdkafka as the client's current OAUTHBEARER token.
fn install_token(client: &Client<KafkaContext>, token: &AuthToken) -> Result<(), String> {
    let value = CString::new(token.token.as_str()).map_err(|e| e.to_string())?;
    let principal = CString::new(MSK_PRINCIPAL).map_err(|e| e.to_string())?;
    let mut err_buf: [c_char; 512] = [0; 512];

    let code = unsafe {
        bindings::rd_kafka_oauthbearer_set_token(
            client.native_ptr(),
            value.as_ptr(),
            token.expires_at_ms,
            principal.as_ptr(),
            ptr::null_mut(),
            0,
            err_buf.as_mut_ptr(),
            err_buf.len(),
        )
    };

    if code == RDKafkaRespErr::RD_KAFKA_RESP_ERR_NO_ERROR {
        Ok(())
    } else {
        let reason = unsafe { CStr::from_ptr(err_buf.as_ptr()) };
        Err(format!("{code:?}: {}", reason.to_string_lossy()))
    }
}

/// Tells librdkafka the refresh failed so pending connections report it.
fn fail_token(client: &Client<KafkaContext>, reason: &str) {
    let Ok(reason) = CString::new(reason.replace('\0', " ")) else {
        return;
    };
    unsafe { bindings::rd_kafka_oauthbearer_set_token_failure(client.native_ptr(), reason.as_ptr()) };
}

/// Refreshes at four fifths of the token's remaining lifetime.
fn refresh_delay(expires_at_ms: i64, now_ms: i64) -> Duration {
    let remaining = u64::try_from(expires_at_ms.saturating_sub(now_ms)).unwrap_or(0);
    Duration::from_millis(remaining / 5 * 4).max(TOKEN_RETRY)
}

/// Keeps the admin client's token fresh until the returned guard is dropped.
fn spawn_token_refresh(
    client: Weak<AdminClient<KafkaContext>>,
    signer: Arc<MskIamSigner>,
    first_delay: Duration,
) -> DropGuard {
    let cancel = CancellationToken::new();
    let stop = cancel.clone();

    tokio::spawn(async move {
        let mut delay = first_delay;
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            let Some(client) = client.upgrade() else {
                break;
            };

            delay = match signer.token().await {
                Ok(token) => match install_token(client.inner(), &token) {
                    Ok(()) => {
                        client.inner().context().record_refresh(&token);
                        refresh_delay(token.expires_at_ms, Utc::now().timestamp_millis())
                    }
                    Err(reason) => {
                        warn!(role = %ClientRole::Admin, %reason, "Unable to install MSK IAM token");
                        TOKEN_RETRY
                    }
                },
                Err(e) => {
                    warn!(role = %ClientRole::Admin, error = %e, "MSK IAM token refresh failed");
                    fail_token(client.inner(), &e.to_string());
                    TOKEN_RETRY
                }
            };
        }
        debug!(role = %ClientRole::Admin, "MSK IAM token refresh stopped");
    });

    cancel.drop_guard()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerSummary {
    pub id: i32,
    pub host: String,
    pub port: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterSummary {
    /// Broker that answered the metadata request.
    pub origin_broker: i32,
    pub brokers: Vec<BrokerSummary>,
    pub topics: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigParam {
    pub name: String,
    pub value: Option<String>,
    pub is_default: bool,
    pub is_read_only: bool,
    pub is_sensitive: bool,
}

impl From<ConfigEntry> for ConfigParam {
    fn from(entry: ConfigEntry) -> Self {
        let value = if entry.is_sensitive {
            entry.value.map(|_| MASKED.to_string())
        } else {
            entry.value
        };
        Self {
            name: entry.name,
            value,
            is_default: entry.is_default,
            is_read_only: entry.is_read_only,
            is_sensitive: entry.is_sensitive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicSummary {
    pub name: String,
    pub partitions: usize,
    pub replicas: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupMember {
    pub id: String,
    pub client_id: String,
    pub client_host: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub name: String,
    pub state: String,
    pub protocol_type: String,
    pub members: Vec<GroupMember>,
}

/// Owns one `AdminClient` for the lifetime of a command.
pub struct Admin {
    client: Arc<AdminClient<KafkaContext>>,
    timeout: Duration,
    _token_refresh: Option<DropGuard>,
}

impl Admin {
    pub fn context(&self) -> &KafkaContext {
        self.client.inner().context()
    }

    fn options(&self) -> AdminOptions {
        AdminOptions::new()
            .request_timeout(Some(self.timeout))
            .operation_timeout(Some(self.timeout))
    }

    /// Runs a blocking librdkafka call off the runtime.
    async fn blocking<T, F>(
        &self,
        operation: &'static str,
        target: &str,
        call: F,
    ) -> Result<T, OperationError>
    where
        T: Send + 'static,
        F: FnOnce(&AdminClient<KafkaContext>, Duration) -> KafkaResult<T> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || call(&*client, timeout))
            .await
            .map_err(|e| OperationError::Task {
                operation,
                target: target.to_string(),
                reason: e.to_string(),
            })?
            .map_err(OperationError::kafka(operation, target))
    }

    pub async fn cluster_metadata(&self) -> Result<ClusterSummary, OperationError> {
        debug!("Retrieving cluster metadata");
        let summary = self
            .blocking("fetch metadata", "cluster", |client, timeout| {
                let metadata = client.inner().fetch_metadata(None, timeout)?;
                let brokers = metadata
                    .brokers()
                    .iter()
                    .map(|b| BrokerSummary {
                        id: b.id(),
                        host: b.host().to_string(),
                        port: b.port(),
                    })
                    .collect();
                Ok(ClusterSummary {
                    origin_broker: metadata.orig_broker_id(),
                    brokers,
                    topics: metadata.topics().len(),
                })
            })
            .await?;

        info!(
            origin_broker = summary.origin_broker,
            brokers = summary.brokers.len(),
            topics = summary.topics,
            "Cluster"
        );
        Ok(summary)
    }

    /// Configuration entries of the broker that answers the metadata request.
    pub async fn broker_params(&self) -> Result<Vec<ConfigParam>, OperationError> {
        let cluster = self.cluster_metadata().await?;
        let broker = cluster.origin_broker;
        self.describe_configs(
            "describe broker configs",
            &format!("broker {broker}"),
            ResourceSpecifier::Broker(broker),
        )
        .await
    }

    pub async fn describe_topic(&self, topic: &str) -> Result<Vec<ConfigParam>, OperationError> {
        debug!(topic, "Describing topic");
        self.describe_configs("describe topic", topic, ResourceSpecifier::Topic(topic))
            .await
    }

    async fn describe_configs(
        &self,
        operation: &'static str,
        target: &str,
        resource: ResourceSpecifier<'_>,
    ) -> Result<Vec<ConfigParam>, OperationError> {
        let results = self
            .client
            .describe_configs(&[resource], &self.options())
            .await
            .map_err(OperationError::kafka(operation, target))?;

        config_params(operation, target, results)
    }

    pub async fn create_topic(
        &self,
        topic: &str,
        partitions: i32,
        replicas: i32,
    ) -> Result<(), OperationError> {
        debug!(topic, partitions, replicas, "Creating topic");
        let new_topic = NewTopic::new(topic, partitions, TopicReplication::Fixed(replicas));

        let results = self
            .client
            .create_topics(&[new_topic], &self.options())
            .await
            .map_err(OperationError::kafka("create topic", topic))?;
        single_outcome("create topic", topic, results)?;

        info!(topic, partitions, replicas, "Topic created");
        Ok(())
    }

    pub async fn delete_topic(&self, topic: &str) -> Result<(), OperationError> {
        debug!(topic, "Deleting topic");
        let results = self
            .client
            .delete_topics(&[topic], &self.options())
            .await
            .map_err(OperationError::kafka("delete topic", topic))?;
        single_outcome("delete topic", topic, results)?;

        info!(topic, "Topic deleted");
        Ok(())
    }

    /// Topics sorted by name.
    pub async fn list_topics(&self) -> Result<Vec<TopicSummary>, OperationError> {
        debug!("Listing topics");
        self.blocking("list topics", "cluster", |client, timeout| {
            let metadata = client.inner().fetch_metadata(None, timeout)?;
            let mut topics: Vec<TopicSummary> = metadata
                .topics()
                .iter()
                .map(|t| TopicSummary {
                    name: t.name().to_string(),
                    partitions: t.partitions().len(),
                    replicas: t
                        .partitions()
                        .first()
                        .map(|p| p.replicas().len())
                        .unwrap_or(0),
                })
                .collect();
            topics.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(topics)
        })
        .await
    }

    pub async fn list_groups(&self) -> Result<Vec<GroupSummary>, OperationError> {
        debug!("Listing groups");
        self.fetch_groups("list groups", None).await
    }

    pub async fn describe_group(&self, group: &str) -> Result<GroupSummary, OperationError> {
        debug!(group, "Describing group");
        self.fetch_groups("describe group", Some(group))
            .await?
            .into_iter()
            .find(|g| g.name == group)
            .ok_or_else(|| OperationError::NotFound {
                operation: "describe group",
                target: group.to_string(),
            })
    }

    async fn fetch_groups(
        &self,
        operation: &'static str,
        group: Option<&str>,
    ) -> Result<Vec<GroupSummary>, OperationError> {
        let owned = group.map(str::to_string);
        let target = group.unwrap_or("cluster");

        self.blocking(operation, target, move |client, timeout| {
            let list = client.inner().fetch_group_list(owned.as_deref(), timeout)?;
            let mut groups: Vec<GroupSummary> = list
                .groups()
                .iter()
                .map(|g| GroupSummary {
                    name: g.name().to_string(),
                    state: g.state().to_string(),
                    protocol_type: g.protocol_type().to_string(),
                    members: g
                        .members()
                        .iter()
                        .map(|m| GroupMember {
                            id: m.id().to_string(),
                            client_id: m.client_id().to_string(),
                            client_host: m.client_host().to_string(),
                        })
                        .collect(),
                })
                .collect();
            groups.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(groups)
        })
        .await
    }

    pub async fn delete_group(&self, group: &str) -> Result<(), OperationError> {
        debug!(group, "Deleting group");
        let results = self
            .client
            .delete_groups(&[group], &self.options())
            .await
            .map_err(OperationError::kafka("delete group", group))?;
        single_outcome("delete group", group, results)?;

        info!(group, "Group deleted");
        Ok(())
    }
}

/// Collapses the per-item results of a single-item admin request.
fn single_outcome(
    operation: &'static str,
    target: &str,
    results: Vec<Result<String, (String, RDKafkaErrorCode)>>,
) -> Result<(), OperationError> {
    match results.into_iter().next() {
        Some(Ok(_)) => Ok(()),
        Some(Err((_, code))) => Err(OperationError::Rejected {
            operation,
            target: target.to_string(),
            code,
        }),
        None => Err(OperationError::NotFound {
            operation,
            target: target.to_string(),
        }),
    }
}

fn config_params(
    operation: &'static str,
    target: &str,
    results: Vec<ConfigResourceResult>,
) -> Result<Vec<ConfigParam>, OperationError> {
    match results.into_iter().next() {
        Some(Ok(resource)) => {
            let mut params: Vec<ConfigParam> =
                resource.entries.into_iter().map(ConfigParam::from).collect();
            params.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(params)
        }
        Some(Err(code)) => Err(OperationError::Rejected {
            operation,
            target: target.to_string(),
            code,
        }),
        None => Err(OperationError::NotFound {
            operation,
            target: target.to_string(),
        }),
    }
}
