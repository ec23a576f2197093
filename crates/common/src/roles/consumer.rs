use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::StartOffset;
use crate::context::KafkaContext;
use crate::credentials::CredentialProvider;
use crate::error::{ConstructionError, OperationError};
use crate::kafka::secure;
use crate::progress::{ConsumerStats, ProgressSnapshot};
use crate::security::SecurityDescriptor;
use crate::{ClientRole, Record};

/// How a consumer tracks its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerMode {
    /// Joins `group_id` and commits offsets periodically.
    Grouped { group_id: String },
    /// Reads every partition from the start offset without joining a group.
    Ungrouped,
}

impl ConsumerMode {
    /// A blank or missing group id means ungrouped.
    pub fn from_group_id(group_id: Option<String>) -> Self {
        match group_id {
            Some(id) if !id.trim().is_empty() => ConsumerMode::Grouped {
                group_id: id.trim().to_string(),
            },
            _ => ConsumerMode::Ungrouped,
        }
    }

    pub fn group_id(&self) -> Option<&str> {
        match self {
            ConsumerMode::Grouped { group_id } => Some(group_id),
            ConsumerMode::Ungrouped => None,
        }
    }

    fn apply(&self, config: &mut ClientConfig) {
        match self {
            ConsumerMode::Grouped { group_id } => {
                config
                    .set("group.id", group_id)
                    .set("enable.auto.commit", "true")
                    .set("auto.commit.interval.ms", "5000");
            }
            ConsumerMode::Ungrouped => {
                // librdkafka refuses manual assignment without a group.id. The id stays
                // local: partitions are assigned, never subscribed, so no group is joined.
                config
                    .set("group.id", format!("kafka-cli-{}", Uuid::new_v4()))
                    .set("enable.auto.commit", "false")
                    .set("enable.auto.offset.store", "false");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub topic: String,
    pub mode: ConsumerMode,
    pub start_offset: StartOffset,
    /// Bounds the partition lookup for ungrouped consumers.
    pub timeout: Duration,
}

fn start_position(start_offset: StartOffset) -> Offset {
    match start_offset {
        StartOffset::Earliest => Offset::Beginning,
        StartOffset::Latest => Offset::End,
    }
}

/// Every listed partition of `topic`, positioned at `start_offset`.
fn assignment(
    topic: &str,
    partitions: &[i32],
    start_offset: StartOffset,
) -> KafkaResult<TopicPartitionList> {
    let mut list = TopicPartitionList::with_capacity(partitions.len());
    for &partition in partitions {
        list.add_partition_offset(topic, partition, start_position(start_offset))?;
    }
    Ok(list)
}

/// Looks up the topic's partitions and assigns all of them directly.
fn assign_all(
    consumer: &StreamConsumer<KafkaContext>,
    settings: &ConsumerSettings,
) -> Result<usize, ConstructionError> {
    let metadata = consumer
        .fetch_metadata(Some(&settings.topic), settings.timeout)
        .map_err(ConstructionError::client(ClientRole::Consumer))?;

    let partitions: Vec<i32> = metadata
        .topics()
        .iter()
        .filter(|t| t.name() == settings.topic)
        .flat_map(|t| t.partitions().iter().map(|p| p.id()))
        .collect();
    if partitions.is_empty() {
        return Err(ConstructionError::NoPartitions {
            topic: settings.topic.clone(),
        });
    }

    let list = assignment(&settings.topic, &partitions, settings.start_offset)
        .map_err(ConstructionError::client(ClientRole::Consumer))?;
    consumer
        .assign(&list)
        .map_err(ConstructionError::client(ClientRole::Consumer))?;
    Ok(partitions.len())
}

pub async fn build(
    base: ClientConfig,
    descriptor: &SecurityDescriptor,
    credentials: &dyn CredentialProvider,
    settings: ConsumerSettings,
) -> Result<TopicConsumer, ConstructionError> {
    let (mut config, context) =
        secure(base, ClientRole::Consumer, descriptor, credentials).await?;

    config
        .set("auto.offset.reset", settings.start_offset.as_rdkafka())
        .set("enable.partition.eof", "false");
    settings.mode.apply(&mut config);

    let consumer: StreamConsumer<KafkaContext> = config
        .create_with_context(context)
        .map_err(ConstructionError::client(ClientRole::Consumer))?;

    let consumer = match &settings.mode {
        ConsumerMode::Grouped { group_id } => {
            consumer
                .subscribe(&[settings.topic.as_str()])
                .map_err(ConstructionError::client(ClientRole::Consumer))?;
            info!(
                topic = %settings.topic,
                group = %group_id,
                offset = settings.start_offset.as_rdkafka(),
                "Consumer subscribed"
            );
            consumer
        }
        ConsumerMode::Ungrouped => {
            // The metadata lookup blocks until the broker answers or the timeout expires.
            let lookup = settings.clone();
            let (consumer, assigned) = tokio::task::spawn_blocking(move || {
                assign_all(&consumer, &lookup).map(|assigned| (consumer, assigned))
            })
            .await
            .map_err(|e| ConstructionError::Task {
                role: ClientRole::Consumer,
                reason: e.to_string(),
            })??;
            info!(
                topic = %settings.topic,
                partitions = assigned,
                offset = settings.start_offset.as_rdkafka(),
                "Consumer assigned"
            );
            consumer
        }
    };

    Ok(TopicConsumer {
        consumer,
        topic: settings.topic,
        mode: settings.mode,
    })
}

/// Yields records one at a time.
#[async_trait]
pub trait RecordSource: Send + Sync {
    fn topic(&self) -> &str;

    async fn next_record(&self) -> Result<Record, OperationError>;
}

/// A `StreamConsumer` reading a single topic, through a group or a direct assignment.
pub struct TopicConsumer {
    consumer: StreamConsumer<KafkaContext>,
    topic: String,
    mode: ConsumerMode,
}

impl TopicConsumer {
    pub fn mode(&self) -> &ConsumerMode {
        &self.mode
    }
}

#[async_trait]
impl RecordSource for TopicConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn next_record(&self) -> Result<Record, OperationError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(OperationError::kafka("consume", &self.topic))?;
        Ok(Record::from_message(&message))
    }
}

/// Reads until `cancel` fires, handing every record to `deliver`.
///
/// A failed read is counted and logged and the loop carries on. Cancellation is only
/// observed between reads, so a record that has been received is always delivered.
pub async fn run_read_loop<S, F>(
    source: &S,
    stats: &ConsumerStats,
    cancel: &CancellationToken,
    mut deliver: F,
) -> ProgressSnapshot
where
    S: RecordSource + ?Sized,
    F: FnMut(Record),
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = source.next_record() => next,
        };

        match next {
            Ok(record) => {
                stats.record_message();
                debug!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    key = record.key_text().as_deref().unwrap_or(""),
                    headers = record.headers,
                    "Got a message"
                );
                deliver(record);
            }
            Err(e) => {
                stats.record_error();
                error!(topic = source.topic(), error = %e, "Unable to consume a message");
            }
        }
    }

    let snapshot = stats.snapshot();
    info!(
        topic = source.topic(),
        messages = snapshot.messages,
        errors = snapshot.errors,
        "Consumer stopped"
    );
    snapshot
}
