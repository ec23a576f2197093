use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::config::RequiredAcks;
use crate::context::KafkaContext;
use crate::credentials::CredentialProvider;
use crate::error::{ConstructionError, OperationError};
use crate::kafka::secure;
use crate::security::SecurityDescriptor;
use crate::ClientRole;

#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub topic: String,
    pub acks: RequiredAcks,
    pub timeout: Duration,
}

pub async fn build(
    base: ClientConfig,
    descriptor: &SecurityDescriptor,
    credentials: &dyn CredentialProvider,
    settings: ProducerSettings,
) -> Result<TopicProducer, ConstructionError> {
    let (mut config, context) =
        secure(base, ClientRole::Producer, descriptor, credentials).await?;

    config
        .set("acks", settings.acks.as_rdkafka())
        .set("message.timeout.ms", settings.timeout.as_millis().to_string());

    let producer: FutureProducer<KafkaContext> = config
        .create_with_context(context)
        .map_err(ConstructionError::client(ClientRole::Producer))?;

    Ok(TopicProducer {
        producer,
        topic: settings.topic,
        timeout: settings.timeout,
    })
}

/// Where a produced record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Writes one record and waits for the broker's acknowledgement.
#[async_trait]
pub trait RecordWriter: Send + Sync {
    fn topic(&self) -> &str;

    async fn write(&self, payload: &str) -> Result<Delivery, OperationError>;
}

/// A `FutureProducer` bound to a single topic.
pub struct TopicProducer {
    producer: FutureProducer<KafkaContext>,
    topic: String,
    timeout: Duration,
}

#[async_trait]
impl RecordWriter for TopicProducer {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn write(&self, payload: &str) -> Result<Delivery, OperationError> {
        let record: FutureRecord<'_, (), str> = FutureRecord::to(&self.topic).payload(payload);

        let (partition, offset) = self
            .producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| OperationError::kafka("produce", &self.topic)(e))?;

        Ok(Delivery { partition, offset })
    }
}

/// Generated payloads for `iterations` messages, numbered from zero.
pub fn generated_payloads(iterations: usize) -> Vec<String> {
    (0..iterations)
        .map(|i| format!("Kafka-CLI message ({i})"))
        .collect()
}

/// Writes `payloads` in order, one at a time.
///
/// Stops at the first failure; the remaining payloads are never attempted.
pub async fn produce_batch<W>(
    writer: &W,
    payloads: &[String],
) -> Result<Vec<Delivery>, OperationError>
where
    W: RecordWriter + ?Sized,
{
    let total = payloads.len();
    let mut deliveries = Vec::with_capacity(total);

    debug!(topic = writer.topic(), total, "Producing messages");
    for (iteration, payload) in payloads.iter().enumerate() {
        trace!(topic = writer.topic(), message = %payload, "Producing message");

        let delivery = writer
            .write(payload)
            .await
            .map_err(|source| OperationError::Batch {
                iteration,
                total,
                source: Box::new(source),
            })?;
        deliveries.push(delivery);
    }

    info!(topic = writer.topic(), produced = deliveries.len(), "Messages produced");
    Ok(deliveries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Records every attempt and fails on one chosen iteration.
    struct FlakyWriter {
        fail_at: Option<usize>,
        attempts: Mutex<Vec<String>>,
    }

    impl FlakyWriter {
        fn new(fail_at: Option<usize>) -> Self {
            Self {
                fail_at,
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RecordWriter for FlakyWriter {
        fn topic(&self) -> &str {
            "events"
        }

        async fn write(&self, payload: &str) -> Result<Delivery, OperationError> {
            let mut attempts = self.attempts.lock().unwrap();
            let iteration = attempts.len();
            attempts.push(payload.to_string());

            if self.fail_at == Some(iteration) {
                return Err(OperationError::Task {
                    operation: "produce",
                    target: "events".into(),
                    reason: "broker unavailable".into(),
                });
            }
            Ok(Delivery {
                partition: 0,
                offset: iteration as i64,
            })
        }
    }

    #[test]
    fn test_generated_payloads() {
        assert_eq!(
            generated_payloads(3),
            vec![
                "Kafka-CLI message (0)",
                "Kafka-CLI message (1)",
                "Kafka-CLI message (2)",
            ]
        );
        assert!(generated_payloads(0).is_empty());
    }

    #[tokio::test]
    async fn test_batch_delivers_in_order() {
        let writer = FlakyWriter::new(None);
        let payloads = generated_payloads(4);

        let deliveries = produce_batch(&writer, &payloads).await.unwrap();

        assert_eq!(deliveries.len(), 4);
        assert_eq!(deliveries[3], Delivery { partition: 0, offset: 3 });
        assert_eq!(writer.attempts(), payloads);
    }

    #[tokio::test]
    async fn test_batch_stops_at_first_failure() {
        let writer = FlakyWriter::new(Some(2));
        let payloads = generated_payloads(5);

        let err = produce_batch(&writer, &payloads).await.unwrap_err();

        match err {
            OperationError::Batch {
                iteration, total, ..
            } => {
                assert_eq!(iteration, 2);
                assert_eq!(total, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(writer.attempts(), payloads[..3].to_vec());
    }

    #[tokio::test]
    async fn test_batch_through_trait_object() {
        let writer: Box<dyn RecordWriter> = Box::new(FlakyWriter::new(Some(0)));
        let err = produce_batch(writer.as_ref(), &["single".to_string()])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "iteration 0 of 1 failed: produce task for events did not complete: broker unavailable"
        );
    }
}
