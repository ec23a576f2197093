use std::borrow::Cow;
use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use rdkafka::message::{Headers, Message};
use serde::{Deserialize, Serialize, Serializer};

pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod kafka;
pub mod logging;
pub mod progress;
pub mod roles;
pub mod security;

pub use config::{Config, KafkaConfig, LogFormat, LoggingConfig, RequiredAcks, StartOffset};
pub use credentials::{CredentialProvider, CredentialStrategy, MskIamSigner};
pub use error::{ConfigError, ConstructionError, CredentialError, OperationError};
pub use kafka::ClientFactory;
pub use progress::{ConsumerStats, ProgressSnapshot};
pub use roles::admin::Admin;
pub use roles::consumer::{run_read_loop, ConsumerMode, RecordSource, TopicConsumer};
pub use roles::producer::{generated_payloads, produce_batch, RecordWriter, TopicProducer};
pub use security::{
    resolve, Credentials, MechanismKind, SaslAlgorithm, SaslMechanism, SecurityDescriptor,
    SecurityProfile, SecurityProtocol,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    Admin,
    Producer,
    Consumer,
}

impl Display for ClientRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClientRole::Admin => "admin",
            ClientRole::Producer => "producer",
            ClientRole::Consumer => "consumer",
        })
    }
}

/// An owned copy of a consumed message. Key and payload keep the bytes as received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    #[serde(serialize_with = "as_text")]
    pub key: Option<Vec<u8>>,
    #[serde(serialize_with = "as_text")]
    pub payload: Option<Vec<u8>>,
    pub headers: usize,
    pub ts: Option<DateTime<Utc>>,
}

/// JSON has no byte strings; invalid UTF-8 is replaced with U+FFFD.
fn as_text<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(bytes) => serializer.serialize_some(&String::from_utf8_lossy(bytes)),
        None => serializer.serialize_none(),
    }
}

impl Record {
    pub fn from_message<M: Message>(message: &M) -> Self {
        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec),
            headers: message.headers().map(|h| h.count()).unwrap_or(0),
            ts: message
                .timestamp()
                .to_millis()
                .and_then(DateTime::from_timestamp_millis),
        }
    }

    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }

    pub fn key_text(&self) -> Option<Cow<'_, str>> {
        self.key.as_deref().map(String::from_utf8_lossy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::{OwnedHeaders, OwnedMessage, Timestamp};

    #[test]
    fn test_record_from_owned_message() {
        let message = OwnedMessage::new(
            Some(b"hello".to_vec()),
            Some(b"k1".to_vec()),
            "events".to_string(),
            Timestamp::CreateTime(1_700_000_000_000),
            2,
            42,
            Some(OwnedHeaders::new().insert(rdkafka::message::Header {
                key: "trace",
                value: Some("abc"),
            })),
        );

        let record = Record::from_message(&message);

        assert_eq!(record.topic, "events");
        assert_eq!(record.partition, 2);
        assert_eq!(record.offset, 42);
        assert_eq!(record.key_text().as_deref(), Some("k1"));
        assert_eq!(record.payload_bytes(), b"hello");
        assert_eq!(record.headers, 1);
        assert_eq!(
            record.ts.map(|t| t.timestamp_millis()),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn test_record_without_payload() {
        let message = OwnedMessage::new(
            None,
            None,
            "events".to_string(),
            Timestamp::NotAvailable,
            0,
            0,
            None,
        );

        let record = Record::from_message(&message);
        assert_eq!(record.payload_bytes(), b"");
        assert_eq!(record.key_text(), None);
        assert_eq!(record.ts, None);
        assert_eq!(record.headers, 0);
    }

    #[test]
    fn test_record_json_shape() {
        let record = Record {
            topic: "events".into(),
            partition: 1,
            offset: 7,
            key: None,
            payload: Some(b"hi".to_vec()),
            headers: 0,
            ts: DateTime::from_timestamp_millis(0),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "topic": "events",
                "partition": 1,
                "offset": 7,
                "key": null,
                "payload": "hi",
                "headers": 0,
                "ts": "1970-01-01T00:00:00Z",
            })
        );
    }

    #[test]
    fn test_record_keeps_non_utf8_bytes() {
        let payload = vec![0xde, 0xad, 0xbe, 0xef, b'\n', 0xff];
        let message = OwnedMessage::new(
            Some(payload.clone()),
            Some(vec![0xc3, 0x28]),
            "events".to_string(),
            Timestamp::NotAvailable,
            0,
            5,
            None,
        );

        let record = Record::from_message(&message);
        assert_eq!(record.payload_bytes(), payload.as_slice());
        assert_eq!(record.key.as_deref(), Some(&[0xc3, 0x28][..]));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["key"], "\u{fffd}(");
    }

    #[test]
    fn test_role_display() {
        assert_eq!(ClientRole::Consumer.to_string(), "consumer");
    }
}
