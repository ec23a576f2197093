//! One adapter per client role. Each takes the shared base configuration and a resolved
//! [`SecurityDescriptor`](crate::SecurityDescriptor) and owns exactly one rdkafka client.

pub mod admin;
pub mod consumer;
pub mod producer;
