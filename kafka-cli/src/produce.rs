use anyhow::{Context, Result};
use kafka_cli_common::{generated_payloads, produce_batch, ClientFactory};

pub async fn run(
    factory: &ClientFactory,
    topic: &str,
    payload: Vec<String>,
    iterations: usize,
) -> Result<()> {
    let producer = factory
        .producer(topic)
        .await
        .with_context(|| format!("unable to prepare a producer for {topic}"))?;

    produce_batch(&producer, &payloads(payload, iterations))
        .await
        .with_context(|| format!("unable to produce to {topic}"))?;

    Ok(())
}

/// An explicit payload is sent once; otherwise `iterations` generated ones.
fn payloads(words: Vec<String>, iterations: usize) -> Vec<String> {
    let payload = words.join(" ");
    if payload.is_empty() {
        generated_payloads(iterations)
    } else {
        vec![payload]
    }
}
