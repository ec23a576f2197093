use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use kafka_cli_common::progress::{spawn_progress_reporter, REPORT_INTERVAL};
use kafka_cli_common::{run_read_loop, ClientFactory, ConsumerMode, ConsumerStats, Record};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::args::OutputFormat;

pub async fn run(
    factory: &ClientFactory,
    topic: &str,
    mode: ConsumerMode,
    format: OutputFormat,
    cancel: CancellationToken,
) -> Result<()> {
    let consumer = factory
        .consumer(topic, mode)
        .await
        .with_context(|| format!("unable to prepare a consumer for {topic}"))?;

    let stats = Arc::new(ConsumerStats::new());
    let reporter = spawn_progress_reporter(stats.clone(), cancel.clone(), REPORT_INTERVAL);

    info!(topic, group = consumer.mode().group_id(), "Consuming (CTRL+C to stop)");
    let stdout = io::stdout();
    run_read_loop(&consumer, &stats, &cancel, |record| {
        let mut out = stdout.lock();
        if let Err(e) = write_record(&mut out, &record, format) {
            warn!(error = %e, offset = record.offset, "Unable to write message");
        }
    })
    .await;

    cancel.cancel();
    reporter.await.context("progress reporter failed")?;
    Ok(())
}

fn write_record(out: &mut impl Write, record: &Record, format: OutputFormat) -> io::Result<()> {
    match format {
        OutputFormat::Raw => {
            out.write_all(record.payload_bytes())?;
            writeln!(out)
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, record)?;
            writeln!(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record {
            topic: "events".into(),
            partition: 0,
            offset: 3,
            key: Some(b"k".to_vec()),
            payload: Some(b"hello".to_vec()),
            headers: 0,
            ts: None,
        }
    }

    #[test]
    fn test_raw_output() {
        let mut out = Vec::new();
        write_record(&mut out, &record(), OutputFormat::Raw).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "hello\n");
    }

    #[test]
    fn test_raw_output_passes_bytes_through() {
        let payload = vec![0x00, 0xff, 0xfe, b'x'];
        let record = Record {
            payload: Some(payload.clone()),
            ..record()
        };

        let mut out = Vec::new();
        write_record(&mut out, &record, OutputFormat::Raw).unwrap();

        let mut expected = payload;
        expected.push(b'\n');
        assert_eq!(out, expected);
    }

    #[test]
    fn test_json_output() {
        let mut out = Vec::new();
        write_record(&mut out, &record(), OutputFormat::Json).unwrap();

        let line = String::from_utf8(out).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["offset"], 3);
        assert_eq!(value["key"], "k");
        assert_eq!(value["payload"], "hello");
    }
}
