//! Demonstration of the EEG stream pipeline.
//!
//! This example shows how to:
//! 1. Generate device frames with the synthetic device
//! 2. Push them into an in-memory frame store
//! 3. Poll the stream through the aggregator, a few frames at a time
//! 4. Deliver display batches to a live channel and archive the full rate
//! 5. Export the archive as CSV
//!
//! Run with: cargo run --example pipeline_demo

use std::sync::Arc;

use chrono::{Duration, Utc};
use eeg_stream_pipeline::{
    core::{StreamAggregator, CHANNEL_LABELS},
    pump::Pump,
    sink::{write_csv, ArchiveSink, ChannelLiveSink, CsvMeta, MemoryArchive},
    source::{MemoryFrameStore, StreamId, SyntheticDevice},
    telemetry::PipelineStats,
};

fn main() {
    println!("EEG Stream Pipeline - Demo");
    println!("==========================");
    println!();

    let stream = StreamId::new("PEPI", "demo");
    let store = Arc::new(MemoryFrameStore::new());
    let stats = Arc::new(PipelineStats::new());

    let aggregator = Arc::new(
        StreamAggregator::default()
            .with_source(store.clone())
            .with_stats(stats.clone()),
    );
    let archive = Arc::new(MemoryArchive::new(500.0));
    let (live, receiver) = ChannelLiveSink::new(32);
    let pump = Pump::new(aggregator.clone(), Arc::new(live), archive.clone())
        .with_stats(stats.clone());

    let mut device = SyntheticDevice::default();
    store.push_comment(&stream, format!("{}$recording started", Utc::now().timestamp()));

    // One second of signal per frame, three polls.
    for round in 1..=3 {
        store.push_frames(&stream, device.frames(2));
        let report = pump.tick();
        for s in &report.streams {
            println!(
                "Poll {round}: {} frame(s), {} decoded, {} emitted, status {:?}",
                s.frames, s.decoded_samples, s.emitted_samples, s.status
            );
        }
    }
    pump.flush_all();
    println!();

    // What a live viewer would draw
    for payload in receiver.try_iter() {
        if let Some(first) = payload.samples.first() {
            let line: Vec<String> = CHANNEL_LABELS
                .iter()
                .zip(first)
                .map(|(label, value)| format!("{label}={value:.2}"))
                .collect();
            println!("Live batch: {} sample(s), first: {}", payload.samples.len(), line.join(" "));
        }
        for note in &payload.annotations {
            println!("  note: {note}");
        }
    }
    println!();

    if let Some(window) = aggregator.window(&stream) {
        println!("Rolling window holds {} display sample(s)", window.len());
    }

    let now = Utc::now();
    match archive.query(&stream, now - Duration::minutes(1), now + Duration::minutes(1)) {
        Ok(rows) => {
            let mut csv = Vec::new();
            match write_csv(&rows, &CsvMeta::new("demo", 500.0), &mut csv) {
                Ok(written) => {
                    println!("CSV export: {written} row(s)");
                    for line in String::from_utf8_lossy(&csv).lines().take(10) {
                        println!("  {line}");
                    }
                }
                Err(e) => eprintln!("Export failed: {e}"),
            }
        }
        Err(e) => eprintln!("Archive query failed: {e}"),
    }

    println!();
    println!("{}", stats.summary());
}
