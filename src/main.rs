//! EEG Stream Pipeline CLI
//!
//! Decode, filter, simulate and archive 8-channel EEG frame streams.

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use eeg_stream_pipeline::{
    config::Config,
    core::{decoder::decode_frames, to_millivolts, StreamAggregator},
    pump::Pump,
    sink::{write_csv, ArchiveSink, ChannelLiveSink, CsvMeta, CsvUnits, JsonlArchive},
    source::{FileFrameSource, StreamId, SyntheticDevice},
    telemetry::{create_shared_stats_with_persistence, PipelineStats},
    VERSION,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "eeg-stream")]
#[command(version = VERSION)]
#[command(about = "Decode and filter 8-channel EEG frame streams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode raw frames (one per line) and print the samples as JSON
    Decode {
        /// Frame file (stdin when absent)
        file: Option<PathBuf>,

        /// Print millivolts instead of acquisition codes
        #[arg(long)]
        millivolts: bool,
    },

    /// Run raw frames through a fresh pipeline and print display samples
    Filter {
        /// Frame file (stdin when absent)
        file: Option<PathBuf>,

        /// Print every filtered sample instead of the decimated ones
        #[arg(long)]
        full_rate: bool,
    },

    /// Append synthetic frames to a file source
    Simulate {
        /// Stream as <project>/<subject>
        #[arg(long, default_value = "PEPI/demo")]
        stream: StreamId,

        /// Number of frames to append
        #[arg(long, default_value = "10")]
        frames: usize,

        /// Annotation message to append with the frames
        #[arg(long)]
        comment: Option<String>,

        /// Source directory (defaults to the configured one)
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Poll a file source, archive results and print live batches
    Watch {
        /// Source directory (defaults to the configured one)
        #[arg(long)]
        root: Option<PathBuf>,

        /// Poll interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Run a single poll and exit
        #[arg(long)]
        once: bool,
    },

    /// Export archived samples of a stream
    Export {
        /// Stream as <project>/<subject>
        #[arg(long)]
        stream: StreamId,

        /// Range start (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        start: String,

        /// Range end, inclusive (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        end: String,

        /// Output file
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Export format (csv or jsonl)
        #[arg(long, default_value = "csv")]
        format: String,

        /// Units for CSV export (codes or mv)
        #[arg(long, default_value = "codes")]
        units: CsvUnits,
    },

    /// Show pipeline statistics
    Status,

    /// Show configuration
    Config {
        /// Write the current configuration to the config file
        #[arg(long)]
        init: bool,
    },

    /// Serve the pipeline over HTTP
    #[cfg(feature = "server")]
    Serve {
        /// Port to bind (defaults to the configured one)
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Decode { file, millivolts } => {
            cmd_decode(file.as_deref(), millivolts);
        }
        Commands::Filter { file, full_rate } => {
            cmd_filter(file.as_deref(), full_rate);
        }
        Commands::Simulate {
            stream,
            frames,
            comment,
            root,
        } => {
            cmd_simulate(&stream, frames, comment, root);
        }
        Commands::Watch {
            root,
            interval_ms,
            once,
        } => {
            cmd_watch(root, interval_ms, once);
        }
        Commands::Export {
            stream,
            start,
            end,
            output,
            format,
            units,
        } => {
            cmd_export(&stream, &start, &end, output, &format, units);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Config { init } => {
            cmd_config(init);
        }
        #[cfg(feature = "server")]
        Commands::Serve { port } => {
            cmd_serve(port);
        }
    }
}

/// Load the configuration or exit with a message.
fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config from {:?}: {e}", Config::config_path());
            std::process::exit(1);
        }
    }
}

/// Read frames, one per line, from a file or stdin.
fn read_frames(file: Option<&Path>) -> Vec<String> {
    let reader: Box<dyn Read> = match file {
        Some(path) => match std::fs::File::open(path) {
            Ok(f) => Box::new(f),
            Err(e) => {
                eprintln!("Error opening {path:?}: {e}");
                std::process::exit(1);
            }
        },
        None => Box::new(std::io::stdin()),
    };

    let mut frames = Vec::new();
    for line in BufReader::new(reader).lines() {
        match line {
            Ok(line) if !line.trim().is_empty() => frames.push(line),
            Ok(_) => {}
            Err(e) => {
                eprintln!("Error reading frames: {e}");
                std::process::exit(1);
            }
        }
    }
    frames
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error serializing: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_decode(file: Option<&Path>, millivolts: bool) {
    let frames = read_frames(file);
    let report = decode_frames(frames.iter().map(String::as_str));

    if report.dropped_groups > 0 {
        eprintln!("Dropped {} malformed group(s)", report.dropped_groups);
    }

    if millivolts {
        let samples: Vec<Vec<f64>> = report
            .samples
            .iter()
            .map(|sample| {
                sample
                    .iter()
                    .map(|code| (to_millivolts(*code) * 100.0).round() / 100.0)
                    .collect()
            })
            .collect();
        print_json(&samples);
    } else {
        print_json(&report);
    }
}

fn cmd_filter(file: Option<&Path>, full_rate: bool) {
    let config = load_config();
    let frames = read_frames(file);
    let aggregator = StreamAggregator::new(config.pipeline.settings());
    let stream = StreamId::new("local", "cli");

    let mut batch = aggregator.ingest(&stream, &frames);
    if let Some(tail) = aggregator.flush(&stream) {
        batch.display.extend(tail.display);
        batch.full_rate.extend(tail.full_rate);
    }

    eprintln!(
        "{} frame(s), {} sample(s) decoded, {} group(s) dropped",
        batch.frames, batch.decoded_samples, batch.dropped_groups
    );
    if full_rate {
        print_json(&batch.full_rate);
    } else {
        print_json(&batch.display);
    }
}

fn cmd_simulate(stream: &StreamId, frames: usize, comment: Option<String>, root: Option<PathBuf>) {
    let config = load_config();
    let source = FileFrameSource::new(root.unwrap_or(config.source_path.clone()));

    let mut device = SyntheticDevice::new(config.pipeline.sampling_rate_hz);
    match source.append_frames(stream, device.frames(frames)) {
        Ok(written) => println!("Appended {written} frame(s) to {stream} under {:?}", source.root()),
        Err(e) => {
            eprintln!("Error appending frames: {e}");
            std::process::exit(1);
        }
    }

    if let Some(message) = comment {
        let entry = format!("{}${}", Utc::now().timestamp(), message);
        if let Err(e) = source.append_comments(stream, [entry]) {
            eprintln!("Error appending comment: {e}");
            std::process::exit(1);
        }
        println!("Appended comment to {stream}");
    }
}

fn cmd_watch(root: Option<PathBuf>, interval_ms: Option<u64>, once: bool) {
    let config = load_config();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }
    let timezone = match config.timezone() {
        Ok(tz) => tz,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let root = root.unwrap_or(config.source_path.clone());
    let interval = interval_ms
        .map(Duration::from_millis)
        .unwrap_or(config.poll_interval);

    println!("EEG Stream Pipeline v{VERSION}");
    println!("  Source: {root:?}");
    println!("  Archive: {:?}", config.archive_path);
    println!("  Poll interval: {}ms", interval.as_millis());
    println!();

    let stats = create_shared_stats_with_persistence(config.stats_path());
    let aggregator = StreamAggregator::new(config.pipeline.settings())
        .with_source(Arc::new(FileFrameSource::new(&root)))
        .with_stats(stats.clone())
        .with_timezone(timezone);
    let archive = JsonlArchive::new(&config.archive_path, config.pipeline.sampling_rate_hz);
    let (live, receiver) = ChannelLiveSink::new(config.live_channel_capacity);

    let pump = Pump::new(Arc::new(aggregator), Arc::new(live), Arc::new(archive))
        .with_stats(stats.clone())
        .with_idle_eviction(config.idle_eviction());

    let running = Arc::new(AtomicBool::new(true));
    if !once {
        ctrlc_handler(running.clone());
        println!("Press Ctrl+C to stop");
        println!();
    }

    // Live viewer: print what a connected display would receive.
    let viewer_running = running.clone();
    let viewer = thread::spawn(move || {
        let mut last_notes: HashMap<String, String> = HashMap::new();
        while viewer_running.load(Ordering::SeqCst) || !receiver.is_empty() {
            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(payload) => {
                    if !payload.samples.is_empty() {
                        println!(
                            "[{}/{}] {} display sample(s)",
                            payload.project,
                            payload.subject,
                            payload.samples.len()
                        );
                    }
                    if let Some(note) = payload.annotations.last() {
                        let key = format!("{}/{}", payload.project, payload.subject);
                        if last_notes.get(&key) != Some(note) {
                            println!("[{key}] note: {note}");
                            last_notes.insert(key, note.clone());
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    loop {
        let report = pump.tick();
        if let Some(e) = &report.source_error {
            eprintln!("Warning: {e}");
        }
        for stream in &report.streams {
            for e in &stream.errors {
                eprintln!("Warning: {}: {e}", stream.stream);
            }
            if stream.dropped_groups > 0 {
                eprintln!(
                    "Warning: {} dropped {} malformed group(s)",
                    stream.stream, stream.dropped_groups
                );
            }
        }
        for id in &report.evicted {
            println!("Stream {id} evicted after going idle");
        }

        if once || !running.load(Ordering::SeqCst) {
            break;
        }
        sleep_while_running(interval, &running);
        if !running.load(Ordering::SeqCst) {
            break;
        }
    }

    println!();
    println!("Stopping...");
    running.store(false, Ordering::SeqCst);
    let flushed = pump.flush_all();
    drop(pump);
    let _ = viewer.join();

    if flushed > 0 {
        println!("Archived {flushed} trailing sample(s)");
    }
    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save stats: {e}");
    }
    println!();
    println!("{}", stats.summary());
}

/// Sleep for `total`, waking early when `running` drops.
fn sleep_while_running(total: Duration, running: &AtomicBool) {
    let step = Duration::from_millis(50);
    let mut slept = Duration::ZERO;
    while slept < total && running.load(Ordering::SeqCst) {
        let nap = step.min(total - slept);
        thread::sleep(nap);
        slept += nap;
    }
}

/// Parse an RFC 3339 instant or a calendar day (start or end of day, UTC).
fn parse_bound(value: &str, end_of_day: bool) -> Result<DateTime<Utc>, String> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{value}', expected RFC 3339 or YYYY-MM-DD"))?;
    let time = if end_of_day {
        day.and_hms_milli_opt(23, 59, 59, 999)
    } else {
        day.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .ok_or_else(|| format!("invalid date '{value}'"))
}

fn cmd_export(
    stream: &StreamId,
    start: &str,
    end: &str,
    output: Option<PathBuf>,
    format: &str,
    units: CsvUnits,
) {
    let config = load_config();
    let (start, end) = match (parse_bound(start, false), parse_bound(end, true)) {
        (Ok(start), Ok(end)) => (start, end),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let archive = JsonlArchive::new(&config.archive_path, config.pipeline.sampling_rate_hz);
    let rows = match archive.query(stream, start, end) {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("Error reading archive: {e}");
            std::process::exit(1);
        }
    };

    if rows.is_empty() {
        println!("No archived samples for {stream} between {start} and {end}");
        return;
    }
    println!("Found {} sample(s) for {stream}", rows.len());

    let extension = if format == "jsonl" { "jsonl" } else { "csv" };
    let output_path = output.unwrap_or_else(|| {
        config.export_path.join(format!(
            "{}_{}_{}.{}",
            stream.project,
            stream.subject,
            Utc::now().format("%Y%m%d_%H%M%S"),
            extension
        ))
    });
    if let Some(parent) = output_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("Error creating {parent:?}: {e}");
            std::process::exit(1);
        }
    }

    let result = if format == "jsonl" {
        let lines: Vec<String> = rows
            .iter()
            .filter_map(|row| serde_json::to_string(row).ok())
            .collect();
        std::fs::write(&output_path, lines.join("\n"))
    } else {
        let meta = CsvMeta {
            units,
            ..CsvMeta::new(stream.subject.clone(), config.pipeline.sampling_rate_hz)
        };
        std::fs::File::create(&output_path)
            .and_then(|file| write_csv(&rows, &meta, &mut std::io::BufWriter::new(file)))
            .map(|_| ())
    };

    match result {
        Ok(_) => println!("Exported to {output_path:?}"),
        Err(e) => eprintln!("Error writing export: {e}"),
    }
}

fn cmd_status() {
    let config = load_config();

    println!("EEG Stream Pipeline Status");
    println!("==========================");
    println!();
    println!("Configuration:");
    println!("  Source: {:?}", config.source_path);
    println!("  Archive: {:?}", config.archive_path);
    println!("  Sampling rate: {} Hz", config.pipeline.sampling_rate_hz);
    println!(
        "  Filters: notch {} Hz (Q {}), high-pass {} Hz, low-pass {} Hz",
        config.pipeline.notch_hz,
        config.pipeline.notch_q,
        config.pipeline.highpass_hz,
        config.pipeline.lowpass_hz
    );
    println!(
        "  Detrend: {:?} over {} samples, display stride {}",
        config.pipeline.detrend_mode, config.pipeline.block_size, config.pipeline.decimation_stride
    );
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        println!("{}", PipelineStats::with_persistence(stats_path).summary());
    } else {
        println!("No previous session data found.");
    }

    let source = FileFrameSource::new(&config.source_path);
    if let Ok(streams) = eeg_stream_pipeline::FrameSource::streams(&source) {
        println!();
        println!("Streams in source: {}", streams.len());
        for stream in streams {
            println!("  {stream}");
        }
    }
}

fn cmd_config(init: bool) {
    let config = load_config();

    if init {
        if let Err(e) = config.save() {
            eprintln!("Error saving config: {e}");
            std::process::exit(1);
        }
        println!("Wrote {:?}", Config::config_path());
        return;
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

#[cfg(feature = "server")]
fn cmd_serve(port: Option<u16>) {
    use eeg_stream_pipeline::server::{run, ServerConfig};

    let config = load_config();
    let timezone = match config.timezone() {
        Ok(tz) => tz,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let server_config = ServerConfig::new(
        port.unwrap_or(config.server_port),
        config.pipeline,
        timezone,
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error starting runtime: {e}");
            std::process::exit(1);
        }
    };

    runtime.block_on(async move {
        let (addr, shutdown_tx) = match run(server_config).await {
            Ok(started) => started,
            Err(e) => {
                eprintln!("Error starting server: {e}");
                std::process::exit(1);
            }
        };
        println!("Listening on http://{addr}");
        println!("Press Ctrl+C to stop");

        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("Error waiting for Ctrl+C: {e}");
        }
        let _ = shutdown_tx.send(());
    });
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}
