//! Replay a recorded stream of inputs through a metric producer.
//!
//! Reads JSON lines, one input per line, tagged by `kind`, and writes every
//! dump report as one JSON line to stdout. On-demand pulls yield no data;
//! scheduled pull results are replayed from `pulled` lines.

use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::PathBuf,
};

use clap::Parser;
use serde::Deserialize;
use tally::{
    Config, Producer,
    aggregate::{Aggregate, Numeric, Quantile},
    config::Kind,
    dimension::FieldValue,
    event::LogEvent,
    pull::{NoPull, PullResult},
    report::{DumpLatency, DumpReport},
    sink::Recorder,
};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Failed to load config: {0}")]
    Config(#[from] tally::config::Error),
    #[error("Failed to build producer: {0}")]
    Engine(#[from] tally::engine::Error),
    #[error("Malformed input on line {line}: {source}")]
    Input {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to serialize report: {0}")]
    Output(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// path on disk to the metric configuration file
    #[clap(long)]
    config_path: PathBuf,
    /// path on disk to the JSON lines input, stdin if absent
    #[clap(long)]
    input_path: Option<PathBuf>,
    /// elapsed time buckets are aligned on, in nanoseconds
    #[clap(long, default_value_t = 0)]
    time_base_nanos: i64,
    /// start of the first bucket, in nanoseconds; defaults to the time base
    #[clap(long)]
    start_nanos: Option<i64>,
    /// emit a final report, current bucket included, at the last timestamp
    #[clap(long)]
    dump_at_end: bool,
}

fn default_erase() -> bool {
    true
}

fn default_latency() -> DumpLatency {
    DumpLatency::NoTimeConstraints
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Input {
    Event(LogEvent),
    Condition {
        timestamp_ns: i64,
        condition: bool,
    },
    Active {
        timestamp_ns: i64,
        active: bool,
    },
    State {
        timestamp_ns: i64,
        old: FieldValue,
        new: FieldValue,
    },
    AppUpgrade {
        timestamp_ns: i64,
    },
    InitCompleted {
        timestamp_ns: i64,
    },
    Pulled {
        timestamp_ns: i64,
        result: PullResult,
        #[serde(default)]
        events: Vec<LogEvent>,
    },
    Dump {
        timestamp_ns: i64,
        #[serde(default)]
        include_current_partial_bucket: bool,
        #[serde(default = "default_erase")]
        erase: bool,
        #[serde(default = "default_latency")]
        latency: DumpLatency,
    },
}

impl Input {
    fn timestamp_ns(&self) -> i64 {
        match self {
            Input::Event(event) => event.timestamp_ns,
            Input::Condition { timestamp_ns, .. }
            | Input::Active { timestamp_ns, .. }
            | Input::State { timestamp_ns, .. }
            | Input::AppUpgrade { timestamp_ns }
            | Input::InitCompleted { timestamp_ns }
            | Input::Pulled { timestamp_ns, .. }
            | Input::Dump { timestamp_ns, .. } => *timestamp_ns,
        }
    }
}

fn write_report<W: Write>(out: &mut W, report: &DumpReport) -> Result<(), Error> {
    serde_json::to_writer(&mut *out, report)?;
    out.write_all(b"\n")?;
    Ok(())
}

fn run<A, R, W>(config: Config, args: &Args, input: R, mut out: W) -> Result<(), Error>
where
    A: Aggregate,
    R: BufRead,
    W: Write,
{
    let start_ns = args.start_nanos.unwrap_or(args.time_base_nanos);
    let producer: Producer<A, NoPull, Recorder> =
        Producer::new(config, args.time_base_nanos, start_ns, NoPull, Recorder)?;

    let mut last_ns = start_ns;
    for (index, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let input: Input = serde_json::from_str(&line).map_err(|source| Error::Input {
            line: index + 1,
            source,
        })?;
        debug!(?input, "replaying input");
        last_ns = last_ns.max(input.timestamp_ns());

        match input {
            Input::Event(event) => producer.on_log_event(&event),
            Input::Condition {
                timestamp_ns,
                condition,
            } => producer.on_condition_changed(condition, timestamp_ns),
            Input::Active {
                timestamp_ns,
                active,
            } => producer.on_active_state_changed(timestamp_ns, active),
            Input::State {
                timestamp_ns,
                old,
                new,
            } => producer.on_state_changed(timestamp_ns, &old, &new),
            Input::AppUpgrade { timestamp_ns } => producer.notify_app_upgrade(timestamp_ns),
            Input::InitCompleted { timestamp_ns } => producer.on_init_completed(timestamp_ns),
            Input::Pulled {
                timestamp_ns,
                result,
                events,
            } => producer.on_data_pulled(&events, result, timestamp_ns),
            Input::Dump {
                timestamp_ns,
                include_current_partial_bucket,
                erase,
                latency,
            } => {
                let report = producer.on_dump_report(
                    timestamp_ns,
                    include_current_partial_bucket,
                    erase,
                    latency,
                );
                write_report(&mut out, &report)?;
            }
        }
    }

    if args.dump_at_end {
        let report = producer.on_dump_report(last_ns, true, true, DumpLatency::NoTimeConstraints);
        write_report(&mut out, &report)?;
    }
    out.flush()?;
    Ok(())
}

fn replay<R: BufRead>(config: Config, args: &Args, input: R) -> Result<(), Error> {
    let out = BufWriter::new(io::stdout().lock());
    match config.kind {
        Kind::Numeric => run::<Numeric, _, _>(config, args, input, out),
        Kind::Quantile => run::<Quantile, _, _>(config, args, input, out),
    }
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .with_writer(io::stderr)
        .finish()
        .init();

    let args = Args::parse();
    let config = Config::from_path(&args.config_path)?;
    info!(
        metric_id = config.metric_id,
        kind = ?config.kind,
        "Starting tally replay."
    );

    match &args.input_path {
        Some(path) => replay(config, &args, BufReader::new(File::open(path)?)),
        None => replay(config, &args, io::stdin().lock()),
    }
}
