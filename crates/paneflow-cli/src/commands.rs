use crate::config::{Config, InputRecord};
use anyhow::{bail, Context, Result};
use colored::Colorize;
use comfy_table::{Cell, Color, Table as ComfyTable};
use paneflow_core::{Delta, Windowed};
use paneflow_engine::{
    sample, DeltaSource, EngineStats, KeyedWindowEngine, ManualScheduler, Scheduler,
};
use paneflow_state::{MemoryPersistence, PersistenceProvider, PersistenceSnapshot};
use paneflow_windows::TimeInterval;
use parking_lot::Mutex;
use serde::Serialize;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

type Emission = Delta<String, Windowed<TimeInterval, Option<f64>>>;

/// An emission and the scheduler time it happened at
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedEmission {
    pub at: i64,
    pub delta: Emission,
}

/// What a replay produced
#[derive(Debug)]
pub struct ReplayOutcome {
    pub emissions: Vec<TimedEmission>,
    pub failures: Vec<String>,
    pub stats: EngineStats,
    pub clock: i64,
}

/// Replay `records` through an engine built from `config`.
///
/// The clock follows the input: before a record at `ts` is applied, every
/// timer due before `ts` fires. After the last record the clock advances by
/// `flush_ms` more.
pub fn replay(
    config: &Config,
    records: Vec<InputRecord>,
    memory: Arc<MemoryPersistence>,
    flush_ms: i64,
) -> Result<ReplayOutcome> {
    let persistence: Arc<dyn PersistenceProvider> = memory;
    let start = records.first().map(|r| r.ts).unwrap_or(0);
    let scheduler = ManualScheduler::starting_at(start);
    let clock: Arc<dyn Scheduler> = Arc::new(scheduler.clone());

    let engine = KeyedWindowEngine::new(config.build_spec(persistence.clone())?, clock.clone())?;
    let sampled = sample::<String, Windowed<TimeInterval, Option<f64>>>(
        Arc::new(engine.clone()),
        config.decoupler_config(persistence),
        clock.clone(),
    )?;

    let emissions = Arc::new(Mutex::new(Vec::new()));
    {
        let emissions = emissions.clone();
        let clock = clock.clone();
        sampled.subscribe(Arc::new(move |delta: Emission| -> paneflow_core::Result<()> {
            emissions.lock().push(TimedEmission {
                at: clock.now(),
                delta,
            });
            Ok(())
        }));
    }

    let mut failures = Vec::new();
    let mut last = start;
    for record in records {
        if record.ts < last {
            warn!("Record for '{}' at {} is older than {}", record.key, record.ts, last);
        }
        scheduler.advance_to(record.ts - 1);
        scheduler.set_time(record.ts);
        last = last.max(record.ts);

        let key = record.key.clone();
        if let Err(e) = engine.on_delta(record.into_delta()?) {
            failures.push(format!("{}: {}", key, e));
        }
    }
    let fired = scheduler.advance_to(last + flush_ms);
    debug!("Flushed {} timers at {}", fired, last + flush_ms);

    if let Some(decoupler) = sampled.decoupler() {
        decoupler.close();
    }
    engine.close();

    let emissions = std::mem::take(&mut *emissions.lock());
    Ok(ReplayOutcome {
        emissions,
        failures,
        stats: engine.stats().clone(),
        clock: scheduler.now(),
    })
}

pub async fn run_stream(
    config_path: &Path,
    input: &Path,
    state: Option<&Path>,
    output_format: &str,
    flush_ms: i64,
) -> Result<()> {
    let start = Instant::now();
    let config = Config::from_file(config_path)
        .with_context(|| format!("reading config {:?}", config_path))?;

    println!(
        "{} Replaying {:?} through '{}'...",
        "→".bright_blue(),
        input,
        config.stream_id.bright_cyan()
    );

    let memory = match state {
        Some(path) if path.exists() => {
            let snapshot = load_snapshot(path)?;
            info!("Loaded {} state cells from {:?}", snapshot.len(), path);
            MemoryPersistence::from_snapshot(snapshot)
        }
        _ => MemoryPersistence::new(),
    };
    let memory = Arc::new(memory);
    if state.is_some() && !config.durable {
        warn!("Stream '{}' is transient; --state is ignored", config.stream_id);
    }

    let records = read_input(input)?;
    let count = records.len();
    let outcome = replay(&config, records, memory.clone(), flush_ms)?;

    match output_format {
        "table" => print_table(&outcome.emissions),
        "json" => print_json(&outcome.emissions)?,
        other => bail!("Unsupported output format '{}'. Use table or json", other),
    }

    for failure in &outcome.failures {
        println!("{} {}", "✗".bright_red(), failure);
    }

    if let (Some(path), true) = (state, config.durable) {
        save_snapshot(path, &memory.snapshot())?;
        println!("{} State saved to {:?}", "✓".bright_green(), path);
    }

    println!();
    println!(
        "{} {} records, {} emissions, {} timer fires, {} failures, clock at {}",
        "Summary:".bright_yellow(),
        count,
        outcome.emissions.len(),
        outcome.stats.timer_fires(),
        outcome.failures.len(),
        outcome.clock
    );
    println!(
        "{} {:.2}ms",
        "Replay time:".bright_yellow(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    Ok(())
}

pub async fn validate_config(config_path: &Path) -> Result<()> {
    println!("{} Validating {:?}...", "→".bright_blue(), config_path);
    let config = Config::from_file(config_path)?;

    let memory = Arc::new(MemoryPersistence::new());
    let outcome = replay(&config, Vec::new(), memory, 0);
    if let Err(e) = outcome {
        println!("{} {}", "✗".bright_red(), e);
        return Err(e);
    }

    let mut table = ComfyTable::new();
    table.set_header(vec![
        Cell::new("Setting").fg(Color::Cyan),
        Cell::new("Value").fg(Color::Yellow),
    ]);
    table.add_row(vec!["stream".to_string(), config.stream_id.clone()]);
    table.add_row(vec!["window".to_string(), format!("{:?}", config.window)]);
    table.add_row(vec!["trigger".to_string(), format!("{:?}", config.trigger)]);
    table.add_row(vec!["aggregate".to_string(), format!("{:?}", config.aggregate)]);
    table.add_row(vec![
        "eviction".to_string(),
        config
            .eviction
            .as_ref()
            .map(|e| format!("{:?}", e))
            .unwrap_or_else(|| "none".to_string()),
    ]);
    table.add_row(vec!["durable".to_string(), config.durable.to_string()]);
    table.add_row(vec![
        "sampling".to_string(),
        format!("{:?} ({:?})", config.sampling, config.interpretation),
    ]);
    println!("{}", table);
    println!("{} Configuration is valid", "✓".bright_green());
    Ok(())
}

fn read_input(path: &Path) -> Result<Vec<InputRecord>> {
    if !path.exists() {
        bail!("File not found: {:?}", path);
    }
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut records = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: InputRecord = serde_json::from_str(&line)
            .with_context(|| format!("line {} of {:?}", number + 1, path))?;
        records.push(record);
    }
    Ok(records)
}

fn load_snapshot(path: &Path) -> Result<PersistenceSnapshot> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn save_snapshot(path: &Path, snapshot: &PersistenceSnapshot) -> Result<()> {
    std::fs::write(path, serde_json::to_string(snapshot)?)?;
    Ok(())
}

fn print_table(emissions: &[TimedEmission]) {
    if emissions.is_empty() {
        println!("{}", "No emissions".bright_black());
        return;
    }
    let mut table = ComfyTable::new();
    table.set_header(vec![
        Cell::new("At").fg(Color::Cyan),
        Cell::new("Key").fg(Color::Yellow),
        Cell::new("Window").fg(Color::Green),
        Cell::new("Value").fg(Color::Magenta),
    ]);
    for emission in emissions {
        let (window, value) = match emission.delta.value() {
            Some(windowed) => (
                windowed.window.to_string(),
                windowed
                    .value
                    .map(|v| format!("{:.3}", v))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            None => ("-".to_string(), "removed".to_string()),
        };
        table.add_row(vec![
            emission.at.to_string(),
            emission.delta.key().clone(),
            window,
            value,
        ]);
    }
    println!("{}", table);
}

fn print_json(emissions: &[TimedEmission]) -> Result<()> {
    for emission in emissions {
        println!("{}", serde_json::to_string(emission)?);
    }
    Ok(())
}
