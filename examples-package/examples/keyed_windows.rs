//! Keyed Window Aggregation Example
//!
//! Demonstrates tumbling sums, sliding maxima with eviction, and
//! partitioned delivery on a virtual clock.

use anyhow::Result;
use paneflow_core::{Delta, Windowed};
use paneflow_engine::{
    DeltaSource, EngineConfig, KeyedWindowEngine, ManualScheduler, PartitionedDriver,
    RecordingSink, TimestampAssigner, WindowSpec,
};
use paneflow_windows::{
    CountTrigger, EndOfWindowTrigger, EvictionStrategy, GlobalWindow, GlobalWindows,
    ThresholdEviction, TimeInterval, TumblingWindows, WindowAssigner,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Keyed Window Aggregation Example ===\n");

    // Example 1: Tumbling windows fired by the clock
    tumbling_sums()?;

    // Example 2: Recent maxima with eviction
    evicting_maxima()?;

    // Example 3: Partitioned delivery
    partitioned_counts().await?;

    println!("\n=== All window examples completed! ===");
    Ok(())
}

/// Example 1: per-key sums over 10ms tumbling windows
fn tumbling_sums() -> Result<()> {
    println!("--- Example 1: Tumbling Sums ---\n");

    let scheduler = ManualScheduler::new();
    let spec = WindowSpec::new(
        "tumbling-sums",
        |_: &String| -> Box<dyn WindowAssigner<f64, TimeInterval>> {
            Box::new(TumblingWindows::new(10).expect("positive window size"))
        },
        |_: &String| EndOfWindowTrigger,
        |_: &String, _: &TimeInterval| 0.0,
        |_: &String, _: &TimeInterval, acc: f64, v: &f64| acc + v,
    );
    let engine = KeyedWindowEngine::new(spec, Arc::new(scheduler.clone()))?;
    let sink = Arc::new(RecordingSink::<String, Windowed<TimeInterval, f64>>::new());
    engine.subscribe(sink.clone());

    for (ts, key, value) in [(1, "cpu", 0.5), (3, "mem", 2.0), (6, "cpu", 0.7), (14, "cpu", 0.2)] {
        scheduler.set_time(ts);
        engine.on_delta(Delta::update(key.to_string(), value))?;
    }
    scheduler.advance_to(20);

    for delta in sink.deltas() {
        if let Delta::Update { key, value } = delta {
            println!("  {} {} -> {:.2}", key, value.window, value.value);
        }
    }
    println!("  Timer fires: {}", engine.stats().timer_fires());
    Ok(())
}

/// Example 2: maximum over the last 5ms of each key, recomputed every 2 elements
fn evicting_maxima() -> Result<()> {
    println!("\n--- Example 2: Evicting Maxima ---\n");

    let scheduler = ManualScheduler::new();
    let spec = WindowSpec::new(
        "recent-max",
        |_: &String| -> Box<dyn WindowAssigner<(i64, f64), GlobalWindow>> { Box::new(GlobalWindows) },
        |_: &String| CountTrigger::new(2).expect("positive count"),
        |_: &String, _: &GlobalWindow| f64::MIN,
        |_: &String, _: &GlobalWindow, acc: f64, v: &(i64, f64)| acc.max(v.1),
    )
    .with_timestamps(TimestampAssigner::from_data(|v: &(i64, f64)| v.0))
    .with_eviction(|_: &String| {
        EvictionStrategy::Threshold(ThresholdEviction::by_timestamp(5).assume_ordered())
    })
    .with_combiner(|_: &String, _: &GlobalWindow, a: f64, b: f64| a.max(b));

    let engine = KeyedWindowEngine::new(spec, Arc::new(scheduler))?;
    let sink = Arc::new(RecordingSink::<String, Windowed<GlobalWindow, f64>>::new());
    engine.subscribe(sink.clone());

    for (ts, value) in [(0, 9.0), (2, 4.0), (4, 1.0), (8, 3.0), (9, 2.0), (12, 5.0)] {
        engine.on_delta(Delta::update("sensor".to_string(), (ts, value)))?;
    }
    for windowed in sink.values() {
        println!("  max over recent readings: {:.1}", windowed.value);
    }
    Ok(())
}

/// Example 3: counts per key delivered through tokio workers
async fn partitioned_counts() -> Result<()> {
    println!("\n--- Example 3: Partitioned Delivery ---\n");

    let spec = WindowSpec::new(
        "counts",
        |_: &String| -> Box<dyn WindowAssigner<u32, GlobalWindow>> { Box::new(GlobalWindows) },
        |_: &String| CountTrigger::new(100).expect("positive count"),
        |_: &String, _: &GlobalWindow| 0u64,
        |_: &String, _: &GlobalWindow, acc: u64, _: &u32| acc + 1,
    );
    let engine = KeyedWindowEngine::new(spec, Arc::new(ManualScheduler::new()))?;
    let sink = Arc::new(RecordingSink::<String, Windowed<GlobalWindow, u64>>::new());
    engine.subscribe(sink.clone());

    let driver: PartitionedDriver<String, u32> =
        PartitionedDriver::spawn(EngineConfig::new().with_partitions(4), Arc::new(engine.clone()))?;
    for i in 0..300u32 {
        let key = format!("user-{}", i % 3);
        driver.send(Delta::update(key, i)).await?;
    }
    let delivered = driver.shutdown().await?;

    println!("  Delivered {} deltas", delivered);
    for delta in sink.deltas() {
        if let Delta::Update { key, value } = delta {
            println!("  {} reached {} events", key, value.value);
        }
    }
    Ok(())
}
