//! Temporal Decoupling Example
//!
//! Demonstrates discrete and continuous re-emission of a keyed stream on the
//! tokio clock, and a dynamic period changed while running.

use anyhow::Result;
use paneflow_core::Delta;
use paneflow_engine::{
    ChannelSink, DecouplerConfig, DeltaSink, DeltaSource, Interpretation, KeysCollector,
    ModalFilter, Sampling, TemporalDecoupler, TokioScheduler,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Temporal Decoupling Example ===\n");

    // Example 1: Discrete sampling keeps only the latest change
    discrete_sampling().await?;

    // Example 2: Continuous sampling repeats the current state
    continuous_sampling().await?;

    // Example 3: Filtering by mode and collecting keys
    modal_filter().await?;

    println!("\n=== All decoupling examples completed! ===");
    Ok(())
}

/// Example 1: a burst of updates collapses into one emission per tick
async fn discrete_sampling() -> Result<()> {
    println!("--- Example 1: Discrete Sampling ---\n");

    let config = DecouplerConfig::new("prices").with_sampling(Sampling::Dynamic { initial_ms: 50 });
    let decoupler = TemporalDecoupler::<String, f64>::new(config, Arc::new(TokioScheduler::current()?))?;
    let (sink, mut rx) = ChannelSink::<String, f64>::new();
    decoupler.subscribe(Arc::new(sink));

    for price in [10.0, 10.5, 10.25, 11.0] {
        decoupler.on_delta(Delta::update("ACME".to_string(), price))?;
    }
    tokio::time::sleep(Duration::from_millis(80)).await;

    decoupler.period_control().accept(Delta::update((), 20))?;
    decoupler.on_delta(Delta::update("ACME".to_string(), 12.0))?;
    tokio::time::sleep(Duration::from_millis(40)).await;
    decoupler.close();

    while let Ok(delta) = rx.try_recv() {
        println!("  emitted {:?}", delta);
    }
    let stats = decoupler.stats();
    println!(
        "  received {}, ticks {}, emitted {}",
        stats.received(),
        stats.ticks(),
        stats.emitted()
    );
    Ok(())
}

/// Example 2: every tick emits the whole snapshot, even without changes
async fn continuous_sampling() -> Result<()> {
    println!("\n--- Example 2: Continuous Sampling ---\n");

    let config = DecouplerConfig::new("levels")
        .with_interpretation(Interpretation::Continuous)
        .with_sampling(Sampling::Constant { period_ms: 25 });
    let decoupler = TemporalDecoupler::<String, u32>::new(config, Arc::new(TokioScheduler::current()?))?;
    let (sink, mut rx) = ChannelSink::<String, u32>::new();
    decoupler.subscribe(Arc::new(sink));

    decoupler.on_delta(Delta::update("tank-a".to_string(), 70))?;
    decoupler.on_delta(Delta::update("tank-b".to_string(), 35))?;
    tokio::time::sleep(Duration::from_millis(90)).await;
    decoupler.close();

    let mut received = 0;
    while rx.try_recv().is_ok() {
        received += 1;
    }
    println!("  {} snapshot deltas over {} ticks", received, decoupler.stats().ticks());
    Ok(())
}

/// Example 3: only readings above the current mode's threshold pass
async fn modal_filter() -> Result<()> {
    println!("\n--- Example 3: Modal Filter ---\n");

    let filter = ModalFilter::new("alerts", 50u32, |min: &u32, _: &String, v: &u32| v >= min)?;
    let keys = Arc::new(KeysCollector::<String>::new());
    filter.subscribe(keys.clone());
    let (sink, mut rx) = ChannelSink::<(), HashSet<String>>::new();
    keys.subscribe(Arc::new(sink));

    filter.on_delta(Delta::update("a".to_string(), 80))?;
    filter.on_delta(Delta::update("b".to_string(), 20))?;
    filter.on_delta(Delta::update("c".to_string(), 55))?;
    filter.mode_control().accept(Delta::update((), 60))?;

    while let Ok(delta) = rx.try_recv() {
        if let Some(set) = delta.value() {
            let mut set: Vec<_> = set.iter().cloned().collect();
            set.sort();
            println!("  alerting keys: {:?}", set);
        }
    }
    Ok(())
}
