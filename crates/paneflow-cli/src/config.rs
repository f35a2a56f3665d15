use anyhow::{bail, Result};
use paneflow_core::Delta;
use paneflow_engine::{DecouplerConfig, Interpretation, Sampling, TimestampAssigner, WindowSpec};
use paneflow_state::{PersistenceProvider, StateForms};
use paneflow_windows::{
    EvictionStrategy, SlidingWindows, ThresholdEviction, TimeInterval, TriggerKind,
    TumblingWindows, WindowAssigner, WindowKind,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Engine spec built from a [`Config`]
pub type AggregateSpec = WindowSpec<String, Reading, TimeInterval, Option<f64>, TriggerKind>;

type AssignerFn = Box<dyn Fn(&String) -> Box<dyn WindowAssigner<Reading, TimeInterval>> + Send + Sync>;

/// One keyed measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub ts: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    #[default]
    Sum,
    Count,
    Min,
    Max,
}

impl Aggregate {
    pub fn fold(&self, acc: Option<f64>, value: f64) -> Option<f64> {
        Some(match (self, acc) {
            (Aggregate::Sum, acc) => acc.unwrap_or(0.0) + value,
            (Aggregate::Count, acc) => acc.unwrap_or(0.0) + 1.0,
            (Aggregate::Min, Some(acc)) => acc.min(value),
            (Aggregate::Max, Some(acc)) => acc.max(value),
            (_, None) => value,
        })
    }

    pub fn combine(&self, left: Option<f64>, right: Option<f64>) -> Option<f64> {
        match (left, right) {
            (None, other) | (other, None) => other,
            (Some(a), Some(b)) => Some(match self {
                Aggregate::Sum | Aggregate::Count => a + b,
                Aggregate::Min => a.min(b),
                Aggregate::Max => a.max(b),
            }),
        }
    }
}

/// Keep only elements within `window_ms` of the newest one in each pane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvictionConfig {
    pub window_ms: i64,
    /// Trust that input arrives in timestamp order
    #[serde(default)]
    pub assume_ordered: bool,
    /// Keep per-entry aggregates and combine them instead of re-folding
    #[serde(default)]
    pub incremental: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    #[default]
    Data,
    Clock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub stream_id: String,
    pub window: WindowKind,
    pub trigger: TriggerKind,
    #[serde(default)]
    pub aggregate: Aggregate,
    #[serde(default)]
    pub eviction: Option<EvictionConfig>,
    #[serde(default)]
    pub durable: bool,
    #[serde(default)]
    pub sampling: Sampling,
    #[serde(default)]
    pub interpretation: Interpretation,
    #[serde(default)]
    pub timestamps: TimestampSource,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream_id: "readings".to_string(),
            window: WindowKind::Tumbling { size_ms: 60_000 },
            trigger: TriggerKind::EndOfWindow,
            aggregate: Aggregate::Sum,
            eviction: None,
            durable: false,
            sampling: Sampling::Eager,
            interpretation: Interpretation::Discrete,
            timestamps: TimestampSource::Data,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.trigger.validate()?;
        if let Some(eviction) = &self.eviction {
            if eviction.window_ms < 0 {
                bail!("eviction window must not be negative");
            }
        }
        Ok(())
    }

    /// Build the engine spec; `persistence` is used only when the stream is durable
    pub fn build_spec(&self, persistence: Arc<dyn PersistenceProvider>) -> Result<AggregateSpec> {
        self.validate()?;
        let aggregate = self.aggregate;
        let trigger = self.trigger.clone();

        let spec = WindowSpec::new(
            self.stream_id.clone(),
            self.assigner_factory()?,
            move |_: &String| trigger.clone(),
            |_: &String, _: &TimeInterval| None,
            move |_: &String, _: &TimeInterval, acc: Option<f64>, reading: &Reading| {
                aggregate.fold(acc, reading.value)
            },
        )
        .with_forms(StateForms::new("interval", "optional-f64"))
        .with_persistence(persistence)
        .with_durability(self.durable)
        .with_timestamps(match self.timestamps {
            TimestampSource::Data => TimestampAssigner::from_data(|reading: &Reading| reading.ts),
            TimestampSource::Clock => TimestampAssigner::from_clock(),
        });

        let spec = match &self.eviction {
            None => spec,
            Some(eviction) => {
                let window_ms = eviction.window_ms;
                let assume_ordered = eviction.assume_ordered;
                let spec = spec.with_eviction(move |_: &String| {
                    let threshold = ThresholdEviction::by_timestamp(window_ms);
                    EvictionStrategy::Threshold(if assume_ordered {
                        threshold.assume_ordered()
                    } else {
                        threshold
                    })
                });
                if eviction.incremental {
                    spec.with_combiner(move |_: &String, _: &TimeInterval, a, b| {
                        aggregate.combine(a, b)
                    })
                } else {
                    spec
                }
            }
        };
        spec.validate()?;
        Ok(spec)
    }

    fn assigner_factory(&self) -> Result<AssignerFn> {
        let factory: AssignerFn = match self.window {
            WindowKind::Tumbling { size_ms } => {
                let windows = TumblingWindows::new(size_ms)?;
                Box::new(move |_: &String| -> Box<dyn WindowAssigner<Reading, TimeInterval>> {
                    Box::new(windows)
                })
            }
            WindowKind::Sliding { size_ms, slide_ms } => {
                let windows = SlidingWindows::new(size_ms, slide_ms)?;
                Box::new(move |_: &String| -> Box<dyn WindowAssigner<Reading, TimeInterval>> {
                    Box::new(windows)
                })
            }
        };
        Ok(factory)
    }

    /// Sampling applied to the engine's output
    pub fn decoupler_config(&self, persistence: Arc<dyn PersistenceProvider>) -> DecouplerConfig {
        let config = DecouplerConfig::new(format!("{}.sampled", self.stream_id))
            .with_interpretation(self.interpretation)
            .with_sampling(self.sampling);
        if self.durable {
            config.durable(persistence)
        } else {
            config
        }
    }
}

/// One line of a replay input file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRecord {
    pub ts: i64,
    pub key: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub remove: bool,
}

impl InputRecord {
    pub fn into_delta(self) -> Result<Delta<String, Reading>> {
        match (self.remove, self.value) {
            (true, _) => Ok(Delta::remove(self.key)),
            (false, Some(value)) => Ok(Delta::update(
                self.key,
                Reading {
                    ts: self.ts,
                    value,
                },
            )),
            (false, None) => bail!("record for key '{}' at {} has no value", self.key, self.ts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paneflow_state::MemoryPersistence;
    use paneflow_windows::IdlePolicy;

    #[test]
    fn test_parse_full_config() {
        let config: Config = serde_json::from_str(
            r#"{
                "stream_id": "cpu",
                "window": {"type": "sliding", "size_ms": 10000, "slide_ms": 5000},
                "trigger": {"type": "periodic", "period_ms": 1000, "idle": "refire"},
                "aggregate": "max",
                "eviction": {"window_ms": 3000, "incremental": true},
                "durable": true,
                "sampling": {"type": "constant", "period_ms": 500},
                "interpretation": "continuous",
                "timestamps": "clock"
            }"#,
        )
        .unwrap();

        assert_eq!(config.window, WindowKind::Sliding { size_ms: 10_000, slide_ms: 5_000 });
        assert_eq!(
            config.trigger,
            TriggerKind::Periodic { period_ms: 1_000, idle: IdlePolicy::Refire }
        );
        assert_eq!(config.aggregate, Aggregate::Max);
        assert!(config.eviction.as_ref().unwrap().incremental);
        assert!(!config.eviction.as_ref().unwrap().assume_ordered);
        assert_eq!(config.sampling, Sampling::Constant { period_ms: 500 });
        assert_eq!(config.timestamps, TimestampSource::Clock);
    }

    #[test]
    fn test_defaults_fill_optional_fields() {
        let config: Config = serde_json::from_str(
            r#"{"stream_id": "s", "window": {"type": "tumbling", "size_ms": 10}, "trigger": {"type": "end_of_window"}}"#,
        )
        .unwrap();
        assert_eq!(config.aggregate, Aggregate::Sum);
        assert!(config.eviction.is_none());
        assert!(!config.durable);
        assert!(config.sampling.is_eager());
    }

    #[test]
    fn test_aggregate_fold_and_combine() {
        let values = [3.0, -1.0, 7.0];
        for (aggregate, expected) in [
            (Aggregate::Sum, 9.0),
            (Aggregate::Count, 3.0),
            (Aggregate::Min, -1.0),
            (Aggregate::Max, 7.0),
        ] {
            let folded = values.iter().fold(None, |acc, v| aggregate.fold(acc, *v));
            assert_eq!(folded, Some(expected));

            let combined = values
                .iter()
                .map(|v| aggregate.fold(None, *v))
                .fold(None, |acc, part| aggregate.combine(acc, part));
            assert_eq!(combined, Some(expected));
        }
    }

    #[test]
    fn test_rejects_invalid_window() {
        let config = Config {
            window: WindowKind::Sliding { size_ms: 10, slide_ms: 20 },
            ..Config::default()
        };
        assert!(config.build_spec(Arc::new(MemoryPersistence::new())).is_err());
    }

    #[test]
    fn test_rejects_zero_count_trigger() {
        let config = Config {
            trigger: TriggerKind::Count { count: 0, purge: false },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_record_without_value_rejected() {
        let record: InputRecord = serde_json::from_str(r#"{"ts": 5, "key": "a"}"#).unwrap();
        assert!(record.into_delta().is_err());

        let record: InputRecord = serde_json::from_str(r#"{"ts": 5, "key": "a", "remove": true}"#).unwrap();
        assert_eq!(record.into_delta().unwrap(), Delta::remove("a".to_string()));
    }
}
