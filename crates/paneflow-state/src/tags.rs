//! Deterministic state tags
//!
//! Every persisted cell is addressed by a tag derived from the stream id, the
//! serialized key, a discriminator naming the kind of state, and the form
//! identifiers of the stored types. Per-window cells append the serialized
//! window.

use paneflow_core::{Result, StreamError};
use serde::Serialize;
use std::fmt;

const SEPARATOR: char = '/';
const WINDOW_SEPARATOR: char = '#';
const FORM_SEPARATOR: char = '|';

/// Kind of state stored under a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discriminator {
    /// Open windows of a key and their trigger state
    WindowState,
    /// Folded single-value accumulators
    Value,
    /// Append-only timestamped sequences
    Sequence,
    /// Criterion-ordered maps
    OrderedMap,
    /// Active keys of a stream
    Keys,
    /// Sampling period of a decoupler
    Period,
    /// Mode of a modal filter
    Mode,
}

impl Discriminator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Discriminator::WindowState => "windows",
            Discriminator::Value => "value",
            Discriminator::Sequence => "sequence",
            Discriminator::OrderedMap => "map",
            Discriminator::Keys => "keys",
            Discriminator::Period => "period",
            Discriminator::Mode => "mode",
        }
    }
}

/// Form identifiers of the types persisted for one stream.
///
/// Forms only name the serialized shape; the encoding itself is serde JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateForms {
    pub window: String,
    pub value: String,
    pub criterion: Option<String>,
}

impl StateForms {
    pub fn new(window: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            window: window.into(),
            value: value.into(),
            criterion: None,
        }
    }

    /// Forms named after the Rust types
    pub fn of<W, V>() -> Self {
        Self::new(std::any::type_name::<W>(), std::any::type_name::<V>())
    }

    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.criterion = Some(criterion.into());
        self
    }

    /// Reject identifiers that would make derived tags ambiguous
    pub fn validate(&self) -> Result<()> {
        check_form("window", &self.window)?;
        check_form("value", &self.value)?;
        if let Some(criterion) = &self.criterion {
            check_form("criterion", criterion)?;
        }
        Ok(())
    }

    fn render(&self, discriminator: Discriminator) -> String {
        match (discriminator, &self.criterion) {
            (Discriminator::OrderedMap, Some(criterion)) => format!(
                "{}{FORM_SEPARATOR}{}{FORM_SEPARATOR}{}",
                self.window, criterion, self.value
            ),
            _ => format!("{}{FORM_SEPARATOR}{}", self.window, self.value),
        }
    }
}

fn check_form(name: &str, form: &str) -> Result<()> {
    if form.trim().is_empty() {
        return Err(StreamError::Configuration(format!(
            "{} form must not be empty",
            name
        )));
    }
    if form.contains([SEPARATOR, WINDOW_SEPARATOR, FORM_SEPARATOR]) {
        return Err(StreamError::Configuration(format!(
            "{} form '{}' contains a reserved character",
            name, form
        )));
    }
    Ok(())
}

/// Opaque address of a persisted cell
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateTag(String);

impl StateTag {
    /// Tag for stream-wide state (active keys, sampling period, filter mode)
    pub fn stream(stream_id: &str, discriminator: Discriminator) -> Result<Self> {
        check_stream_id(stream_id)?;
        Ok(Self(format!(
            "{stream_id}{SEPARATOR}{}",
            discriminator.as_str()
        )))
    }

    /// Tag for state belonging to one key of a stream
    pub fn keyed<K: Serialize>(
        stream_id: &str,
        key: &K,
        discriminator: Discriminator,
        forms: &StateForms,
    ) -> Result<Self> {
        check_stream_id(stream_id)?;
        let key = serde_json::to_string(key)?;
        Ok(Self(format!(
            "{stream_id}{SEPARATOR}{key}{SEPARATOR}{}{SEPARATOR}{}",
            discriminator.as_str(),
            forms.render(discriminator)
        )))
    }

    /// Tag for the cell of a single window under this tag
    pub fn for_window<W: Serialize>(&self, window: &W) -> Result<Self> {
        let window = serde_json::to_string(window)?;
        Ok(Self(format!("{}{WINDOW_SEPARATOR}{window}", self.0)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn check_stream_id(stream_id: &str) -> Result<()> {
    if stream_id.is_empty() || stream_id.contains([SEPARATOR, WINDOW_SEPARATOR]) {
        return Err(StreamError::Configuration(format!(
            "invalid stream id '{}'",
            stream_id
        )));
    }
    Ok(())
}
