//! Core record model, filtering, selection, and projection for LogLens.

pub mod types {
    use serde::{Deserialize, Serialize};
    use serde_json::Value;
    use std::borrow::Cow;
    use thiserror::Error;

    pub const DEFAULT_LEVEL: &str = "unknown";
    pub const DEFAULT_MESSAGE: &str = "No message";

    /// One structured log entry as delivered by the stream.
    ///
    /// The wrapped value is always a JSON object. The lower-cased compact
    /// serialization is computed once at construction and reused by every
    /// filter pass.
    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(try_from = "Value", into = "Value")]
    pub struct Record {
        value: Value,
        search_text: String,
    }

    impl Record {
        pub fn from_json(text: &str) -> Result<Self, RecordError> {
            let value: Value = serde_json::from_str(text)?;
            Self::try_from(value)
        }

        pub fn from_slice(bytes: &[u8]) -> Result<Self, RecordError> {
            let value: Value = serde_json::from_slice(bytes)?;
            Self::try_from(value)
        }

        pub fn get(&self, key: &str) -> Option<&Value> {
            self.value.get(key)
        }

        /// Severity label, or `"unknown"` when missing, empty, or not a string.
        pub fn level(&self) -> &str {
            match self.value.get("level") {
                Some(Value::String(level)) if !level.is_empty() => level,
                _ => DEFAULT_LEVEL,
            }
        }

        /// Display message. Falsy values (null, `""`, `false`, `0`) fall back to
        /// `"No message"`; other non-string values show as compact JSON.
        pub fn message(&self) -> Cow<'_, str> {
            match self.value.get("message") {
                None | Some(Value::Null) | Some(Value::Bool(false)) => Cow::Borrowed(DEFAULT_MESSAGE),
                Some(Value::String(message)) if message.is_empty() => Cow::Borrowed(DEFAULT_MESSAGE),
                Some(Value::String(message)) => Cow::Borrowed(message.as_str()),
                Some(Value::Number(number)) if number.as_f64() == Some(0.0) => {
                    Cow::Borrowed(DEFAULT_MESSAGE)
                }
                Some(other) => Cow::Owned(other.to_string()),
            }
        }

        pub fn search_text(&self) -> &str {
            &self.search_text
        }

        pub fn to_compact_json(&self) -> String {
            self.value.to_string()
        }

        pub fn to_pretty_json(&self) -> String {
            serde_json::to_string_pretty(&self.value).unwrap_or_else(|_| self.value.to_string())
        }
    }

    impl TryFrom<Value> for Record {
        type Error = RecordError;

        fn try_from(value: Value) -> Result<Self, Self::Error> {
            if !value.is_object() {
                return Err(RecordError::NotAnObject(json_kind(&value)));
            }
            let search_text = value.to_string().to_lowercase();
            Ok(Self { value, search_text })
        }
    }

    impl From<Record> for Value {
        fn from(record: Record) -> Self {
            record.value
        }
    }

    #[derive(Debug, Error)]
    pub enum RecordError {
        #[error("invalid json: {0}")]
        InvalidJson(#[from] serde_json::Error),
        #[error("expected a JSON object, got {0}")]
        NotAnObject(&'static str),
    }

    fn json_kind(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

pub mod store {
    use crate::loglens_core::types::Record;

    /// Append-only buffer of the records received since the last reset.
    #[derive(Clone, Debug, Default)]
    pub struct LogStore {
        records: Vec<Record>,
    }

    impl LogStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Pushes `record` and returns its buffer index.
        pub fn append(&mut self, record: Record) -> usize {
            self.records.push(record);
            self.records.len() - 1
        }

        pub fn reset(&mut self) {
            self.records.clear();
        }

        pub fn records(&self) -> &[Record] {
            &self.records
        }

        pub fn get(&self, index: usize) -> Option<&Record> {
            self.records.get(index)
        }

        pub fn len(&self) -> usize {
            self.records.len()
        }

        pub fn is_empty(&self) -> bool {
            self.records.is_empty()
        }
    }
}

pub mod filters {
    use crate::loglens_core::types::Record;
    #[cfg(feature = "rayon")]
    use rayon::prelude::*;

    /// Buffers at least this long are projected with rayon when it is enabled.
    pub const PARALLEL_THRESHOLD: usize = 8_192;

    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct FilterText {
        raw: String,
        needle: String,
    }

    impl FilterText {
        pub fn new(raw: impl Into<String>) -> Self {
            let raw = raw.into();
            let needle = raw.to_lowercase();
            Self { raw, needle }
        }

        pub fn as_str(&self) -> &str {
            &self.raw
        }

        pub fn is_empty(&self) -> bool {
            self.raw.is_empty()
        }

        pub fn matches(&self, record: &Record) -> bool {
            self.needle.is_empty() || record.search_text().contains(self.needle.as_str())
        }
    }

    /// Buffer indices of the records passing the current filter, ascending.
    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct FilteredView {
        indices: Vec<usize>,
    }

    impl FilteredView {
        pub fn len(&self) -> usize {
            self.indices.len()
        }

        pub fn is_empty(&self) -> bool {
            self.indices.is_empty()
        }

        pub fn indices(&self) -> &[usize] {
            &self.indices
        }

        pub fn original_index(&self, position: usize) -> Option<usize> {
            self.indices.get(position).copied()
        }

        pub fn position_of(&self, original_index: usize) -> Option<usize> {
            self.indices.binary_search(&original_index).ok()
        }

        pub fn entries<'a>(
            &'a self,
            records: &'a [Record],
        ) -> impl Iterator<Item = (usize, &'a Record)> + 'a {
            self.indices.iter().filter_map(move |&index| records.get(index).map(|record| (index, record)))
        }

        pub fn record_at<'a>(
            &self,
            records: &'a [Record],
            position: usize,
        ) -> Option<(usize, &'a Record)> {
            let index = self.original_index(position)?;
            records.get(index).map(|record| (index, record))
        }

        /// Extends the view with the freshly appended record at `index` when it
        /// matches. Equivalent to re-projecting the whole buffer.
        pub fn push_if_match(&mut self, records: &[Record], filter: &FilterText, index: usize) -> bool {
            let Some(record) = records.get(index) else {
                return false;
            };
            if self.indices.last().is_some_and(|last| *last >= index) {
                return false;
            }
            if filter.matches(record) {
                self.indices.push(index);
                true
            } else {
                false
            }
        }

        pub fn clear(&mut self) {
            self.indices.clear();
        }
    }

    pub fn project(records: &[Record], filter: &FilterText) -> FilteredView {
        let indices = records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| filter.matches(record).then_some(index))
            .collect();
        FilteredView { indices }
    }

    #[cfg(feature = "rayon")]
    pub fn project_parallel(records: &[Record], filter: &FilterText) -> FilteredView {
        let indices = records
            .par_iter()
            .enumerate()
            .filter_map(|(index, record)| filter.matches(record).then_some(index))
            .collect();
        FilteredView { indices }
    }

    pub fn project_auto(records: &[Record], filter: &FilterText) -> FilteredView {
        #[cfg(feature = "rayon")]
        if records.len() >= PARALLEL_THRESHOLD {
            return project_parallel(records, filter);
        }
        project(records, filter)
    }
}

pub mod selection {
    use crate::loglens_core::filters::FilteredView;
    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    /// Position of the active row within the filtered view.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub enum Selection {
        #[default]
        None,
        At(usize),
    }

    impl Selection {
        pub fn position(self) -> Option<usize> {
            match self {
                Self::None => None,
                Self::At(position) => Some(position),
            }
        }

        pub fn is_none(self) -> bool {
            matches!(self, Self::None)
        }
    }

    /// How the selection survives a change of the filtered view.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum SelectionPolicy {
        /// Follow the selected record to its new position, clamp when it is gone.
        #[default]
        Identity,
        /// Keep the numeric position, clamped to the view.
        Position,
    }

    impl SelectionPolicy {
        pub fn parse(value: &str) -> Option<Self> {
            match value.trim().to_ascii_lowercase().as_str() {
                "identity" | "record" => Some(Self::Identity),
                "position" | "index" => Some(Self::Position),
                _ => None,
            }
        }

        pub fn as_str(self) -> &'static str {
            match self {
                Self::Identity => "identity",
                Self::Position => "position",
            }
        }
    }

    #[derive(Debug, Error, Clone, PartialEq, Eq)]
    pub enum SelectError {
        #[error("position {position} is outside the filtered view of {len} entries")]
        OutOfRange { position: usize, len: usize },
    }

    pub fn clamp(view_len: usize, current: Selection) -> Selection {
        if view_len == 0 {
            return Selection::None;
        }
        match current {
            Selection::None => Selection::At(0),
            Selection::At(position) => Selection::At(position.min(view_len - 1)),
        }
    }

    /// Re-validates `current` against a freshly computed `view`.
    ///
    /// `previous` is the buffer index of the record that was selected before
    /// the view changed.
    pub fn reselect(
        policy: SelectionPolicy,
        previous: Option<usize>,
        view: &FilteredView,
        current: Selection,
    ) -> Selection {
        if policy == SelectionPolicy::Identity {
            if let Some(position) = previous.and_then(|index| view.position_of(index)) {
                return Selection::At(position);
            }
        }
        clamp(view.len(), current)
    }

    pub fn select(view_len: usize, position: usize) -> Result<Selection, SelectError> {
        if position < view_len {
            Ok(Selection::At(position))
        } else {
            Err(SelectError::OutOfRange { position, len: view_len })
        }
    }

    pub fn step(view_len: usize, current: Selection, delta: isize) -> Selection {
        if view_len == 0 {
            return Selection::None;
        }
        let from = current.position().unwrap_or(0) as isize;
        let next = from.saturating_add(delta).clamp(0, view_len as isize - 1);
        Selection::At(next as usize)
    }
}

pub mod render {
    use crate::loglens_core::filters::FilteredView;
    use crate::loglens_core::selection::Selection;
    use crate::loglens_core::types::Record;

    pub const NO_MATCH_PLACEHOLDER: &str = "No logs match the filter.";

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct ListItem {
        /// Buffer index of the record behind this row.
        pub index: usize,
        pub level: String,
        pub message: String,
        pub active: bool,
    }

    impl ListItem {
        pub fn label(&self) -> String {
            format!("[{}] {}", self.level, self.message)
        }
    }

    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct Projection {
        pub items: Vec<ListItem>,
        pub detail: String,
    }

    impl Projection {
        pub fn active_item(&self) -> Option<&ListItem> {
            self.items.iter().find(|item| item.active)
        }
    }

    pub fn list_item(index: usize, record: &Record, active: bool) -> ListItem {
        ListItem {
            index,
            level: record.level().to_uppercase(),
            message: record.message().into_owned(),
            active,
        }
    }

    /// Pretty JSON of the selected record, or the placeholder when nothing is selected.
    pub fn detail(records: &[Record], view: &FilteredView, selection: Selection) -> String {
        match selection.position().and_then(|position| view.record_at(records, position)) {
            Some((_, record)) => record.to_pretty_json(),
            None => NO_MATCH_PLACEHOLDER.to_string(),
        }
    }

    pub fn render(records: &[Record], view: &FilteredView, selection: Selection) -> Projection {
        let active = selection.position();
        let items = view
            .entries(records)
            .enumerate()
            .map(|(position, (index, record))| list_item(index, record, active == Some(position)))
            .collect();

        Projection { items, detail: detail(records, view, selection) }
    }
}

#[cfg(feature = "rayon")]
pub use filters::project_parallel;
pub use filters::{project, project_auto, FilterText, FilteredView};
pub use render::{render, ListItem, Projection, NO_MATCH_PLACEHOLDER};
pub use selection::{clamp, reselect, select, SelectError, Selection, SelectionPolicy};
pub use store::LogStore;
pub use types::{Record, RecordError, DEFAULT_LEVEL, DEFAULT_MESSAGE};
