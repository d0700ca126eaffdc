//! Viewer state: the single owner of buffer, filter, view, and selection.
//!
//! Every mutation goes through a named operation which recomputes the derived
//! state (filtered view, selection, projection) exactly once.

use crate::loglens_core::{
    filters, render, selection, FilterText, FilteredView, LogStore, Projection, Record,
    SelectError, Selection, SelectionPolicy,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewerConfig {
    pub selection_policy: SelectionPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Appended(usize),
    Reset,
    Filter,
    Select,
}

#[derive(Debug)]
pub struct Viewer {
    config: ViewerConfig,
    store: LogStore,
    filter: FilterText,
    view: FilteredView,
    selection: Selection,
    projection: Projection,
    notice: Option<String>,
    revision: u64,
}

impl Default for Viewer {
    fn default() -> Self {
        Self::new(ViewerConfig::default())
    }
}

impl Viewer {
    pub fn new(config: ViewerConfig) -> Self {
        let mut viewer = Self {
            config,
            store: LogStore::new(),
            filter: FilterText::default(),
            view: FilteredView::default(),
            selection: Selection::None,
            projection: Projection::default(),
            notice: None,
            revision: 0,
        };
        viewer.projection = render::render(viewer.store.records(), &viewer.view, viewer.selection);
        viewer
    }

    pub fn append(&mut self, record: Record) {
        let index = self.store.append(record);
        self.recompute(Change::Appended(index));
    }

    pub fn reset(&mut self) {
        self.store.reset();
        self.selection = Selection::None;
        self.recompute(Change::Reset);
    }

    /// Re-projects on every call, including an unchanged filter.
    pub fn set_filter(&mut self, text: impl Into<String>) {
        self.filter = FilterText::new(text);
        self.recompute(Change::Filter);
    }

    /// Selects `position` within the filtered view as currently rendered.
    pub fn select(&mut self, position: usize) -> Result<(), SelectError> {
        self.selection = selection::select(self.view.len(), position)?;
        self.recompute(Change::Select);
        Ok(())
    }

    pub fn select_relative(&mut self, delta: isize) {
        let next = selection::step(self.view.len(), self.selection, delta);
        if next != self.selection {
            self.selection = next;
            self.recompute(Change::Select);
        }
    }

    pub fn select_first(&mut self) {
        if !self.view.is_empty() {
            let _ = self.select(0);
        }
    }

    pub fn select_last(&mut self) {
        if let Some(last) = self.view.len().checked_sub(1) {
            let _ = self.select(last);
        }
    }

    /// Overlays `text` on the detail pane until the next recomputation.
    pub fn set_notice(&mut self, text: impl Into<String>) {
        self.notice = Some(text.into());
    }

    pub fn records(&self) -> &[Record] {
        self.store.records()
    }

    pub fn filter(&self) -> &str {
        self.filter.as_str()
    }

    pub fn view(&self) -> &FilteredView {
        &self.view
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn selected_record(&self) -> Option<(usize, &Record)> {
        let position = self.selection.position()?;
        self.view.record_at(self.store.records(), position)
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn detail_text(&self) -> &str {
        self.notice.as_deref().unwrap_or(&self.projection.detail)
    }

    /// Bumped once per recomputation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn recompute(&mut self, change: Change) {
        let previous = self.selection.position().and_then(|position| self.view.original_index(position));
        let records = self.store.records();

        match change {
            Change::Appended(index) => {
                self.view.push_if_match(records, &self.filter, index);
            }
            Change::Reset => self.view.clear(),
            Change::Filter => {
                self.view = filters::project_auto(records, &self.filter);
            }
            Change::Select => {}
        }

        self.selection =
            selection::reselect(self.config.selection_policy, previous, &self.view, self.selection);
        // Rebuilt in full, never patched.
        self.projection = render::render(records, &self.view, self.selection);
        self.notice = None;
        self.revision = self.revision.wrapping_add(1);
    }
}
