//! Navigation State
//!
//! Tracks where the user is in the folder hierarchy (breadcrumb trail and
//! current folder), which listing is on screen (browsing, trash, or a search
//! overlay) and which items are selected. Pure state: no I/O, no errors.
//!
//! Each view owns its own instance. The browsing and trash root crumbs come
//! from constants, so switching modes never carries one mode's trail into
//! the other.

use serde::Serialize;
use tracing::{debug, warn};

use super::selection::SelectionSet;
use crate::api::DriveNode;

pub const BROWSING_ROOT_LABEL: &str = "My Drive";
pub const TRASH_ROOT_LABEL: &str = "Trash";

/// Listing context underneath any search overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseMode {
    Browsing,
    Trash,
}

impl BaseMode {
    fn root_crumb(self) -> Crumb {
        let label = match self {
            BaseMode::Browsing => BROWSING_ROOT_LABEL,
            BaseMode::Trash => TRASH_ROOT_LABEL,
        };
        Crumb::root(label)
    }
}

/// What the listing area currently shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Browsing,
    Trash,
    Search,
}

impl From<BaseMode> for ViewMode {
    fn from(mode: BaseMode) -> Self {
        match mode {
            BaseMode::Browsing => ViewMode::Browsing,
            BaseMode::Trash => ViewMode::Trash,
        }
    }
}

/// One breadcrumb entry. `id` is `None` only for the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Crumb {
    pub id: Option<String>,
    pub name: String,
}

impl Crumb {
    pub fn root(label: &str) -> Self {
        Self {
            id: None,
            name: label.to_string(),
        }
    }

    pub fn folder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: name.into(),
        }
    }
}

/// Identifies the listing a fetch was started for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingKey {
    generation: u64,
    pub base: BaseMode,
    pub mode: ViewMode,
    pub folder_id: Option<String>,
    pub search_query: Option<String>,
}

/// Read-only view handed to rendering code
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationSnapshot {
    pub mode: ViewMode,
    pub folder_id: Option<String>,
    pub trail: Vec<Crumb>,
    pub search_query: Option<String>,
    pub selection: Vec<String>,
    pub bulk_actions_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct NavigationState {
    base: BaseMode,
    trail: Vec<Crumb>,
    search_query: Option<String>,
    selection: SelectionSet,
    /// Bumped whenever the displayed listing changes identity
    generation: u64,
}

impl NavigationState {
    pub fn new(mode: BaseMode) -> Self {
        Self {
            base: mode,
            trail: vec![mode.root_crumb()],
            search_query: None,
            selection: SelectionSet::new(),
            generation: 0,
        }
    }

    pub fn mode(&self) -> ViewMode {
        if self.search_query.is_some() {
            ViewMode::Search
        } else {
            self.base.into()
        }
    }

    pub fn base_mode(&self) -> BaseMode {
        self.base
    }

    pub fn folder_id(&self) -> Option<&str> {
        self.trail.last().and_then(|c| c.id.as_deref())
    }

    pub fn trail(&self) -> &[Crumb] {
        &self.trail
    }

    pub fn search_query(&self) -> Option<&str> {
        self.search_query.as_deref()
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    /// Reset to the root of `mode`
    pub fn enter_mode(&mut self, mode: BaseMode) {
        debug!("Entering {:?}", mode);
        self.base = mode;
        self.trail = vec![mode.root_crumb()];
        self.search_query = None;
        self.selection.clear();
        self.bump();
    }

    /// Descend into `node`. Leaves any active search.
    ///
    /// A node whose parent is not the current folder (typically a search
    /// result) cannot extend the trail; the trail restarts at the mode root.
    pub fn open_folder(&mut self, node: &DriveNode) {
        let crumb = Crumb::folder(node.id.clone(), node.name.clone());
        match node.parent_id.as_deref() {
            Some(parent) if Some(parent) != self.folder_id() && self.trail.len() > 1 => {
                warn!(
                    "Folder {} is not a child of {:?}, restarting trail at the root",
                    node.id,
                    self.folder_id()
                );
                self.trail = vec![self.base.root_crumb(), crumb];
            }
            _ => self.trail.push(crumb),
        }
        self.search_query = None;
        self.selection.clear();
        self.bump();
    }

    /// Jump back to `trail[index]`. An index past the end is clamped to the
    /// last crumb.
    pub fn navigate_to_breadcrumb(&mut self, index: usize) {
        let last = self.trail.len().saturating_sub(1);
        let index = if index > last {
            warn!("Breadcrumb index {} out of range (trail length {}), clamping", index, self.trail.len());
            last
        } else {
            index
        };
        self.trail.truncate(index + 1);
        self.search_query = None;
        self.selection.clear();
        self.bump();
    }

    /// Enter, update or leave the search overlay. The trail and folder are
    /// never touched, so clearing the query restores the previous view.
    pub fn set_search_query(&mut self, query: &str) {
        let query = query.trim();
        let next = (!query.is_empty()).then(|| query.to_string());
        if next == self.search_query {
            return;
        }
        self.search_query = next;
        self.selection.clear();
        self.bump();
    }

    pub fn toggle_select(&mut self, id: &str) -> bool {
        self.selection.toggle(id)
    }

    pub fn toggle_select_all<I, S>(&mut self, all_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection.toggle_all(all_ids);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Call whenever the listing on screen is replaced
    pub fn on_listing_replaced(&mut self) {
        self.selection.clear();
    }

    pub fn listing_key(&self) -> ListingKey {
        ListingKey {
            generation: self.generation,
            base: self.base,
            mode: self.mode(),
            folder_id: self.folder_id().map(str::to_string),
            search_query: self.search_query.clone(),
        }
    }

    /// False once the state has moved on from the listing `key` describes
    pub fn is_current(&self, key: &ListingKey) -> bool {
        key.generation == self.generation
    }

    pub fn snapshot(&self) -> NavigationSnapshot {
        NavigationSnapshot {
            mode: self.mode(),
            folder_id: self.folder_id().map(str::to_string),
            trail: self.trail.clone(),
            search_query: self.search_query.clone(),
            selection: self.selection.to_vec(),
            bulk_actions_enabled: !self.selection.is_empty(),
        }
    }

    fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

impl Default for NavigationState {
    fn default() -> Self {
        Self::new(BaseMode::Browsing)
    }
}
