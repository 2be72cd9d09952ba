//! Drive Browser - navigation state wired to the drive API
//!
//! Owns one [`NavigationState`] plus the listing currently on screen. Fetches
//! run without holding the lock; when a fetch finishes, its result is applied
//! only if the navigation has not moved on in the meantime.

use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{DriveApi, DriveNode};
use crate::error::ApiError;
use crate::navigation::{BaseMode, ListingKey, NavigationSnapshot, NavigationState, ViewMode};

struct BrowserView {
    nav: NavigationState,
    listing: Vec<DriveNode>,
}

/// One mounted view. Clones share the same state.
#[derive(Clone)]
pub struct DriveBrowser {
    api: DriveApi,
    view: Arc<Mutex<BrowserView>>,
}

impl DriveBrowser {
    pub fn new(api: DriveApi, mode: BaseMode) -> Self {
        Self {
            api,
            view: Arc::new(Mutex::new(BrowserView {
                nav: NavigationState::new(mode),
                listing: Vec::new(),
            })),
        }
    }

    pub async fn snapshot(&self) -> NavigationSnapshot {
        self.view.lock().await.nav.snapshot()
    }

    pub async fn listing(&self) -> Vec<DriveNode> {
        self.view.lock().await.listing.clone()
    }

    pub async fn enter_mode(&self, mode: BaseMode) -> Result<bool, ApiError> {
        self.view.lock().await.nav.enter_mode(mode);
        self.reload().await
    }

    pub async fn open_folder(&self, node: &DriveNode) -> Result<bool, ApiError> {
        if !node.is_folder() {
            warn!("Ignoring open_folder on file {}", node.name);
            return Ok(false);
        }
        self.view.lock().await.nav.open_folder(node);
        self.reload().await
    }

    /// Walk `/`-separated folder names from the current folder
    pub async fn open_path(&self, path: &str) -> Result<(), ApiError> {
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let next = {
                let view = self.view.lock().await;
                view.listing
                    .iter()
                    .find(|n| n.is_folder() && n.name == segment)
                    .cloned()
            };
            let Some(folder) = next else {
                return Err(ApiError::RequestRejected {
                    status: 404,
                    message: format!("No folder named '{}'", segment),
                });
            };
            self.open_folder(&folder).await?;
        }
        Ok(())
    }

    pub async fn navigate_to_breadcrumb(&self, index: usize) -> Result<bool, ApiError> {
        self.view.lock().await.nav.navigate_to_breadcrumb(index);
        self.reload().await
    }

    pub async fn set_search_query(&self, query: &str) -> Result<bool, ApiError> {
        self.view.lock().await.nav.set_search_query(query);
        self.reload().await
    }

    pub async fn toggle_select(&self, id: &str) -> bool {
        self.view.lock().await.nav.toggle_select(id)
    }

    /// Select-all checkbox over the current listing
    pub async fn toggle_select_all(&self) {
        let mut view = self.view.lock().await;
        let ids: Vec<String> = view.listing.iter().map(|n| n.id.clone()).collect();
        view.nav.toggle_select_all(ids);
    }

    pub async fn clear_selection(&self) {
        self.view.lock().await.nav.clear_selection();
    }

    /// Fetch the listing for the current navigation state.
    ///
    /// Returns `Ok(false)` when the navigation changed while the fetch was
    /// in flight; the result is then dropped.
    pub async fn reload(&self) -> Result<bool, ApiError> {
        let key = self.view.lock().await.nav.listing_key();
        let listing = self.fetch(&key).await?;

        let mut view = self.view.lock().await;
        if !view.nav.is_current(&key) {
            debug!("Discarding stale listing for {:?}", key.folder_id);
            return Ok(false);
        }
        view.listing = listing;
        view.nav.on_listing_replaced();
        Ok(true)
    }

    async fn fetch(&self, key: &ListingKey) -> Result<Vec<DriveNode>, ApiError> {
        match (key.mode, key.search_query.as_deref(), key.folder_id.as_deref()) {
            // Server-side search covers the live drive only; search the trash by name
            (ViewMode::Search, Some(query), _) if key.base == BaseMode::Trash => {
                let needle = query.to_lowercase();
                let trash = self.api.list_trash().await?;
                Ok(trash
                    .into_iter()
                    .filter(|n| n.name.to_lowercase().contains(&needle))
                    .collect())
            }
            (ViewMode::Search, Some(query), _) => self.api.search(query).await,
            (ViewMode::Trash, _, None) => self.api.list_trash().await,
            (_, _, folder) => self.api.list_folder(folder).await,
        }
    }

    /// Trash the selection when browsing, delete it for good in the trash.
    /// Returns how many items were affected.
    pub async fn delete_selected(&self) -> Result<usize, ApiError> {
        let (mode, ids) = self.selected().await;
        let action = match mode {
            BaseMode::Browsing => BulkAction::Trash,
            BaseMode::Trash => BulkAction::DeleteForever,
        };
        self.run_bulk(action, ids).await
    }

    /// Restore the selection out of the trash
    pub async fn restore_selected(&self) -> Result<usize, ApiError> {
        let (mode, ids) = self.selected().await;
        if mode != BaseMode::Trash {
            warn!("Restore requested outside the trash view");
            return Ok(0);
        }
        self.run_bulk(BulkAction::Restore, ids).await
    }

    async fn selected(&self) -> (BaseMode, Vec<String>) {
        let view = self.view.lock().await;
        (view.nav.base_mode(), view.nav.selection().to_vec())
    }

    /// Every id is attempted. When nothing succeeded the first error comes
    /// back and the view is untouched; otherwise the processed items leave
    /// the listing, the selection is cleared and the listing is re-fetched.
    async fn run_bulk(&self, action: BulkAction, ids: Vec<String>) -> Result<usize, ApiError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let outcomes = join_all(ids.iter().map(|id| async move {
            let result = match action {
                BulkAction::Trash => self.api.delete_item(id).await,
                BulkAction::DeleteForever => self.api.permanently_delete(id).await,
                BulkAction::Restore => self.api.restore_item(id).await,
            };
            (id, result)
        }))
        .await;

        let mut done: Vec<&String> = Vec::new();
        let mut errors = Vec::new();
        for (id, result) in outcomes {
            match result {
                Ok(()) => done.push(id),
                Err(e) => {
                    warn!("{:?} failed for {}: {}", action, id, e);
                    errors.push(e);
                }
            }
        }

        if done.is_empty() {
            return match errors.into_iter().next() {
                Some(e) => Err(e),
                None => Ok(0),
            };
        }
        info!("{:?}: {} of {} item(s) processed", action, done.len(), ids.len());

        {
            let mut view = self.view.lock().await;
            view.listing.retain(|n| !done.contains(&&n.id));
            view.nav.on_listing_replaced();
        }
        if let Err(e) = self.reload().await {
            warn!("Listing reload after {:?} failed: {}", action, e);
        }

        match errors.first() {
            None => Ok(done.len()),
            Some(first) => Err(ApiError::BulkIncomplete {
                failed: errors.len(),
                total: ids.len(),
                reason: first.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum BulkAction {
    Trash,
    DeleteForever,
    Restore,
}
