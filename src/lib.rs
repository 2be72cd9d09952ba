// Drive Client - cloud drive session and navigation core
// Token refresh coordination, typed drive endpoints, folder navigation state

use std::sync::Arc;

pub mod api;
pub mod auth;
pub mod browser;
pub mod config;
pub mod error;
pub mod navigation;

#[cfg(test)]
mod testing;

pub use api::{DriveApi, DriveNode, NodeKind, UserInfo};
pub use auth::{RequestCoordinator, SessionEnded, SessionState, TokenPair};
pub use browser::DriveBrowser;
pub use config::ClientConfig;
pub use error::ApiError;
pub use navigation::{BaseMode, NavigationSnapshot, NavigationState, ViewMode};

use auth::{FileTokenStore, ReqwestTransport};

/// Build an API client for `config`, restoring any session saved in its token file
pub fn connect(config: &ClientConfig) -> Result<DriveApi, ApiError> {
    config::validate_config(config)?;
    let transport = Arc::new(ReqwestTransport::new(config)?);
    let store = Arc::new(FileTokenStore::new(config.token_path()));
    Ok(DriveApi::new(RequestCoordinator::new(transport, store)))
}
