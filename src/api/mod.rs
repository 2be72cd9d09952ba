//! Drive API: endpoint client and the canonical node model

pub mod client;
pub mod types;

pub use client::{DriveApi, USER_SEARCH_PREFIX};
pub use types::{
    collect_shared, format_size, DriveNode, NodeKind, ShareAccess, ShareMeta, ShareMode,
    ShareRequest, UserInfo, DEFAULT_STORAGE_LIMIT,
};
