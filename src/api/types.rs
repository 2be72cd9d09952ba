//! Shared types for the drive API
//!
//! The storage service is not consistent about payload shapes: ids arrive as
//! `id` or `_id` (string or number), names as `name` or `filename`, sizes as
//! numbers or strings. Everything is normalised into [`DriveNode`] here so the
//! rest of the crate only ever sees one representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

use crate::error::ApiError;

/// Fallback quota when the server does not report one (15 GiB)
pub const DEFAULT_STORAGE_LIMIT: u64 = 15 * 1024 * 1024 * 1024;

/// File or folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

/// Visibility of a shared item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareMode {
    Private,
    Shared,
    Public,
}

impl fmt::Display for ShareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareMode::Private => write!(f, "private"),
            ShareMode::Shared => write!(f, "shared"),
            ShareMode::Public => write!(f, "public"),
        }
    }
}

/// Access level granted by a share
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareAccess {
    View,
    Edit,
}

impl fmt::Display for ShareAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareAccess::View => write!(f, "view"),
            ShareAccess::Edit => write!(f, "edit"),
        }
    }
}

/// Sharing metadata attached to a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareMeta {
    pub mode: ShareMode,
    pub access: Option<ShareAccess>,
    /// User ids or emails the item is shared with
    #[serde(default)]
    pub shared_with: Vec<String>,
}

impl ShareMeta {
    /// Whether this share makes the item visible to `user`
    pub fn includes(&self, user: &UserInfo) -> bool {
        if self.mode == ShareMode::Shared {
            return true;
        }
        let ids = [user.id.as_deref(), user.email.as_deref()];
        self.shared_with
            .iter()
            .any(|target| ids.iter().flatten().any(|id| *id == target.as_str()))
    }
}

/// Canonical file/folder node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveNode {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    pub parent_id: Option<String>,
    pub size: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Direct download/preview URL when the server exposes one
    pub url: Option<String>,
    pub share: Option<ShareMeta>,
    #[serde(default)]
    pub children: Vec<DriveNode>,
}

impl DriveNode {
    /// Create a new folder node (used in tests and by callers building trails)
    pub fn folder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: NodeKind::Folder,
            parent_id: None,
            size: None,
            created_at: None,
            updated_at: None,
            url: None,
            share: None,
            children: Vec::new(),
        }
    }

    pub fn file(id: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            kind: NodeKind::File,
            size: Some(size),
            ..Self::folder(id, name)
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }
}

// ─── Raw payloads ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNode {
    #[serde(default)]
    id: Option<Value>,
    #[serde(rename = "_id", default)]
    mongo_id: Option<Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(rename = "type", default)]
    node_type: Option<String>,
    #[serde(default)]
    parent_id: Option<Value>,
    #[serde(default)]
    size: Option<Value>,
    #[serde(default)]
    created_at: Option<Value>,
    #[serde(default)]
    updated_at: Option<Value>,
    #[serde(default)]
    s3_url: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    access: Option<String>,
    #[serde(default)]
    shared: Option<bool>,
    #[serde(default)]
    shared_with: Vec<Value>,
    #[serde(default)]
    shared_to: Vec<Value>,
    #[serde(default)]
    shared_with_emails: Vec<Value>,
    #[serde(default)]
    children: Vec<RawNode>,
}

/// Listing endpoints answer either with a bare array or a wrapped one
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListPayload {
    Bare(Vec<RawNode>),
    Wrapped {
        #[serde(alias = "items", alias = "files", alias = "results")]
        data: Vec<RawNode>,
    },
}

/// Extract an id as string regardless of JSON type (number or string)
fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Share targets come as plain ids/emails or as populated user objects
fn share_target(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => ["_id", "id", "email"]
            .iter()
            .find_map(|key| map.get(*key).and_then(value_to_string)),
        other => value_to_string(other),
    }
}

fn parse_share_mode(raw: &str) -> Option<ShareMode> {
    match raw.to_ascii_lowercase().as_str() {
        "private" => Some(ShareMode::Private),
        "shared" => Some(ShareMode::Shared),
        "public" => Some(ShareMode::Public),
        _ => None,
    }
}

fn parse_share_access(raw: &str) -> Option<ShareAccess> {
    match raw.to_ascii_lowercase().as_str() {
        "view" | "read" => Some(ShareAccess::View),
        "edit" | "write" => Some(ShareAccess::Edit),
        _ => None,
    }
}

fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// RFC 3339 string or epoch milliseconds
fn parse_timestamp(raw: Option<&Value>) -> Option<DateTime<Utc>> {
    match raw? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

impl RawNode {
    fn normalize(self) -> Option<DriveNode> {
        let id = self
            .id
            .as_ref()
            .and_then(value_to_string)
            .or_else(|| self.mongo_id.as_ref().and_then(value_to_string))?;

        let name = self
            .name
            .filter(|n| !n.is_empty())
            .or(self.filename)
            .unwrap_or_else(|| id.clone());

        let kind = match self.node_type.as_deref() {
            Some("folder") => NodeKind::Folder,
            _ => NodeKind::File,
        };

        let shared_with: Vec<String> = self
            .shared_with
            .iter()
            .chain(&self.shared_to)
            .chain(&self.shared_with_emails)
            .filter_map(share_target)
            .collect();

        let mode = match (self.mode.as_deref().and_then(parse_share_mode), self.shared) {
            (Some(mode), _) => Some(mode),
            (None, Some(true)) => Some(ShareMode::Shared),
            (None, _) if !shared_with.is_empty() => Some(ShareMode::Private),
            _ => None,
        };
        let share = mode.map(|mode| ShareMeta {
            mode,
            access: self.access.as_deref().and_then(parse_share_access),
            shared_with,
        });

        Some(DriveNode {
            id,
            name,
            kind,
            parent_id: self.parent_id.as_ref().and_then(value_to_string),
            size: self.size.as_ref().and_then(value_to_u64),
            created_at: parse_timestamp(self.created_at.as_ref()),
            updated_at: parse_timestamp(self.updated_at.as_ref()),
            url: self.s3_url,
            share,
            children: normalize_all(self.children),
        })
    }
}

fn normalize_all(raw: Vec<RawNode>) -> Vec<DriveNode> {
    raw.into_iter()
        .filter_map(|node| {
            let normalized = node.normalize();
            if normalized.is_none() {
                warn!("Dropping listing entry without an id");
            }
            normalized
        })
        .collect()
}

/// Parse a listing response body into canonical nodes
pub fn parse_nodes(body: &[u8]) -> Result<Vec<DriveNode>, ApiError> {
    let payload: ListPayload = serde_json::from_slice(body)
        .map_err(|e| ApiError::ParseError(format!("Invalid listing: {}", e)))?;
    let raw = match payload {
        ListPayload::Bare(nodes) => nodes,
        ListPayload::Wrapped { data } => data,
    };
    Ok(normalize_all(raw))
}

/// Parse a single node (create/upload responses)
pub fn parse_node(body: &[u8]) -> Result<DriveNode, ApiError> {
    let raw: RawNode = serde_json::from_slice(body)
        .map_err(|e| ApiError::ParseError(format!("Invalid node: {}", e)))?;
    raw.normalize()
        .ok_or_else(|| ApiError::ParseError("Node without id".to_string()))
}

/// Depth-first walk collecting every node shared with `user`
pub fn collect_shared(nodes: &[DriveNode], user: &UserInfo) -> Vec<DriveNode> {
    let mut results = Vec::new();
    let mut stack: Vec<&DriveNode> = nodes.iter().rev().collect();
    while let Some(node) = stack.pop() {
        if node.share.as_ref().is_some_and(|s| s.includes(user)) {
            results.push(node.clone());
        }
        stack.extend(node.children.iter().rev());
    }
    results
}

// ─── Account ─────────────────────────────────────────────────────────────

/// Signed-in user and quota
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserInfo {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub storage_used: u64,
    pub storage_limit: u64,
    pub plan: String,
}

impl UserInfo {
    /// Used fraction of the quota, 0.0..=1.0
    pub fn usage_ratio(&self) -> f64 {
        if self.storage_limit == 0 {
            return 0.0;
        }
        (self.storage_used as f64 / self.storage_limit as f64).min(1.0)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStorage {
    #[serde(default)]
    used: Option<Value>,
    #[serde(default)]
    total: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUser {
    #[serde(default)]
    id: Option<Value>,
    #[serde(rename = "_id", default)]
    mongo_id: Option<Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    fname: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    storage_used: Option<Value>,
    #[serde(default)]
    storage_limit: Option<Value>,
    #[serde(default)]
    storage: Option<RawStorage>,
    #[serde(default)]
    plan: Option<String>,
}

/// Parse `auth/user`, applying the quota fallbacks
pub fn parse_user_info(body: &[u8]) -> Result<UserInfo, ApiError> {
    let raw: RawUser = serde_json::from_slice(body)
        .map_err(|e| ApiError::ParseError(format!("Invalid user info: {}", e)))?;

    let storage_used = raw
        .storage_used
        .as_ref()
        .and_then(value_to_u64)
        .or_else(|| raw.storage.as_ref().and_then(|s| s.used.as_ref()).and_then(value_to_u64))
        .unwrap_or(0);
    let storage_limit = raw
        .storage_limit
        .as_ref()
        .and_then(value_to_u64)
        .or_else(|| raw.storage.as_ref().and_then(|s| s.total.as_ref()).and_then(value_to_u64))
        .unwrap_or(DEFAULT_STORAGE_LIMIT);

    Ok(UserInfo {
        id: raw
            .id
            .as_ref()
            .and_then(value_to_string)
            .or_else(|| raw.mongo_id.as_ref().and_then(value_to_string)),
        name: raw.name.or(raw.fname),
        email: raw.email,
        storage_used,
        storage_limit,
        plan: raw.plan.filter(|p| !p.is_empty()).unwrap_or_else(|| "Free".to_string()),
    })
}

/// Body of a successful `auth/login`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
}

/// Share settings sent to `share/files` or `share/folders`
#[derive(Debug, Clone, Serialize)]
pub struct ShareRequest {
    pub mode: ShareMode,
    pub access: ShareAccess,
    pub emails: Vec<String>,
}

/// Pull the share URL out of whichever field the server used
pub fn parse_share_link(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    ["url", "shareUrl", "link"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Human-readable byte count ("1.50 MB")
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}
