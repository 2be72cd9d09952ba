//! Authentication Module
//!
//! Token persistence, the HTTP transport seam, and the request coordinator
//! that keeps the access token fresh.

pub mod coordinator;
pub mod tokens;
pub mod transport;

pub use coordinator::{RequestCoordinator, SessionEnded, SessionState, REFRESH_PATH};
pub use tokens::{FileTokenStore, MemoryTokenStore, TokenPair, TokenStore};
pub use transport::{
    ApiRequest, ApiResponse, HttpTransport, MultipartUpload, ReqwestTransport, RequestBody,
};
