//! Authenticated Request Coordinator
//!
//! Attaches the bearer token to every authorized request and recovers from an
//! expired access token by refreshing it and re-issuing the request once.
//!
//! Refreshes are single-flight: the first caller that needs a new token starts
//! the `auth/refresh` call and parks a shared future in `refresh_slot`; every
//! other caller that hits a 401 while that future is pending awaits a clone of
//! it and therefore sees the same token (or the same failure).
//!
//! ```text
//! Unauthenticated ──set_tokens──▶ Authenticated ──401──▶ Refreshing
//!        ▲                             ▲                    │
//!        │                             └──── refresh ok ────┤
//!        └──────────────────────────── refresh failed ──────┘
//! ```

use futures_util::future::{BoxFuture, FutureExt, Shared};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::tokens::{TokenPair, TokenStore};
use super::transport::{ApiRequest, ApiResponse, HttpTransport};
use crate::error::ApiError;

/// Refresh endpoint, relative to the API base URL
pub const REFRESH_PATH: &str = "auth/refresh";

type RefreshOutcome = Result<SecretString, ApiError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Per-session authentication state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Refreshing,
}

/// Emitted when a failed refresh forces the user out of the session
#[derive(Debug, Clone)]
pub struct SessionEnded {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

struct Inner {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn TokenStore>,
    tokens: RwLock<Option<TokenPair>>,
    /// Pending refresh; `Some` exactly while a refresh is in flight
    refresh_slot: Mutex<Option<SharedRefresh>>,
    state_tx: watch::Sender<SessionState>,
    ended_tx: broadcast::Sender<SessionEnded>,
}

/// Cloneable handle; clones share tokens and the refresh slot
#[derive(Clone)]
pub struct RequestCoordinator {
    inner: Arc<Inner>,
}

impl RequestCoordinator {
    /// Build a coordinator, restoring any session the store already holds
    pub fn new(transport: Arc<dyn HttpTransport>, store: Arc<dyn TokenStore>) -> Self {
        let tokens = match store.load() {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Could not restore session tokens: {}", e);
                None
            }
        };
        let initial = if tokens.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        };
        let (state_tx, _) = watch::channel(initial);
        let (ended_tx, _) = broadcast::channel(16);

        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                tokens: RwLock::new(tokens),
                refresh_slot: Mutex::new(None),
                state_tx,
                ended_tx,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Fires once per forced logout (refresh impossible or rejected)
    pub fn on_session_ended(&self) -> broadcast::Receiver<SessionEnded> {
        self.inner.ended_tx.subscribe()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.tokens.read().await.is_some()
    }

    pub async fn access_token(&self) -> Option<SecretString> {
        self.inner.tokens.read().await.as_ref().map(|t| t.access_token.clone())
    }

    pub async fn refresh_token(&self) -> Option<SecretString> {
        self.inner.tokens.read().await.as_ref().map(|t| t.refresh_token.clone())
    }

    /// Install a fresh pair (after login) and persist it
    pub async fn set_tokens(&self, tokens: TokenPair) -> Result<(), ApiError> {
        self.inner.store.save(&tokens)?;
        *self.inner.tokens.write().await = Some(tokens);
        self.inner.set_state(SessionState::Authenticated);
        info!("Session tokens installed");
        Ok(())
    }

    /// Replace the access token, keeping the refresh token.
    /// Fails when there is no session: a lone access token is not a valid state.
    pub async fn set_access_token(&self, token: SecretString) -> Result<(), ApiError> {
        let mut guard = self.inner.tokens.write().await;
        let pair = guard
            .as_mut()
            .ok_or_else(|| ApiError::AuthInvalid("No refresh token in session".to_string()))?;
        pair.access_token = token;
        self.inner.store.save(pair)
    }

    /// Drop both tokens from memory and from the store
    pub async fn clear_tokens(&self) -> Result<(), ApiError> {
        self.inner.clear_tokens().await
    }

    /// Unauthenticated call; never triggers a refresh
    pub async fn request(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let response = self.inner.transport.send(&request, None).await?;
        into_result(response)
    }

    /// Authorized call with one transparent refresh-and-retry on 401
    pub async fn authorized_request(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let sent_with = self.access_token().await;
        let response = self.inner.transport.send(&request, sent_with.as_ref()).await?;
        if !response.is_unauthorized() {
            return into_result(response);
        }

        debug!("{} {} returned 401, obtaining a new access token", request.method, request.path);
        let token = self.token_after_rejection(sent_with.as_ref()).await?;

        let retry = self.inner.transport.send(&request, Some(&token)).await?;
        if retry.is_unauthorized() {
            warn!("{} {} still unauthorized after refresh", request.method, request.path);
            return Err(ApiError::AuthExpired);
        }
        into_result(retry)
    }

    /// Single-flight refresh. Concurrent callers share one network call.
    ///
    /// Without a session there is nothing to refresh: the call fails with
    /// `AuthInvalid` and neither the state nor the session-ended channel moves.
    pub async fn refresh_access_token(&self) -> Result<SecretString, ApiError> {
        let refresh = {
            let mut slot = self.inner.refresh_slot.lock().await;
            let signed_in = self.inner.tokens.read().await.is_some();
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("Joining in-flight token refresh");
                    in_flight.clone()
                }
                None if !signed_in => {
                    debug!("401 without a session, not refreshing");
                    return Err(ApiError::AuthInvalid("Not signed in".to_string()));
                }
                None => {
                    let weak = Arc::downgrade(&self.inner);
                    let refresh = run_refresh(weak).boxed().shared();
                    *slot = Some(refresh.clone());
                    self.inner.set_state(SessionState::Refreshing);
                    refresh
                }
            }
        };
        refresh.await
    }

    /// Token to retry with after a 401. If another caller already replaced the
    /// token this request carried, reuse that one instead of refreshing again.
    async fn token_after_rejection(
        &self,
        rejected: Option<&SecretString>,
    ) -> Result<SecretString, ApiError> {
        if let Some(current) = self.access_token().await {
            let stale = match rejected {
                Some(rejected) => rejected.expose_secret() != current.expose_secret(),
                None => true,
            };
            if stale {
                debug!("Access token was replaced while the request was in flight");
                return Ok(current);
            }
        }
        self.refresh_access_token().await
    }
}

impl Inner {
    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    async fn clear_tokens(&self) -> Result<(), ApiError> {
        *self.tokens.write().await = None;
        self.set_state(SessionState::Unauthenticated);
        self.store.clear()
    }

    async fn perform_refresh(&self) -> RefreshOutcome {
        let refresh_token = self
            .tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.refresh_token.clone())
            .ok_or_else(|| ApiError::AuthInvalid("No refresh token available".to_string()))?;

        let request = ApiRequest::post(REFRESH_PATH).json(serde_json::json!({
            "refreshToken": refresh_token.expose_secret(),
        }));

        let response = self
            .transport
            .send(&request, None)
            .await
            .map_err(|e| ApiError::AuthInvalid(format!("Token refresh failed: {}", e)))?;

        if !response.is_success() {
            return Err(ApiError::AuthInvalid(format!(
                "Token refresh rejected ({})",
                response.status
            )));
        }

        let body: RefreshResponse = response
            .json()
            .map_err(|e| ApiError::AuthInvalid(format!("Token refresh failed: {}", e)))?;
        let access = SecretString::from(body.access_token);

        let mut guard = self.tokens.write().await;
        let pair = guard
            .as_mut()
            .ok_or_else(|| ApiError::AuthInvalid("Session cleared during refresh".to_string()))?;
        pair.access_token = access.clone();
        if let Some(rotated) = body.refresh_token {
            pair.refresh_token = SecretString::from(rotated);
        }
        if let Err(e) = self.store.save(pair) {
            warn!("Failed to persist refreshed token: {}", e);
        }

        info!("Access token refreshed");
        Ok(access)
    }

    async fn terminate_session(&self, reason: String) {
        if let Err(e) = self.clear_tokens().await {
            warn!("Failed to clear stored tokens: {}", e);
        }
        info!("Session ended: {}", reason);
        // No receivers just means nobody is listening for the redirect
        let _ = self.ended_tx.send(SessionEnded { reason });
    }
}

async fn run_refresh(inner: Weak<Inner>) -> RefreshOutcome {
    let Some(inner) = inner.upgrade() else {
        return Err(ApiError::AuthInvalid("Coordinator dropped".to_string()));
    };

    let outcome = inner.perform_refresh().await;
    match &outcome {
        Ok(_) => inner.set_state(SessionState::Authenticated),
        Err(e) => inner.terminate_session(e.to_string()).await,
    }

    // Waiters already hold clones of this future; they all resolve with `outcome`
    *inner.refresh_slot.lock().await = None;
    outcome
}

fn into_result(response: ApiResponse) -> Result<ApiResponse, ApiError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ApiError::rejected(response.status, &response.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryTokenStore;
    use crate::testing::{FakeDrive, RefreshBehavior};
    use futures_util::future::join_all;
    use serde_json::json;

    fn coordinator(fake: &Arc<FakeDrive>, tokens: Option<TokenPair>) -> (RequestCoordinator, Arc<MemoryTokenStore>) {
        let store = Arc::new(match tokens {
            Some(t) => MemoryTokenStore::with_tokens(&t),
            None => MemoryTokenStore::new(),
        });
        let coordinator = RequestCoordinator::new(fake.clone(), store.clone());
        (coordinator, store)
    }

    #[tokio::test]
    async fn test_valid_token_passes_through() {
        let fake = FakeDrive::new("good");
        let (coordinator, _) = coordinator(&fake, Some(TokenPair::new("good", "r1")));

        let response = coordinator.authorized_request(ApiRequest::get("api/tree")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(fake.refresh_count(), 0);
        assert_eq!(fake.seen()[0].bearer.as_deref(), Some("good"));
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let fake = FakeDrive::new("fresh-token");
        let (coordinator, store) = coordinator(&fake, Some(TokenPair::new("expired", "r1")));

        let requests = (0..8).map(|i| {
            let c = coordinator.clone();
            async move { c.authorized_request(ApiRequest::get(format!("api/tree/F{}", i))).await }
        });
        let results = join_all(requests).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(fake.refresh_count(), 1);
        for i in 0..8 {
            let seen = fake.seen_path(&format!("api/tree/F{}", i));
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[0].bearer.as_deref(), Some("expired"));
            assert_eq!(seen[1].bearer.as_deref(), Some("fresh-token"));
        }
        assert_eq!(coordinator.state(), SessionState::Authenticated);
        let persisted = store.load().unwrap().unwrap();
        assert_eq!(persisted.access_token.expose_secret(), "fresh-token");
        assert_eq!(persisted.refresh_token.expose_secret(), "r1");
    }

    #[tokio::test]
    async fn test_two_requests_complete_with_first_refresh_token() {
        let fake = FakeDrive::new("fresh-token");
        let (coordinator, _) = coordinator(&fake, Some(TokenPair::new("expired", "r1")));

        let (a, b) = tokio::join!(
            coordinator.authorized_request(ApiRequest::get("api/tree/A")),
            coordinator.authorized_request(ApiRequest::get("api/tree/B")),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(fake.seen_path(REFRESH_PATH).len(), 1);
        assert_eq!(fake.seen_path("api/tree/B")[1].bearer.as_deref(), Some("fresh-token"));
    }

    #[tokio::test]
    async fn test_failed_refresh_fails_all_waiters_and_clears_tokens() {
        let fake = FakeDrive::new("fresh-token");
        fake.set_refresh_behavior(RefreshBehavior::Reject);
        let (coordinator, store) = coordinator(&fake, Some(TokenPair::new("expired", "r1")));
        let mut ended = coordinator.on_session_ended();

        let requests = (0..5).map(|_| coordinator.authorized_request(ApiRequest::get("api/tree")));
        let results = join_all(requests).await;

        assert!(results.iter().all(|r| matches!(r, Err(ApiError::AuthInvalid(_)))));
        assert_eq!(fake.refresh_count(), 1);
        assert!(coordinator.access_token().await.is_none());
        assert!(coordinator.refresh_token().await.is_none());
        assert!(store.load().unwrap().is_none());
        assert_eq!(coordinator.state(), SessionState::Unauthenticated);
        assert!(ended.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_network_failure_during_refresh_ends_session() {
        let fake = FakeDrive::new("fresh-token");
        fake.set_refresh_behavior(RefreshBehavior::NetworkDown);
        let (coordinator, _) = coordinator(&fake, Some(TokenPair::new("expired", "r1")));

        let err = coordinator.authorized_request(ApiRequest::get("api/tree")).await.unwrap_err();
        assert!(err.is_session_terminated());
        assert!(!coordinator.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_skips_network() {
        let fake = FakeDrive::new("fresh-token");
        fake.set_refresh_behavior(RefreshBehavior::Reject);
        let (coordinator, _) = coordinator(&fake, None);
        let mut ended = coordinator.on_session_ended();
        let mut states = coordinator.subscribe_state();

        let err = coordinator.authorized_request(ApiRequest::get("api/tree")).await.unwrap_err();
        assert!(matches!(err, ApiError::AuthInvalid(_)));
        assert_eq!(fake.refresh_count(), 0);
        assert!(fake.seen()[0].bearer.is_none());

        // Never signed in, so there is no session to end
        assert!(ended.try_recv().is_err());
        assert!(!states.has_changed().unwrap());
        assert_eq!(coordinator.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_late_401_after_failed_refresh_ends_session_once() {
        let fake = FakeDrive::new("fresh-token");
        fake.set_refresh_behavior(RefreshBehavior::Reject);
        let (coordinator, _) = coordinator(&fake, Some(TokenPair::new("expired", "r1")));
        let mut ended = coordinator.on_session_ended();

        assert!(coordinator.authorized_request(ApiRequest::get("api/tree")).await.is_err());
        assert!(ended.try_recv().is_ok());

        let err = coordinator.authorized_request(ApiRequest::get("api/trash")).await.unwrap_err();
        assert!(matches!(err, ApiError::AuthInvalid(_)));
        assert_eq!(fake.refresh_count(), 1);
        assert!(ended.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_non_auth_errors_are_not_retried() {
        let fake = FakeDrive::new("good");
        fake.route("POST", "api/rename", 404, json!({"message": "Item not found"}));
        let (coordinator, _) = coordinator(&fake, Some(TokenPair::new("good", "r1")));

        let err = coordinator
            .authorized_request(ApiRequest::post("api/rename").json(json!({"id": "x"})))
            .await
            .unwrap_err();
        match err {
            ApiError::RequestRejected { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Item not found");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(fake.seen_path("api/rename").len(), 1);
        assert_eq!(fake.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_is_attempted_only_once() {
        let fake = FakeDrive::new("fresh-token");
        fake.reject_every_token();
        let (coordinator, _) = coordinator(&fake, Some(TokenPair::new("expired", "r1")));

        let err = coordinator.authorized_request(ApiRequest::get("api/tree")).await.unwrap_err();
        assert!(matches!(err, ApiError::AuthExpired));
        assert_eq!(fake.seen_path("api/tree").len(), 2);
        assert_eq!(fake.refresh_count(), 1);
        // The refresh itself worked, so the session survives
        assert_eq!(coordinator.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_requests_after_refresh_use_new_token() {
        let fake = FakeDrive::new("fresh-token");
        let (coordinator, _) = coordinator(&fake, Some(TokenPair::new("expired", "r1")));

        coordinator.authorized_request(ApiRequest::get("api/tree")).await.unwrap();
        coordinator.authorized_request(ApiRequest::get("api/trash")).await.unwrap();

        let trash = fake.seen_path("api/trash");
        assert_eq!(trash.len(), 1);
        assert_eq!(trash[0].bearer.as_deref(), Some("fresh-token"));
    }

    #[tokio::test]
    async fn test_set_access_token_requires_session() {
        let fake = FakeDrive::new("x");
        let (coordinator, _) = coordinator(&fake, None);
        assert!(coordinator
            .set_access_token(SecretString::from("lonely".to_string()))
            .await
            .is_err());
        assert_eq!(coordinator.state(), SessionState::Unauthenticated);

        coordinator.set_tokens(TokenPair::new("a", "r")).await.unwrap();
        coordinator
            .set_access_token(SecretString::from("b".to_string()))
            .await
            .unwrap();
        assert_eq!(coordinator.access_token().await.unwrap().expose_secret(), "b");
        assert_eq!(coordinator.state(), SessionState::Authenticated);

        coordinator.clear_tokens().await.unwrap();
        assert!(coordinator.access_token().await.is_none());
        assert!(coordinator.refresh_token().await.is_none());
    }

    #[tokio::test]
    async fn test_state_watch_sees_refresh_cycle() {
        let fake = FakeDrive::new("fresh-token");
        let (coordinator, _) = coordinator(&fake, Some(TokenPair::new("expired", "r1")));
        let mut states = coordinator.subscribe_state();
        assert_eq!(*states.borrow_and_update(), SessionState::Authenticated);

        let c = coordinator.clone();
        let task = tokio::spawn(async move { c.refresh_access_token().await });
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), SessionState::Refreshing);

        let token = task.await.unwrap().unwrap();
        assert_eq!(token.expose_secret(), "fresh-token");
        assert_eq!(coordinator.state(), SessionState::Authenticated);
    }
}
