//! In-process fake of the storage API used by unit tests.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::auth::{ApiRequest, ApiResponse, HttpTransport, RequestBody};
use crate::error::ApiError;

/// How the fake answers `POST auth/refresh`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshBehavior {
    Succeed,
    Reject,
    NetworkDown,
}

/// Recorded request: method, path, bearer token
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: String,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

/// Fake drive server. Accepts exactly one access token at a time; the refresh
/// endpoint swaps it for `next_token`.
pub struct FakeDrive {
    valid_token: Mutex<String>,
    next_token: Mutex<String>,
    refresh_behavior: Mutex<RefreshBehavior>,
    refresh_delay: Duration,
    pub refresh_calls: AtomicUsize,
    always_unauthorized: AtomicBool,
    seen: Mutex<Vec<Seen>>,
    routes: Mutex<HashMap<String, (u16, Value)>>,
    failing_ids: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl FakeDrive {
    pub fn new(valid_token: &str) -> Arc<Self> {
        Arc::new(Self {
            valid_token: Mutex::new(valid_token.to_string()),
            next_token: Mutex::new("fresh-token".to_string()),
            refresh_behavior: Mutex::new(RefreshBehavior::Succeed),
            refresh_delay: Duration::from_millis(20),
            refresh_calls: AtomicUsize::new(0),
            always_unauthorized: AtomicBool::new(false),
            seen: Mutex::new(Vec::new()),
            routes: Mutex::new(HashMap::new()),
            failing_ids: Mutex::new(HashSet::new()),
            gates: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_refresh_behavior(&self, behavior: RefreshBehavior) {
        *self.refresh_behavior.lock().unwrap() = behavior;
    }

    /// Answer every data request with 401, whatever the token
    pub fn reject_every_token(&self) {
        self.always_unauthorized.store(true, Ordering::SeqCst);
    }

    /// Canned answer for `METHOD path`
    pub fn route(&self, method: &str, path: &str, status: u16, body: Value) {
        self.routes
            .lock()
            .unwrap()
            .insert(format!("{} {}", method, path), (status, body));
    }

    /// Answer 500 to any authorized request whose JSON body carries `"id": id`
    pub fn fail_id(&self, id: &str) {
        self.failing_ids.lock().unwrap().insert(id.to_string());
    }

    /// Hold every authorized request to `path` until the returned notify fires
    pub fn gate(&self, path: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(path.to_string(), Arc::clone(&notify));
        notify
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn seen_path(&self, path: &str) -> Vec<Seen> {
        self.seen().into_iter().filter(|s| s.path == path).collect()
    }

    async fn refresh(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.refresh_delay).await;
        let behavior = *self.refresh_behavior.lock().unwrap();
        match behavior {
            RefreshBehavior::NetworkDown => {
                Err(ApiError::NetworkFailure("connection reset".to_string()))
            }
            RefreshBehavior::Reject => Ok(ApiResponse::new(
                401,
                json!({"message": "Invalid refresh token"}).to_string(),
            )),
            RefreshBehavior::Succeed => {
                let has_refresh = matches!(&request.body, RequestBody::Json(v) if v.get("refreshToken").is_some());
                if !has_refresh {
                    return Ok(ApiResponse::new(400, "missing refreshToken"));
                }
                let next = self.next_token.lock().unwrap().clone();
                *self.valid_token.lock().unwrap() = next.clone();
                Ok(ApiResponse::new(200, json!({ "accessToken": next }).to_string()))
            }
        }
    }
}

#[async_trait]
impl HttpTransport for FakeDrive {
    async fn send(
        &self,
        request: &ApiRequest,
        bearer: Option<&SecretString>,
    ) -> Result<ApiResponse, ApiError> {
        let bearer = bearer.map(|b| b.expose_secret().to_string());
        let body = match &request.body {
            RequestBody::Json(v) => Some(v.clone()),
            _ => None,
        };
        self.seen.lock().unwrap().push(Seen {
            method: request.method.to_string(),
            path: request.path.clone(),
            bearer: bearer.clone(),
            body,
        });

        if request.path == "auth/refresh" {
            return self.refresh(request).await;
        }

        let key = format!("{} {}", request.method, request.path);
        let route = self.routes.lock().unwrap().get(&key).cloned();
        if matches!(request.path.as_str(), "auth/login" | "auth/register" | "auth/logout") {
            let (status, body) = route.unwrap_or((200, json!({})));
            return Ok(ApiResponse::new(status, body.to_string()));
        }

        let valid = self.valid_token.lock().unwrap().clone();
        if self.always_unauthorized.load(Ordering::SeqCst) || bearer.as_deref() != Some(valid.as_str()) {
            return Ok(ApiResponse::new(401, json!({"message": "jwt expired"}).to_string()));
        }

        let gate = self.gates.lock().unwrap().get(&request.path).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let body_id = match &request.body {
            RequestBody::Json(v) => v.get("id").and_then(|id| id.as_str()).map(str::to_string),
            _ => None,
        };
        if let Some(id) = body_id {
            if self.failing_ids.lock().unwrap().contains(&id) {
                return Ok(ApiResponse::new(500, json!({"message": format!("cannot process {}", id)}).to_string()));
            }
        }

        let (status, body) = route.unwrap_or((200, json!([])));
        Ok(ApiResponse::new(status, body.to_string()))
    }
}
