//!
//! keystock HTTP server
//! --------------------
//! This module defines the Axum-based HTTP API for keystock.
//!
//! Responsibilities:
//! - Login endpoint delegating password checks to the directory verifier and
//!   provisioning local accounts on first success.
//! - Stateless bearer/cookie token transport (`access_token`) for every
//!   protected route.
//! - Role-gated inventory and history endpoints backed by the Parquet stores.
//! - First-run seeding of the fixed item set and startup inventory logs.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info};

use crate::accounts::{Account, AccountStore};
use crate::config::Config;
use crate::directory::{CredentialVerifier, LdapVerifier, VerifyOutcome};
use crate::error::{AppError, AppResult};
use crate::inventory::InventoryStore;
use crate::roles::{Role, HISTORY_DELETE_ROLES, HISTORY_ROLES, INVENTORY_ROLES};
use crate::token;

const TOKEN_COOKIE: &str = "access_token";

/// Items created on first run. Seeding is idempotent per name, so restarting
/// against an existing data root never duplicates or resets them.
const SEED_ITEMS: &[&str] = &["GPS Units", "Card Readers"];

/// Shared server state injected into all handlers.
///
/// Holds the two store handles, the directory verifier behind its trait seam,
/// and the read-only configuration. Everything clones cheaply.
#[derive(Clone)]
pub struct AppState {
    pub accounts: AccountStore,
    pub inventory: InventoryStore,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub config: Arc<Config>,
}

fn log_startup_counts(accounts: &AccountStore, inventory: &InventoryStore) {
    let n_accounts = accounts.count().unwrap_or(0);
    let items = inventory.items().unwrap_or_default();
    info!(target: "startup", "{} account(s), {} item(s) in the store", n_accounts, items.len());
    for it in items {
        info!(target: "startup", "item {}: '{}' used={}", it.id, it.name, it.used);
    }
}

/// Open the stores under the configured data root, seed the fixed item set,
/// and assemble the shared state.
pub fn init_state(config: Config, verifier: Arc<dyn CredentialVerifier>) -> anyhow::Result<AppState> {
    std::fs::create_dir_all(&config.data_root)
        .with_context(|| format!("Failed to create or access data root: {}", config.data_root))?;
    let accounts = AccountStore::open(&config.data_root);
    let inventory = InventoryStore::open(&config.data_root);
    inventory
        .seed_items(SEED_ITEMS)
        .with_context(|| format!("While seeding items under data root: {}", config.data_root))?;
    log_startup_counts(&accounts, &inventory);
    Ok(AppState { accounts, inventory, verifier, config: Arc::new(config) })
}

/// Mount all routes onto a router carrying `state`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "keystock ok" }))
        .route("/auth/login", post(login))
        .route("/api/inventory", get(get_inventory))
        .route("/api/inventory/{id}", post(update_inventory))
        .route("/api/history", get(get_history).post(add_history))
        .route("/api/history/{id}", delete(delete_history_entry))
        .with_state(state)
}

/// Start the keystock HTTP server with the given configuration, verifying
/// credentials against the configured LDAP directory.
pub async fn run_with_config(config: Config) -> anyhow::Result<()> {
    let verifier: Arc<dyn CredentialVerifier> = Arc::new(LdapVerifier::new(config.directory.clone()));
    let state = init_state(config, verifier)?;
    let http_port = state.config.http_port;
    let app = build_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Convenience entry point reading everything from the environment.
pub async fn run() -> anyhow::Result<()> {
    run_with_config(Config::from_env()).await
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    username: String,
    password: String,
    // Accepted for wire compatibility; cookie lifetime always equals the token TTL
    #[serde(default)]
    remember_me: bool,
}

#[derive(Debug, Deserialize)]
struct UsedPayload {
    used: i64,
}

#[derive(Debug, Deserialize)]
struct HistoryPayload {
    item: String,
    change: i64,
    timestamp: String,
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get("cookie").or_else(|| headers.get("Cookie"))?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == name { return Some(v[1..].to_string()); }
        }
    }
    None
}

/// Token transport: `Authorization: Bearer` wins over the cookie.
fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get("authorization").or_else(|| headers.get("Authorization")) {
        if let Ok(s) = auth.to_str() {
            if let Some(rest) = s.strip_prefix("Bearer ") {
                if !rest.is_empty() { return Some(rest.to_string()); }
            }
        }
    }
    parse_cookie(headers, TOKEN_COOKIE)
}

fn set_token_cookie(token: &str, max_age_secs: i64, secure: bool) -> HeaderValue {
    // HttpOnly cookie scoped to path / with SameSite=Lax, as the frontend expects
    let mut cookie = format!("{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}", TOKEN_COOKIE, token, max_age_secs);
    if secure { cookie.push_str("; Secure"); }
    HeaderValue::from_str(&cookie).unwrap()
}

/// Validate the request token and check the caller's role against `allowed`.
///
/// The three 401 flavors (no token, bad token, dangling subject) and the 403
/// are distinct errors so the response bodies match what clients key on.
fn authorize(state: &AppState, headers: &HeaderMap, allowed: &[Role]) -> AppResult<Account> {
    let Some(tok) = token_from_headers(headers) else {
        return Err(AppError::auth("not_authenticated", "Not authenticated"));
    };
    let claims = match token::validate(&state.config.token_secret, &tok) {
        Ok(c) => c,
        Err(e) => {
            debug!(target: "keystock", "token rejected: {}", e);
            return Err(AppError::auth("invalid_token", "Invalid token"));
        }
    };
    let account = match state.accounts.find(&claims.sub) {
        Ok(Some(a)) => a,
        Ok(None) => return Err(AppError::auth("user_not_found", "User not found")),
        Err(e) => {
            error!(target: "keystock", "account lookup failed for '{}': {}", claims.sub, e);
            return Err(AppError::internal("internal_error", "Internal server error"));
        }
    };
    if !account.role.allowed(allowed) {
        return Err(AppError::forbidden("access_denied", "Access denied"));
    }
    Ok(account)
}

/// Guard and storage failures render as `{"detail": ...}` with the mapped status.
fn error_response(err: AppError) -> (StatusCode, Json<serde_json::Value>) {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"detail": err.message()})))
}

async fn login(State(state): State<AppState>, Json(payload): Json<LoginPayload>) -> impl IntoResponse {
    if state.verifier.verify(&payload.username, &payload.password).await != VerifyOutcome::Verified {
        info!(target: "keystock", "login rejected for '{}'", payload.username);
        return (StatusCode::UNAUTHORIZED, HeaderMap::new(), Json(json!({"error": "Invalid credentials"})));
    }
    // Directory says yes; provision on first login, fetch thereafter
    let account = match state.accounts.ensure_account(&payload.username, &payload.password) {
        Ok(a) => a,
        Err(e) => {
            error!(target: "keystock", "provisioning '{}' failed: {}", payload.username, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new(), Json(json!({"error": "Internal server error"})));
        }
    };
    let ttl = state.config.token_ttl_minutes;
    let tok = match token::issue(&state.config.token_secret, &account.username, account.role, ttl) {
        Ok(t) => t,
        Err(e) => {
            error!(target: "keystock", "token issue for '{}' failed: {}", account.username, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new(), Json(json!({"error": "Internal server error"})));
        }
    };
    if payload.remember_me {
        debug!(target: "keystock", "remember_me requested by '{}'; cookie lifetime stays at the token TTL", payload.username);
    }
    let mut headers = HeaderMap::new();
    headers.insert("Set-Cookie", set_token_cookie(&tok, ttl * 60, state.config.cookie_secure));
    info!(target: "keystock", "login ok user='{}' role={}", account.username, account.role);
    (
        StatusCode::OK,
        headers,
        Json(json!({"access_token": tok, "token_type": "bearer", "role": account.role.as_str()})),
    )
}

async fn get_inventory(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(e) = authorize(&state, &headers, INVENTORY_ROLES) {
        return error_response(e);
    }
    match state.inventory.items() {
        Ok(items) => (StatusCode::OK, Json(json!(items))),
        Err(e) => {
            error!(target: "keystock", "inventory read failed: {}", e);
            error_response(AppError::internal("internal_error", "Internal server error"))
        }
    }
}

async fn update_inventory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(item_id): Path<i64>,
    Json(payload): Json<UsedPayload>,
) -> impl IntoResponse {
    if let Err(e) = authorize(&state, &headers, INVENTORY_ROLES) {
        return error_response(e);
    }
    match state.inventory.set_used(item_id, payload.used) {
        Ok(true) => (StatusCode::OK, Json(json!({"success": true}))),
        Ok(false) => error_response(AppError::not_found("item_not_found", "Item not found")),
        Err(e) => {
            error!(target: "keystock", "inventory update failed for item {}: {}", item_id, e);
            error_response(AppError::internal("internal_error", "Internal server error"))
        }
    }
}

async fn get_history(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(e) = authorize(&state, &headers, HISTORY_ROLES) {
        return error_response(e);
    }
    match state.inventory.history() {
        Ok(entries) => (StatusCode::OK, Json(json!(entries))),
        Err(e) => {
            error!(target: "keystock", "history read failed: {}", e);
            error_response(AppError::internal("internal_error", "Internal server error"))
        }
    }
}

async fn add_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<HistoryPayload>,
) -> impl IntoResponse {
    let account = match authorize(&state, &headers, HISTORY_ROLES) {
        Ok(a) => a,
        Err(e) => return error_response(e),
    };
    match state.inventory.append_history(&payload.item, payload.change, &payload.timestamp) {
        Ok(()) => {
            debug!(target: "keystock", "history append by '{}': '{}' {:+}", account.username, payload.item, payload.change);
            (StatusCode::OK, Json(json!({"success": true})))
        }
        Err(e) => {
            error!(target: "keystock", "history append failed: {}", e);
            error_response(AppError::internal("internal_error", "Internal server error"))
        }
    }
}

async fn delete_history_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(entry_id): Path<i64>,
) -> impl IntoResponse {
    // Role check first: a non-admin gets 403 whether or not the entry exists
    let account = match authorize(&state, &headers, HISTORY_DELETE_ROLES) {
        Ok(a) => a,
        Err(e) => return error_response(e),
    };
    match state.inventory.delete_history(entry_id) {
        Ok(true) => {
            info!(target: "keystock", "history entry {} deleted by '{}'", entry_id, account.username);
            (StatusCode::OK, Json(json!({"success": true})))
        }
        Ok(false) => error_response(AppError::not_found("entry_not_found", "Entry not found")),
        Err(e) => {
            error!(target: "keystock", "history delete failed for {}: {}", entry_id, e);
            error_response(AppError::internal("internal_error", "Internal server error"))
        }
    }
}
