pub mod error;

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use common_auth::{logged_in_cookie_name, AuthError, CookieValidator, LoggedInCookie, Outcome};
use common_config::{service_port, ConfigError, WpConfig};
use common_obs::{health_router, ObsInit, ObsInitError};
use error::ApiError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const SERVICE_NAME: &str = "session-gate";
pub const PORT_ENV: &str = "SESSION_GATE_PORT";
pub const DEFAULT_PORT: u16 = 8010;
pub const BASE_PATH_ENV: &str = "WP_BASE_PATH";
pub const DEFAULT_BASE_PATH: &str = "/var/www/html";

/// Anything that stops the service from coming up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Obs(#[from] ObsInitError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("listener failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct AppState {
    pub validator: CookieValidator,
    /// `wordpress_logged_in_<COOKIEHASH>`, when the site pins its hash.
    pub cookie_name: Option<String>,
}

impl AppState {
    pub fn from_config(config: &WpConfig) -> Result<Self, AuthError> {
        Ok(Self {
            validator: CookieValidator::from_config(config)?,
            cookie_name: config.cookie_hash().map(logged_in_cookie_name),
        })
    }

    /// Read `wp-config.php` from a WordPress install directory.
    pub fn load(base_path: impl AsRef<Path>) -> Result<Self, StartupError> {
        let config = WpConfig::from_base_path(base_path)?;
        Ok(Self::from_config(&config)?)
    }
}

pub fn base_path() -> PathBuf {
    env::var_os(BASE_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_PATH))
}

pub async fn run() -> Result<(), StartupError> {
    ObsInit::init(SERVICE_NAME)?;

    let base_path = base_path();
    let state = AppState::load(&base_path).inspect_err(|error| {
        tracing::error!(
            event = "config_load_failed",
            wp_base_path = %base_path.display(),
            %error,
            "cannot read wordpress secrets"
        );
    })?;

    let port = service_port(PORT_ENV, DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(
        event = "service_start",
        service = SERVICE_NAME,
        version = VERSION,
        listen_addr = %addr,
        wp_base_path = %base_path.display(),
        cookie_name = state.cookie_name.as_deref().unwrap_or("unknown"),
        "starting service",
    );

    serve(addr, Arc::new(state)).await
}

pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> Result<(), StartupError> {
    let app = build_router(state);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/sessions/validate", post(validate_session))
        .route("/v1/sessions/cookie-name", get(cookie_name))
        .with_state(state)
        .merge(health_router(SERVICE_NAME))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateRequest {
    /// Raw cookie value as sent by the browser, still URL-encoded.
    pub cookie: String,
    /// Characters 8..12 of the user's stored password hash.
    pub password_fragment: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CookieNameResponse {
    pub name: String,
}

async fn validate_session(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ValidateRequest>, JsonRejection>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let Json(request) = payload?;

    let outcome = match LoggedInCookie::parse(&request.cookie) {
        Ok(cookie) => {
            let outcome = cookie.check(&state.validator, &request.password_fragment);
            tracing::info!(
                event = "session_validate",
                user = cookie.username(),
                %outcome,
                "checked logged-in cookie"
            );
            outcome
        }
        Err(error) => {
            tracing::info!(event = "session_validate", %error, "unparseable cookie");
            Outcome::Malformed
        }
    };

    Ok(Json(ValidateResponse {
        valid: outcome == Outcome::Valid,
    }))
}

async fn cookie_name(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CookieNameResponse>, ApiError> {
    state
        .cookie_name
        .clone()
        .map(|name| Json(CookieNameResponse { name }))
        .ok_or_else(|| ApiError::NotFound {
            message: "COOKIEHASH is not defined in wp-config.php".to_string(),
        })
}
