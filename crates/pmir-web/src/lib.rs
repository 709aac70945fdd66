//! Health endpoint for the mirror: reports database and portal reachability
//! as JSON and answers 200 only when every dependency checks out.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const CRATE_NAME: &str = "pmir-web";

const PORTAL_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Ok,
    /// Reachable but answering with an error status.
    Degraded,
    Unavailable,
    Unreachable,
}

impl ProbeStatus {
    pub fn is_ok(self) -> bool {
        self == ProbeStatus::Ok
    }
}

/// Dependency checks behind the health endpoint. Injectable so handler
/// tests run without a database or portal.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn database(&self) -> ProbeStatus;
    async fn portal(&self) -> ProbeStatus;
}

pub struct LiveProbe {
    pool: PgPool,
    http: reqwest::Client,
    portal_url: String,
}

impl LiveProbe {
    pub fn new(pool: PgPool, portal_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(PORTAL_PROBE_TIMEOUT)
            .build()
            .context("building health probe http client")?;
        Ok(Self {
            pool,
            http,
            portal_url: portal_url.into(),
        })
    }
}

#[async_trait]
impl HealthProbe for LiveProbe {
    async fn database(&self) -> ProbeStatus {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => ProbeStatus::Ok,
            Err(_) => ProbeStatus::Unavailable,
        }
    }

    async fn portal(&self) -> ProbeStatus {
        match self.http.head(&self.portal_url).send().await {
            Ok(response) if response.status().as_u16() >= 400 => ProbeStatus::Degraded,
            Ok(_) => ProbeStatus::Ok,
            Err(_) => ProbeStatus::Unreachable,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    probe: Arc<dyn HealthProbe>,
}

impl AppState {
    pub fn new(probe: Arc<dyn HealthProbe>) -> Self {
        Self { probe }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    database: ProbeStatus,
    portal: ProbeStatus,
}

async fn health(State(state): State<AppState>) -> Response {
    let database = state.probe.database().await;
    let portal = state.probe.portal().await;

    let status = if database.is_ok() && portal.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(HealthResponse { database, portal })).into_response()
}

pub fn app(state: AppState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn serve(port: u16, state: AppState, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding health endpoint on port {port}"))?;
    info!(port, "health endpoint listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("serving health endpoint")
}
