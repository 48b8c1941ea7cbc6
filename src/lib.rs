//! Axis camera connector & subnet scanner.
//!
//! Two cooperating pieces live in this crate: the connector (a localhost
//! HTTP bridge that authenticates to and uploads packages onto Axis
//! cameras) and the scan coordinator that drives it across a subnet.

pub mod auth;
pub mod certstore;
pub mod config;
pub mod error;
pub mod http_client;
pub mod scan;
pub mod server;
pub mod tls;
pub mod upload;
pub mod util;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use certstore::CertStore;
use config::{ConnectorConfig, STANDARD_TIMEOUT_SECS, UPLOAD_TIMEOUT_SECS};
use error::Result;

/// Everything a connector handler needs, constructed once at startup and
/// threaded through `axum::extract::State` (spec §9 "single connector
/// context" replacing global mutable state).
pub struct ConnectorContext {
    pub standard_client: Client,
    pub upload_client: Client,
    pub cert_store: Arc<CertStore>,
    pub config: ConnectorConfig,
    pub requests_served: AtomicU64,
}

impl ConnectorContext {
    /// Build both HTTP clients against the pinning TLS config and load the
    /// certificate store from disk (spec §3 "two HTTP clients").
    pub fn build(config: ConnectorConfig) -> Result<Arc<Self>> {
        let cert_store = CertStore::load(config.cert_store_path.clone())?;
        let tls_config = tls::build_pinning_tls_config(Arc::clone(&cert_store));

        let standard_client = Client::builder()
            .use_preconfigured_tls((*tls_config).clone())
            .timeout(Duration::from_secs(STANDARD_TIMEOUT_SECS))
            .build()?;

        let upload_client = Client::builder()
            .use_preconfigured_tls((*tls_config).clone())
            .timeout(Duration::from_secs(UPLOAD_TIMEOUT_SECS))
            .build()?;

        Ok(Arc::new(Self {
            standard_client,
            upload_client,
            cert_store,
            config,
            requests_served: AtomicU64::new(0),
        }))
    }
}
