//! TLS client config factory for camera connections.
//!
//! Builds a `rustls::ClientConfig` that accepts both TLS 1.2 and 1.3 (Axis
//! firmware spans both) and delegates all trust decisions to the
//! certificate pinning store (§4.2) rather than a CA chain: there is no CA
//! to check against at all, so the verifier is [`certstore::PinningVerifier`]
//! rather than a CA-validating one.

use std::sync::Arc;

use rustls::ClientConfig;

use crate::certstore::{ensure_crypto_provider, CertStore, PinningVerifier};

/// Build a `rustls::ClientConfig` that pins leaf certificates via `store`.
pub fn build_pinning_tls_config(store: Arc<CertStore>) -> Arc<ClientConfig> {
    let provider = ensure_crypto_provider();
    let verifier = PinningVerifier::new(store, Arc::clone(&provider));

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("default protocol versions are always valid")
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();

    Arc::new(config)
}
