//! Certificate pinning store (C2) — trust-on-first-use for camera TLS leaves.
//!
//! Axis cameras serve self-signed certificates with no usable CA chain, so
//! this verifier does not attempt chain validation against a configured CA
//! the way a CA-pinning verifier would. Instead it pins the SHA-256
//! fingerprint of the leaf certificate per hostname the first time it is
//! observed, and rejects any later handshake whose leaf disagrees.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, Error as TlsError, SignatureScheme};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ConnectorError, Result};

/// Marker substring embedded in the `rustls::Error` we raise on a pin
/// mismatch, so callers further up the stack (which only ever see a
/// `reqwest::Error` whose `Display` includes the original TLS error) can
/// recover the `cert-mismatch` kind without a custom transport.
pub const CERT_MISMATCH_MARKER: &str = "cert-mismatch:";

/// One pinned record: the leaf fingerprint first observed for a host, and
/// when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinnedCertRecord {
    pub fingerprint: String,
    pub first_seen: DateTime<Utc>,
}

/// Hostname-keyed pinning store, backed by a JSON file.
///
/// Concurrency: all access goes through a single `Mutex`; writes are
/// write-tmp + rename so a crash mid-write never corrupts the file (spec
/// §4.2).
#[derive(Debug)]
pub struct CertStore {
    path: PathBuf,
    records: Mutex<HashMap<String, PinnedCertRecord>>,
}

impl CertStore {
    /// Load the store from `path`. A missing file is treated as an empty
    /// map, not an error.
    pub fn load(path: PathBuf) -> Result<Arc<Self>> {
        let records = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| ConnectorError::Parse(format!("cert store {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(ConnectorError::Io(e)),
        };
        Ok(Arc::new(Self {
            path,
            records: Mutex::new(records),
        }))
    }

    /// TOFU policy from spec §4.2: accept and pin on first contact, accept
    /// silently on a matching fingerprint, reject without mutating the store
    /// on a mismatch.
    fn verify(&self, host: &str, fingerprint: &str) -> std::result::Result<(), String> {
        let mut records = self.records.lock().expect("cert store mutex poisoned");
        match records.get(host) {
            Some(pinned) if pinned.fingerprint == fingerprint => Ok(()),
            Some(pinned) => Err(format!(
                "{CERT_MISMATCH_MARKER}{host} expected {} got {fingerprint}",
                pinned.fingerprint
            )),
            None => {
                records.insert(
                    host.to_string(),
                    PinnedCertRecord {
                        fingerprint: fingerprint.to_string(),
                        first_seen: Utc::now(),
                    },
                );
                self.persist(&records);
                Ok(())
            }
        }
    }

    fn persist(&self, records: &HashMap<String, PinnedCertRecord>) {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let Ok(json) = serde_json::to_string_pretty(records) else {
            return;
        };
        let tmp = self.path.with_extension("json.tmp");
        if fs::write(&tmp, json).is_ok() {
            let _ = fs::rename(&tmp, &self.path);
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600));
            }
        }
    }

    /// Snapshot the pinned fingerprint for `host`, if any (test/debug use).
    pub fn get(&self, host: &str) -> Option<PinnedCertRecord> {
        self.records
            .lock()
            .expect("cert store mutex poisoned")
            .get(host)
            .cloned()
    }
}

/// A `ServerCertVerifier` that pins leaf fingerprints via a [`CertStore`]
/// instead of validating a certificate chain — cameras serve self-signed
/// leaves with no usable CA (spec §1, §4.2).
#[derive(Debug)]
pub struct PinningVerifier {
    store: Arc<CertStore>,
    provider: Arc<CryptoProvider>,
}

impl PinningVerifier {
    pub fn new(store: Arc<CertStore>, provider: Arc<CryptoProvider>) -> Arc<Self> {
        Arc::new(Self { store, provider })
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        let fingerprint = hex::encode(Sha256::digest(end_entity.as_ref()));
        let host = server_name_host(server_name);

        match self.store.verify(&host, &fingerprint) {
            Ok(()) => Ok(ServerCertVerified::assertion()),
            Err(msg) => Err(TlsError::General(msg)),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

fn server_name_host(name: &ServerName<'_>) -> String {
    match name {
        ServerName::DnsName(dns) => dns.as_ref().to_ascii_lowercase(),
        ServerName::IpAddress(ip) => std::net::IpAddr::from(*ip).to_string(),
        _ => String::new(),
    }
}

/// Return `true` if a transport error's display chain carries the
/// cert-mismatch marker raised by [`PinningVerifier`].
pub fn is_cert_mismatch(err: &reqwest::Error) -> Option<String> {
    let text = format!("{err:#}");
    text.find(CERT_MISMATCH_MARKER).map(|idx| {
        text[idx + CERT_MISMATCH_MARKER.len()..]
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_string()
    })
}

/// Build the shared rustls `CryptoProvider`, installing the default process
/// provider exactly once (idempotent — safe to call from tests too).
pub fn ensure_crypto_provider() -> Arc<CryptoProvider> {
    if let Some(existing) = CryptoProvider::get_default() {
        return existing.clone();
    }
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let _ = CryptoProvider::set_default(provider.clone());
    provider
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn tofu_accepts_first_contact_then_matches() {
        let dir = tempdir().unwrap();
        let store = CertStore::load(dir.path().join("pins.json")).unwrap();
        assert!(store.verify("cam.local", "aaaa").is_ok());
        assert!(store.verify("cam.local", "aaaa").is_ok());
        assert_eq!(store.get("cam.local").unwrap().fingerprint, "aaaa");
    }

    #[test]
    fn tofu_rejects_mismatch_without_mutating_store() {
        let dir = tempdir().unwrap();
        let store = CertStore::load(dir.path().join("pins.json")).unwrap();
        store.verify("cam.local", "aaaa").unwrap();
        let err = store.verify("cam.local", "bbbb").unwrap_err();
        assert!(err.contains(CERT_MISMATCH_MARKER));
        assert_eq!(store.get("cam.local").unwrap().fingerprint, "aaaa");
    }

    #[test]
    fn store_persists_across_loads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pins.json");
        {
            let store = CertStore::load(path.clone()).unwrap();
            store.verify("10.0.0.5", "ffff").unwrap();
        }
        let reloaded = CertStore::load(path).unwrap();
        assert_eq!(reloaded.get("10.0.0.5").unwrap().fingerprint, "ffff");
    }

    #[test]
    fn missing_file_is_empty_map() {
        let dir = tempdir().unwrap();
        let store = CertStore::load(dir.path().join("does-not-exist.json")).unwrap();
        assert!(store.get("anything").is_none());
    }
}
