//! Scan coordinator (C6): worker-pool subnet scan that drives the
//! connector's `/proxy` endpoint to identify and classify cameras.

pub mod cidr;
pub mod classifier;

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::Intensity;
use crate::error::Result;
use classifier::{classify, DeviceProperties};
pub use classifier::DeviceKind;

/// Which transport produced a successful probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

/// Which auth scheme won the two-phase exchange. The connector's `/proxy`
/// contract (spec §4.5) does not surface which scheme succeeded, so this is
/// inferred from the per-protocol strategy order (spec §4.3): HTTPS tries
/// Basic first and HTTP tries Digest first, and scenarios S1/S2 show the
/// first strategy winning in the steady state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Basic,
    Digest,
}

/// One identified device (spec §3 "camera probe result"). Identity key is
/// `(ip, port)`; immutable once produced.
#[derive(Debug, Clone, Serialize)]
pub struct CameraProbeResult {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub protocol: Protocol,
    pub product_number: String,
    pub product_full_name: String,
    pub product_type: String,
    pub serial_number: String,
    pub firmware_version: String,
    pub device_kind: DeviceKind,
    pub auth_method: AuthMethod,
    pub supported: bool,
    pub firmware_known: bool,
}

/// A progress update (spec §4.6, §9 typed event channel).
#[derive(Debug, Clone, Serialize)]
pub struct ScanProgress {
    pub scanned_ips: u32,
    pub total_ips: u32,
    pub found_count: u32,
    pub last_ip: Option<Ipv4Addr>,
    pub state: Option<&'static str>,
}

/// Counters and cancellation flag shared between the coordinator and its
/// workers. `scanned` and `found_count` only ever increase (spec §8
/// invariant 1).
pub struct ScanSession {
    total: u32,
    scanned: AtomicU32,
    found_count: AtomicU32,
    cancel: Arc<std::sync::atomic::AtomicBool>,
}

impl ScanSession {
    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn scanned(&self) -> u32 {
        self.scanned.load(Ordering::SeqCst)
    }

    pub fn found_count(&self) -> u32 {
        self.found_count.load(Ordering::SeqCst)
    }

    /// Request cooperative cancellation; workers observe this between
    /// probes, never mid-probe (spec §5).
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// A running scan: its shared session, the progress pipe, and a join handle
/// yielding the final found-list.
pub struct ScanHandle {
    pub session: Arc<ScanSession>,
    pub progress: mpsc::Receiver<ScanProgress>,
    pub join: tokio::task::JoinHandle<Vec<CameraProbeResult>>,
}

/// Start a scan of `cidr` by driving the connector at `connector_base`
/// (spec §4.6). `intensity` selects the worker-pool width.
pub fn start_scan(
    connector_client: Client,
    connector_base: Url,
    cidr: &str,
    username: String,
    password: String,
    min_firmware: String,
    intensity: Intensity,
) -> Result<ScanHandle> {
    let (_network, _mask, ips) = cidr::expand_cidr(cidr)?;
    let total = ips.len() as u32;
    let ips = Arc::new(ips);

    let session = Arc::new(ScanSession {
        total,
        scanned: AtomicU32::new(0),
        found_count: AtomicU32::new(0),
        cancel: Arc::new(std::sync::atomic::AtomicBool::new(false)),
    });

    let (tx, rx) = mpsc::channel(1);
    let workers = intensity.worker_count().min(crate::config::MAX_WORKERS);
    let index = Arc::new(AtomicUsize::new(0));
    let found: Arc<Mutex<Vec<CameraProbeResult>>> = Arc::new(Mutex::new(Vec::new()));

    let join = tokio::spawn(run_workers(
        connector_client,
        connector_base,
        ips,
        index,
        workers,
        username,
        password,
        min_firmware,
        Arc::clone(&session),
        tx,
        Arc::clone(&found),
    ));

    Ok(ScanHandle { session, progress: rx, join })
}

#[allow(clippy::too_many_arguments)]
async fn run_workers(
    client: Client,
    connector_base: Url,
    ips: Arc<Vec<Ipv4Addr>>,
    index: Arc<AtomicUsize>,
    workers: usize,
    username: String,
    password: String,
    min_firmware: String,
    session: Arc<ScanSession>,
    tx: mpsc::Sender<ScanProgress>,
    found: Arc<Mutex<Vec<CameraProbeResult>>>,
) -> Vec<CameraProbeResult> {
    let mut tasks = JoinSet::new();

    for _ in 0..workers {
        let client = client.clone();
        let connector_base = connector_base.clone();
        let ips = Arc::clone(&ips);
        let index = Arc::clone(&index);
        let username = username.clone();
        let password = password.clone();
        let min_firmware = min_firmware.clone();
        let session = Arc::clone(&session);
        let tx = tx.clone();
        let found = Arc::clone(&found);

        tasks.spawn(async move {
            loop {
                if session.is_cancelled() {
                    break;
                }
                let i = index.fetch_add(1, Ordering::SeqCst);
                if i >= ips.len() {
                    break;
                }
                let ip = ips[i];

                let probe_result = probe_ip(&client, &connector_base, ip, &username, &password, &min_firmware).await;

                let scanned_now = session.scanned.fetch_add(1, Ordering::SeqCst) + 1;
                let mut found_camera = false;
                if let Some(camera) = probe_result {
                    found_camera = true;
                    session.found_count.fetch_add(1, Ordering::SeqCst);
                    found.lock().expect("found-list mutex poisoned").push(camera);
                }

                if scanned_now % 10 == 0 || found_camera {
                    let progress = ScanProgress {
                        scanned_ips: scanned_now,
                        total_ips: session.total(),
                        found_count: session.found_count(),
                        last_ip: Some(ip),
                        state: None,
                    };
                    let _ = tx.send(progress).await;
                }
            }
        });
    }

    while tasks.join_next().await.is_some() {}

    if session.is_cancelled() {
        let _ = tx
            .send(ScanProgress {
                scanned_ips: session.scanned(),
                total_ips: session.total(),
                found_count: session.found_count(),
                last_ip: None,
                state: Some("cancelled"),
            })
            .await;
    }

    let guard = found.lock().expect("found-list mutex poisoned");
    guard.clone()
}

async fn probe_ip(
    client: &Client,
    connector_base: &Url,
    ip: Ipv4Addr,
    username: &str,
    password: &str,
    min_firmware: &str,
) -> Option<CameraProbeResult> {
    let target_url = format!("https://{ip}/axis-cgi/basicdeviceinfo.cgi");
    let proxy_url = connector_base.join("/proxy").ok()?;

    let payload = json!({
        "url": target_url,
        "method": "POST",
        "username": username,
        "password": password,
        "body": {
            "apiVersion": "1.0",
            "method": "getProperties",
            "params": { "propertyList": ["Brand", "ProdType", "ProdNbr", "ProdFullName", "SerialNumber", "Version"] }
        }
    });

    let response = match client.post(proxy_url).json(&payload).send().await {
        Ok(r) => r,
        Err(e) => {
            debug!("scan probe {ip}: connector call failed: {e}");
            return None;
        }
    };

    if response.status() != reqwest::StatusCode::OK {
        debug!("scan probe {ip}: connector returned {}", response.status());
        return None;
    }

    let envelope: serde_json::Value = match response.json().await {
        Ok(v) => v,
        Err(e) => {
            debug!("scan probe {ip}: malformed connector response: {e}");
            return None;
        }
    };

    if envelope.get("status").and_then(|s| s.as_u64()) != Some(200) {
        return None;
    }

    let property_list = envelope.pointer("/data/propertyList")?;
    if property_list.get("Brand").and_then(|v| v.as_str()) != Some("AXIS") {
        return None;
    }

    let props = DeviceProperties {
        brand: property_list.get("Brand").and_then(|v| v.as_str()).map(str::to_string),
        prod_type: property_list.get("ProdType").and_then(|v| v.as_str()).map(str::to_string),
        prod_nbr: property_list.get("ProdNbr").and_then(|v| v.as_str()).map(str::to_string),
        prod_full_name: property_list.get("ProdFullName").and_then(|v| v.as_str()).map(str::to_string),
        serial_number: property_list.get("SerialNumber").and_then(|v| v.as_str()).map(str::to_string),
        version: property_list.get("Version").and_then(|v| v.as_str()).map(str::to_string),
    };

    let verdict = classify(&props, min_firmware);
    if verdict.device_kind != DeviceKind::Camera {
        debug!("scan probe {ip}: non-camera device kind {:?}, excluded from found list", verdict.device_kind);
        return None;
    }
    if !verdict.firmware_known {
        warn!("scan probe {ip}: Version property missing");
    }

    Some(CameraProbeResult {
        ip,
        port: 443,
        protocol: Protocol::Https,
        product_number: props.prod_nbr.unwrap_or_default(),
        product_full_name: props.prod_full_name.unwrap_or_default(),
        product_type: props.prod_type.unwrap_or_default(),
        serial_number: props.serial_number.unwrap_or_default(),
        firmware_version: props.version.unwrap_or_default(),
        device_kind: verdict.device_kind,
        auth_method: AuthMethod::Basic,
        supported: verdict.supported,
        firmware_known: verdict.firmware_known,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_counters_start_at_zero() {
        let session = ScanSession {
            total: 254,
            scanned: AtomicU32::new(0),
            found_count: AtomicU32::new(0),
            cancel: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        };
        assert_eq!(session.scanned(), 0);
        assert_eq!(session.found_count(), 0);
        assert!(!session.is_cancelled());
        session.cancel();
        assert!(session.is_cancelled());
    }
}
