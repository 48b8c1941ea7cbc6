//! Device classifier (C7): VAPIX `basicdeviceinfo.cgi` properties to a
//! typed [`DeviceKind`] and firmware-floor verdict.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    Camera,
    Speaker,
    Intercom,
    AccessControl,
    Unknown,
}

impl DeviceKind {
    /// First character of `ProdNbr`, upper-cased (spec §4.7).
    pub fn from_prod_nbr(prod_nbr: &str) -> Self {
        match prod_nbr.chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('M') | Some('P') | Some('Q') => Self::Camera,
            Some('C') => Self::Speaker,
            Some('I') => Self::Intercom,
            Some('A') => Self::AccessControl,
            _ => Self::Unknown,
        }
    }
}

/// Parsed `basicdeviceinfo.cgi` property list, as much as the classifier
/// needs of it.
#[derive(Debug, Clone, Default)]
pub struct DeviceProperties {
    pub brand: Option<String>,
    pub prod_type: Option<String>,
    pub prod_nbr: Option<String>,
    pub prod_full_name: Option<String>,
    pub serial_number: Option<String>,
    pub version: Option<String>,
}

/// The classifier's verdict on one camera probe.
#[derive(Debug, Clone)]
pub struct Classification {
    pub device_kind: DeviceKind,
    /// `false` when `Version` was below the configured floor.
    pub supported: bool,
    /// `false` when `Version` was absent entirely — an Open Question the
    /// spec defers rather than resolves (§9); this crate only records it.
    pub firmware_known: bool,
}

/// Strict 3-component semver-style triplet, missing components as 0 (spec
/// §4.7). Non-numeric components also parse as 0 rather than erroring —
/// firmware strings are free-form display text, not a validated format.
fn semver_triplet(version: &str) -> (u32, u32, u32) {
    let mut parts = version.split('.');
    let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (major, minor, patch)
}

/// `true` when `version` is at or above `floor`.
pub fn firmware_meets_floor(version: &str, floor: &str) -> bool {
    semver_triplet(version) >= semver_triplet(floor)
}

/// Classify a probed device. Callers have already confirmed
/// `Brand == "AXIS"` before invoking this (spec §4.6).
pub fn classify(props: &DeviceProperties, min_firmware: &str) -> Classification {
    let device_kind = props
        .prod_nbr
        .as_deref()
        .map(DeviceKind::from_prod_nbr)
        .unwrap_or(DeviceKind::Unknown);

    match props.version.as_deref() {
        Some(version) => Classification {
            device_kind,
            supported: firmware_meets_floor(version, min_firmware),
            firmware_known: true,
        },
        None => Classification {
            device_kind,
            supported: false,
            firmware_known: false,
        },
    }
}
