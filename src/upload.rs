//! Upload pipeline (C4): manual multipart construction for ACAP packages
//! and signed license XML.
//!
//! Built as explicit `Vec<u8>` assembly rather than `reqwest::multipart`
//! because the wire format must be byte-reproducible for a given
//! `(boundary, filename, bytes)` (spec §8) — a guarantee an opaque builder
//! doesn't make across versions.

use rand::RngCore;
use reqwest::{Method, Url};

use crate::error::Result;
use crate::http_client::{authenticated_request, UpstreamResponse};

/// A random ≥16 hex char multipart boundary from the CSPRNG (spec §4.4).
fn random_boundary() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Assemble a single-part `multipart/form-data` body with CRLF line endings
/// and a trailing `--boundary--\r\n` terminator.
fn build_multipart_body(boundary: &str, field_name: &str, filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field_name}\"; filename=\"{filename}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

/// Buffer the `.eap` source fully (cameras reject partial bodies mid-install,
/// spec §4.4), then POST it via the upload client.
pub async fn upload_acap(
    standard_client: &reqwest::Client,
    upload_client: &reqwest::Client,
    target_url: &Url,
    username: &str,
    password: &str,
    acap_source_url: &Url,
) -> Result<UpstreamResponse> {
    let source = authenticated_request(
        standard_client,
        Method::GET,
        acap_source_url,
        username,
        password,
        Vec::new(),
        "application/octet-stream",
    )
    .await?;

    let boundary = random_boundary();
    let body = build_multipart_body(&boundary, "fileData", "package.eap", "application/octet-stream", &source.body);
    let content_type = format!("multipart/form-data; boundary={boundary}");

    authenticated_request(upload_client, Method::POST, target_url, username, password, body, &content_type).await
}

/// POST already-signed license XML as a multipart upload (spec §4.4). The
/// XML payload is carried verbatim (UTF-8, no BOM) — no transformation.
pub async fn upload_license(
    upload_client: &reqwest::Client,
    target_url: &Url,
    username: &str,
    password: &str,
    license_xml: &str,
) -> Result<UpstreamResponse> {
    let boundary = random_boundary();
    let body = build_multipart_body(&boundary, "fileData", "license.xml", "text/xml", license_xml.as_bytes());
    let content_type = format!("multipart/form-data; boundary={boundary}");

    authenticated_request(upload_client, Method::POST, target_url, username, password, body, &content_type).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_is_at_least_sixteen_hex_chars() {
        let b = random_boundary();
        assert!(b.len() >= 16);
        assert!(b.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn multipart_body_is_byte_reproducible() {
        let a = build_multipart_body("BOUND123", "fileData", "license.xml", "text/xml", b"<x/>");
        let b = build_multipart_body("BOUND123", "fileData", "license.xml", "text/xml", b"<x/>");
        assert_eq!(a, b);
    }

    #[test]
    fn multipart_body_uses_crlf_and_trailing_terminator() {
        let body = build_multipart_body("BOUND123", "fileData", "license.xml", "text/xml", b"<x/>");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--BOUND123\r\n"));
        assert!(text.ends_with("--BOUND123--\r\n"));
        assert!(text.contains("Content-Type: text/xml\r\n\r\n"));
        assert!(text.matches("\r\n").count() > 0);
    }

    #[test]
    fn acap_part_names_and_content_type_match_spec() {
        let body = build_multipart_body("B", "fileData", "package.eap", "application/octet-stream", b"\x00\x01");
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("name=\"fileData\""));
        assert!(text.contains("filename=\"package.eap\""));
        assert!(text.contains("Content-Type: application/octet-stream"));
    }
}
