//! Two-phase authenticated HTTP client (C3).
//!
//! Every outbound camera call is: send the body unauthenticated, and only on
//! a 401 select an auth strategy and retry with the *same* body bytes — spec
//! §4.3. Transport errors matching a small whitelist get three retries with
//! fixed back-off before surfacing.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, Method, Response, StatusCode, Url};

use crate::auth::{self, basic_header, digest, Scheme};
use crate::certstore::is_cert_mismatch;
use crate::config::RETRY_BACKOFF_SECS;
use crate::error::{ConnectorError, Result};

/// An upstream HTTP response, faithfully captured for the proxy to forward.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Internal state of the two-phase exchange (spec §9 "small state machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthPhase {
    Probing,
    RetryBasic,
    RetryDigest,
    Done,
}

/// Per-(host, nonce) `nc` counter — RFC 7616 requires it increment when a
/// client reuses a still-valid nonce across requests (spec §4.1 SUPPLEMENT).
fn nonce_counters() -> &'static Mutex<HashMap<(String, String), u32>> {
    static CELL: OnceLock<Mutex<HashMap<(String, String), u32>>> = OnceLock::new();
    CELL.get_or_init(|| Mutex::new(HashMap::new()))
}

fn next_nc(host: &str, nonce: &str) -> u32 {
    let mut map = nonce_counters().lock().expect("nonce counter mutex poisoned");
    let counter = map.entry((host.to_string(), nonce.to_string())).or_insert(0);
    *counter += 1;
    *counter
}

/// HTTPS origins try Basic first, then Digest; HTTP origins the reverse
/// (spec §4.3 rationale: HTTPS cameras widely accept Basic over the
/// encrypted channel, HTTP cameras typically challenge for Digest).
fn auth_order(scheme: &str) -> [Scheme; 2] {
    if scheme.eq_ignore_ascii_case("https") {
        [Scheme::Basic, Scheme::Digest]
    } else {
        [Scheme::Digest, Scheme::Basic]
    }
}

fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    let text = format!("{err:#}").to_lowercase();
    text.contains("no route to host") || text.contains("connection refused")
}

/// Send one request, retrying up to three times with the fixed 1s/2s/3s
/// back-off only when the failure text matches the transport whitelist
/// (spec §4.3). Certificate pin mismatches are never retried.
async fn send_with_retry(
    client: &Client,
    method: Method,
    url: &Url,
    content_type: &str,
    authorization: Option<&str>,
    body: Vec<u8>,
) -> Result<Response> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap_or(HeaderValue::from_static("application/json")));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    if let Some(auth) = authorization {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(auth).map_err(|e| ConnectorError::Parse(format!("authorization header: {e}")))?,
        );
    }

    for attempt in 0..=RETRY_BACKOFF_SECS.len() {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_secs(RETRY_BACKOFF_SECS[attempt - 1])).await;
        }

        let result = client
            .request(method.clone(), url.clone())
            .headers(headers.clone())
            .body(body.clone())
            .send()
            .await;

        match result {
            Ok(response) => return Ok(response),
            Err(err) => {
                if let Some(host) = is_cert_mismatch(&err) {
                    return Err(ConnectorError::CertMismatch { host });
                }
                let retryable = is_retryable_transport_error(&err);
                let attempts_left = attempt < RETRY_BACKOFF_SECS.len();
                if !(retryable && attempts_left) {
                    if err.is_timeout() {
                        return Err(ConnectorError::Timeout);
                    }
                    return Err(ConnectorError::Transport(err.to_string()));
                }
            }
        }
    }
    unreachable!("loop always returns Ok or Err before exhausting attempts")
}

async fn to_upstream(response: Response) -> Result<UpstreamResponse> {
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();
    let body = response.bytes().await?.to_vec();
    Ok(UpstreamResponse { status, headers, body })
}

fn www_authenticate_header(response: &Response) -> Option<String> {
    response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Run the full two-phase authenticated exchange for one `/proxy` call.
///
/// `body` is sent byte-identically on the probe and every authenticated
/// retry (spec §8 property 5) — it is cloned, never re-serialized.
pub async fn authenticated_request(
    client: &Client,
    method: Method,
    url: &Url,
    username: &str,
    password: &str,
    body: Vec<u8>,
    content_type: &str,
) -> Result<UpstreamResponse> {
    let mut phase = AuthPhase::Probing;

    let probe = send_with_retry(client, method.clone(), url, content_type, None, body.clone()).await?;
    if probe.status() != StatusCode::UNAUTHORIZED {
        return to_upstream(probe).await;
    }

    let challenge_header = www_authenticate_header(&probe)
        .ok_or_else(|| ConnectorError::ChallengeParse("401 without WWW-Authenticate".to_string()))?;
    let mut challenge = auth::parse_www_authenticate(&challenge_header)?;
    let mut prior_stale = challenge.stale;

    let host = url.host_str().unwrap_or_default().to_string();
    let order = auth_order(url.scheme());

    let mut last_response = probe;
    for (i, scheme) in order.iter().enumerate() {
        phase = match scheme {
            Scheme::Basic => AuthPhase::RetryBasic,
            Scheme::Digest => AuthPhase::RetryDigest,
        };

        let auth_header = match scheme {
            Scheme::Basic => basic_header(username, password),
            Scheme::Digest => {
                let nc = next_nc(&host, &challenge.nonce);
                digest::answer(&challenge, username, password, method.as_str(), url.path(), &body, nc).header
            }
        };

        let response = send_with_retry(client, method.clone(), url, content_type, Some(&auth_header), body.clone()).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            phase = AuthPhase::Done;
            return to_upstream(response).await;
        }

        if let Some(hdr) = www_authenticate_header(&response) {
            let next_challenge = auth::parse_www_authenticate(&hdr)?;
            if next_challenge.stale && prior_stale {
                return Err(ConnectorError::AuthStale);
            }
            prior_stale = next_challenge.stale;
            challenge = next_challenge;
        }

        last_response = response;
        if i == order.len() - 1 {
            // Every configured strategy was tried and the camera still
            // answered 401 — forward it faithfully (spec §7 "the proxy
            // faithfully reports upstream 401"; scenario S3).
            return to_upstream(last_response).await;
        }
    }

    debug_assert_eq!(phase, AuthPhase::Done);
    to_upstream(last_response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client() -> Client {
        Client::builder().build().unwrap()
    }

    #[tokio::test]
    async fn probe_returns_directly_when_not_401() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/axis-cgi/basicdeviceinfo.cgi")
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .with_body(r#"{"data":{"propertyList":{"Brand":"AXIS"}}}"#)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/axis-cgi/basicdeviceinfo.cgi", server.url())).unwrap();
        let result = authenticated_request(&client(), Method::POST, &url, "anava", "baton", b"{}".to_vec(), "application/json")
            .await
            .unwrap();

        assert_eq!(result.status, 200);
        mock.assert_async().await;
    }

    #[test]
    fn auth_order_is_protocol_dependent() {
        // mockito only serves plain HTTP, so the https ordering is covered
        // as a pure unit assertion rather than an end-to-end mock — the
        // state machine itself is exercised over HTTP by the tests below.
        assert_eq!(auth_order("https"), [Scheme::Basic, Scheme::Digest]);
        assert_eq!(auth_order("http"), [Scheme::Digest, Scheme::Basic]);
    }

    #[tokio::test]
    async fn http_origin_tries_digest_before_basic() {
        let mut server = mockito::Server::new_async().await;

        let probe_mock = server
            .mock("POST", "/axis-cgi/basicdeviceinfo.cgi")
            .match_header("authorization", Matcher::Missing)
            .with_status(401)
            .with_header("www-authenticate", r#"Digest realm="AXIS", nonce="abc", qop="auth""#)
            .create_async()
            .await;

        let digest_mock = server
            .mock("POST", "/axis-cgi/basicdeviceinfo.cgi")
            .match_header("authorization", Matcher::Regex("^Digest ".to_string()))
            .with_status(200)
            .with_body(r#"{"data":{"propertyList":{"Brand":"AXIS"}}}"#)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/axis-cgi/basicdeviceinfo.cgi", server.url())).unwrap();
        let result = authenticated_request(&client(), Method::POST, &url, "anava", "baton", b"{}".to_vec(), "application/json")
            .await
            .unwrap();

        assert_eq!(result.status, 200);
        probe_mock.assert_async().await;
        digest_mock.assert_async().await;
    }

    #[tokio::test]
    async fn body_bytes_are_identical_across_probe_and_retry() {
        let mut server = mockito::Server::new_async().await;
        let body = br#"{"apiVersion":"1.0","method":"getProperties"}"#.to_vec();

        let probe_mock = server
            .mock("POST", "/axis-cgi/basicdeviceinfo.cgi")
            .match_header("authorization", Matcher::Missing)
            .match_body(Matcher::Exact(String::from_utf8(body.clone()).unwrap()))
            .with_status(401)
            .with_header("www-authenticate", r#"Digest realm="AXIS", nonce="n1", qop="auth""#)
            .create_async()
            .await;

        let retry_mock = server
            .mock("POST", "/axis-cgi/basicdeviceinfo.cgi")
            .match_header("authorization", Matcher::Regex("^Digest ".to_string()))
            .match_body(Matcher::Exact(String::from_utf8(body.clone()).unwrap()))
            .with_status(200)
            .with_body(r#"{"data":{"propertyList":{"Brand":"AXIS"}}}"#)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/axis-cgi/basicdeviceinfo.cgi", server.url())).unwrap();
        let result = authenticated_request(&client(), Method::POST, &url, "anava", "baton", body, "application/json")
            .await
            .unwrap();

        assert_eq!(result.status, 200);
        probe_mock.assert_async().await;
        retry_mock.assert_async().await;
    }

    #[tokio::test]
    async fn two_consecutive_stale_challenges_yield_auth_stale() {
        let mut server = mockito::Server::new_async().await;

        let probe_mock = server
            .mock("POST", "/x")
            .match_header("authorization", Matcher::Missing)
            .with_status(401)
            .with_header("www-authenticate", r#"Digest realm="AXIS", nonce="n1", qop="auth", stale=true"#)
            .create_async()
            .await;

        let retry_mock = server
            .mock("POST", "/x")
            .match_header("authorization", Matcher::Regex("^Digest ".to_string()))
            .with_status(401)
            .with_header("www-authenticate", r#"Digest realm="AXIS", nonce="n2", qop="auth", stale=true"#)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/x", server.url())).unwrap();
        let err = authenticated_request(&client(), Method::POST, &url, "u", "p", b"{}".to_vec(), "application/json")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "auth-stale");
        probe_mock.assert_async().await;
        retry_mock.assert_async().await;
    }

    #[tokio::test]
    async fn exhausting_both_strategies_forwards_401_faithfully() {
        let mut server = mockito::Server::new_async().await;

        let probe_mock = server
            .mock("POST", "/x")
            .match_header("authorization", Matcher::Missing)
            .with_status(401)
            .with_header("www-authenticate", r#"Digest realm="AXIS", nonce="n1", qop="auth""#)
            .create_async()
            .await;

        let digest_mock = server
            .mock("POST", "/x")
            .match_header("authorization", Matcher::Regex("^Digest ".to_string()))
            .with_status(401)
            .with_header("www-authenticate", r#"Digest realm="AXIS", nonce="n2", qop="auth""#)
            .create_async()
            .await;

        let basic_mock = server
            .mock("POST", "/x")
            .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
            .with_status(401)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/x", server.url())).unwrap();
        let result = authenticated_request(&client(), Method::POST, &url, "u", "wrong", b"{}".to_vec(), "application/json")
            .await
            .unwrap();

        assert_eq!(result.status, 401);
        probe_mock.assert_async().await;
        digest_mock.assert_async().await;
        basic_mock.assert_async().await;
    }
}
