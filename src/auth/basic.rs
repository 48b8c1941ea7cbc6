//! HTTP Basic authentication (spec §4.1).

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// `Authorization: Basic base64(user:pass)`.
pub fn basic_header(username: &str, password: &str) -> String {
    let raw = format!("{username}:{password}");
    format!("Basic {}", STANDARD.encode(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_known_vector() {
        assert_eq!(basic_header("anava", "baton"), "Basic YW5hdmE6YmF0b24=");
    }
}
