//! CIDR parsing and expansion (C6).

use std::net::Ipv4Addr;

use crate::error::{ConnectorError, Result};

/// Parse a CIDR string into `(network, mask, scannable hosts)`.
///
/// An optional `/suffix` segment after the mask is tolerated and ignored
/// (spec §4.6). Mask 31 and 32 both yield zero scannable hosts — this crate
/// does not treat /31 as an RFC 3021 point-to-point link, an Open Question
/// recorded as a decision in DESIGN.md rather than guessed.
pub fn expand_cidr(input: &str) -> Result<(Ipv4Addr, u8, Vec<Ipv4Addr>)> {
    let mut parts = input.splitn(3, '/');
    let base_str = parts
        .next()
        .ok_or_else(|| ConnectorError::InvalidCidr(input.to_string()))?;
    let mask_str = parts
        .next()
        .ok_or_else(|| ConnectorError::InvalidCidr(format!("{input}: missing mask")))?;

    let base: Ipv4Addr = base_str
        .parse()
        .map_err(|_| ConnectorError::InvalidCidr(format!("{input}: bad base address")))?;
    let mask: u8 = mask_str
        .parse()
        .map_err(|_| ConnectorError::InvalidCidr(format!("{input}: bad mask")))?;
    if mask > 32 {
        return Err(ConnectorError::InvalidCidr(format!("{input}: mask out of range")));
    }

    let mask_bits: u32 = if mask == 0 { 0 } else { u32::MAX << (32 - mask) };
    let base_bits = u32::from(base);
    let network = base_bits & mask_bits;
    let broadcast = network | !mask_bits;

    let ips = if mask >= 31 {
        Vec::new()
    } else {
        ((network + 1)..broadcast).map(Ipv4Addr::from).collect()
    };

    Ok((Ipv4Addr::from(network), mask, ips))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_slash_24_to_254_hosts() {
        let (network, mask, ips) = expand_cidr("192.168.50.0/24").unwrap();
        assert_eq!(network, Ipv4Addr::new(192, 168, 50, 0));
        assert_eq!(mask, 24);
        assert_eq!(ips.len(), 254);
        assert_eq!(ips.first(), Some(&Ipv4Addr::new(192, 168, 50, 1)));
        assert_eq!(ips.last(), Some(&Ipv4Addr::new(192, 168, 50, 254)));
    }

    #[test]
    fn mask_32_yields_zero_hosts() {
        let (_, _, ips) = expand_cidr("10.0.0.5/32").unwrap();
        assert!(ips.is_empty());
    }

    #[test]
    fn mask_31_yields_zero_hosts() {
        let (_, _, ips) = expand_cidr("10.0.0.4/31").unwrap();
        assert!(ips.is_empty());
    }

    #[test]
    fn ignores_trailing_suffix_segment() {
        let (_, mask, ips) = expand_cidr("192.168.1.0/24/ignored").unwrap();
        assert_eq!(mask, 24);
        assert_eq!(ips.len(), 254);
    }

    #[test]
    fn rejects_unparsable_base() {
        let err = expand_cidr("not-an-ip/24").unwrap_err();
        assert_eq!(err.kind(), "invalid-cidr");
    }

    #[test]
    fn rejects_mask_out_of_range() {
        let err = expand_cidr("10.0.0.0/33").unwrap_err();
        assert_eq!(err.kind(), "invalid-cidr");
    }

    #[test]
    fn rejects_missing_mask() {
        let err = expand_cidr("10.0.0.0").unwrap_err();
        assert_eq!(err.kind(), "invalid-cidr");
    }
}
