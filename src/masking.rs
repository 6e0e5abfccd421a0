//! Privacy masking for client addresses
//!
//! IPv4 addresses keep their first two octets and lose the rest
//! (`192.168.1.20` becomes `192.168.xxx.xxx`). Anything else, IPv6 and
//! malformed input included, is stored as given.
//!
//! Matching counts digits rather than validating octet ranges, so
//! `999.1.1.1` is still masked.

use regex::Regex;
use std::sync::LazyLock;

/// Stored form of a masked IPv4 address. Shared with the storage backends,
/// which count matching rows in SQL.
pub const MASKED_IPV4_PATTERN: &str = r"^[0-9]+\.[0-9]+\.xxx\.xxx$";

/// ASCII digits only, so Unicode decimal digits such as `١.٢.٣.٤` pass through unmasked.
const IPV4_PATTERN: &str = r"^[0-9]{1,3}(\.[0-9]{1,3}){3}$";

const MASK_SUFFIX: &str = ".xxx.xxx";

static IPV4: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(IPV4_PATTERN).expect("IPv4 pattern is valid"));

static MASKED_IPV4: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(MASKED_IPV4_PATTERN).expect("masked IPv4 pattern is valid"));

/// Mask a dotted-quad IPv4 address down to its first two groups.
///
/// Input is matched as-is: surrounding whitespace is not trimmed and will
/// prevent a match.
pub fn mask_ip(ip: &str) -> String {
    if !IPV4.is_match(ip) {
        return ip.to_string();
    }

    let mut groups = ip.split('.');
    match (groups.next(), groups.next()) {
        (Some(first), Some(second)) => format!("{first}.{second}{MASK_SUFFIX}"),
        _ => ip.to_string(),
    }
}

/// Whether `ip` is already in masked IPv4 form
pub fn is_masked_ipv4(ip: &str) -> bool {
    MASKED_IPV4.is_match(ip)
}
