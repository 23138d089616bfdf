//! IPv4 arithmetic used to turn a seed address into scan candidates.

use std::cmp::Ordering;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// A bare host label, optionally `.local`-suffixed (mDNS).
static HOSTNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.local)?$")
        .expect("hostname pattern is valid")
});

/// Largest candidate list a scan may expand to: one /16.
pub const MAX_SCAN_HOSTS: u32 = 65_534;

/// Parse a dotted-quad address into its 32-bit value.
pub fn ip_to_int(ip: &str) -> Result<u32> {
    ip.parse::<Ipv4Addr>()
        .map(u32::from)
        .map_err(|_| Error::InvalidAddress(ip.to_string()))
}

pub fn int_to_ip(value: u32) -> String {
    Ipv4Addr::from(value).to_string()
}

/// Strict dotted-quad check: four octets, each 0--255.
pub fn is_ip_literal(s: &str) -> bool {
    s.parse::<Ipv4Addr>().is_ok()
}

/// Whether `s` names a single host by label, e.g. `bitaxe` or
/// `bitaxe-gamma.local`.
pub fn is_hostname(s: &str) -> bool {
    !is_ip_literal(s) && HOSTNAME.is_match(s)
}

/// Whether `s` is acceptable as a manually added peer.
pub fn is_valid_peer(s: &str) -> bool {
    is_ip_literal(s) || is_hostname(s)
}

/// Usable host range of the network containing `ip`.
///
/// Returns the first and last host (network + 1, broadcast - 1). For
/// networks with no usable hosts (/31, /32) the returned start is greater
/// than the end.
pub fn range(ip: &str, netmask: &str) -> Result<(u32, u32)> {
    let ip = ip_to_int(ip)?;
    let mask = parse_mask(netmask)?;

    let network = ip & mask;
    let broadcast = network | !mask;
    Ok((network.saturating_add(1), broadcast.saturating_sub(1)))
}

/// Number of usable hosts in any network with this mask.
pub fn host_count(netmask: &str) -> Result<u32> {
    Ok((!parse_mask(netmask)?).saturating_sub(1))
}

fn parse_mask(netmask: &str) -> Result<u32> {
    let mask = ip_to_int(netmask)?;
    if mask.leading_ones() + mask.trailing_zeros() != 32 {
        return Err(Error::InvalidAddress(int_to_ip(mask)));
    }
    Ok(mask)
}

/// Every usable host address of the network containing `ip`.
///
/// Networks wider than [`MAX_SCAN_HOSTS`] are refused rather than
/// expanded.
pub fn hosts(ip: &str, netmask: &str) -> Result<Vec<String>> {
    let (start, end) = range(ip, netmask)?;
    if start > end {
        return Ok(Vec::new());
    }
    let count = end - start + 1;
    if count > MAX_SCAN_HOSTS {
        return Err(Error::ScanTarget(format!(
            "{netmask} spans {count} hosts, more than {MAX_SCAN_HOSTS}"
        )));
    }
    Ok((start..=end).map(int_to_ip).collect())
}

/// Order two device addresses: IP literals numerically and before any
/// hostname, hostnames naturally among themselves.
pub fn compare_addresses(a: &str, b: &str) -> Ordering {
    match (a.parse::<Ipv4Addr>(), b.parse::<Ipv4Addr>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => natural_cmp(a, b),
    }
}

/// Case-insensitive comparison that orders embedded digit runs by value,
/// so `"bitaxe-9"` sorts before `"bitaxe-10"`.
///
/// Strings that compare equal this way fall back to plain byte order,
/// keeping the ordering total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_cmp_folded(a, b).then_with(|| a.cmp(b))
}

fn natural_cmp_folded(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        let (l, r) = match (left.peek(), right.peek()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(&l), Some(&r)) => (l, r),
        };

        let ord = if l.is_ascii_digit() && r.is_ascii_digit() {
            compare_digit_runs(&take_digits(&mut left), &take_digits(&mut right))
        } else {
            left.next();
            right.next();
            l.to_lowercase().cmp(r.to_lowercase())
        };

        if ord != Ordering::Equal {
            return ord;
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        run.push(c);
    }
    run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
