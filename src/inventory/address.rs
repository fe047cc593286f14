//! Host address parsing and hostname range expansion.
//!
//! `parse_address` recognises hostnames, IPv4 and IPv6 literals, optionally
//! bracketed and followed by a port. When ranges are allowed, any component
//! may carry a `[beg:end]` or `[beg:end:step]` range that
//! [`expand_hostname_range`] turns into concrete names.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

const RANGE: &str = r"\[[a-zA-Z0-9]*:[a-zA-Z0-9]+(?::[0-9]+)?\]";

struct AddressPatterns {
    bracketed: Regex,
    ipv4: Regex,
    hostname: Regex,
    ipv6: Regex,
}

impl AddressPatterns {
    fn build(allow_ranges: bool) -> Self {
        let range = if allow_ranges {
            format!("|{RANGE}")
        } else {
            String::new()
        };
        let octet = format!(r"(?:[0-9]{{1,3}}{range})");
        let ipv4 = format!(r"{octet}(?:\.{octet}){{3}}");
        let label = format!(r"(?:[a-zA-Z0-9_-]{range})+");
        let hostname = format!(r"{label}(?:\.{label})*\.?");
        let hex = format!(r"(?:[0-9a-fA-F]{{1,4}}{range})");
        let ipv6 = format!(r"(?:{hex}?:){{2,7}}(?:{hex}|{ipv4})?");

        let compile = |src: String| Regex::new(&src).expect("address grammar is a valid regex");
        Self {
            bracketed: compile(r"^\[(.+)\](?::([0-9]+))?$".to_string()),
            ipv4: compile(format!(r"^({ipv4})(?::([0-9]+))?$")),
            hostname: compile(format!(r"^({hostname})(?::([0-9]+))?$")),
            ipv6: compile(format!(r"^({ipv6})$")),
        }
    }
}

static WITH_RANGES: Lazy<AddressPatterns> = Lazy::new(|| AddressPatterns::build(true));
static WITHOUT_RANGES: Lazy<AddressPatterns> = Lazy::new(|| AddressPatterns::build(false));
static RANGE_PART: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.*?)\[([a-zA-Z0-9]*):([a-zA-Z0-9]+)(?::([0-9]+))?\](.*)$")
        .expect("range grammar is a valid regex")
});

fn parse_port(address: &str, port: Option<regex::Match<'_>>) -> Result<Option<u16>> {
    match port {
        Some(m) => m
            .as_str()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| Error::parse(address, "port is out of range")),
        None => Ok(None),
    }
}

/// Split an address into host and optional port.
///
/// Returns a parse error when the text is none of: a hostname, an IPv4
/// address, an IPv6 address, or one of those in brackets.
pub fn parse_address(address: &str, allow_ranges: bool) -> Result<(String, Option<u16>)> {
    let patterns: &AddressPatterns = if allow_ranges {
        &WITH_RANGES
    } else {
        &WITHOUT_RANGES
    };

    if let Some(caps) = patterns.bracketed.captures(address) {
        let inner = &caps[1];
        let valid = patterns.ipv4.is_match(inner)
            || patterns.ipv6.is_match(inner)
            || patterns.hostname.is_match(inner);
        if !valid {
            return Err(Error::parse(address, "not a valid network hostname"));
        }
        return Ok((inner.to_string(), parse_port(address, caps.get(2))?));
    }

    for re in [&patterns.ipv4, &patterns.hostname] {
        if let Some(caps) = re.captures(address) {
            return Ok((caps[1].to_string(), parse_port(address, caps.get(2))?));
        }
    }

    if patterns.ipv6.is_match(address) {
        return Ok((address.to_string(), None));
    }

    Err(Error::parse(address, "not a valid network hostname"))
}

/// Whether the name contains a `[beg:end]` range.
pub fn detect_range(name: &str) -> bool {
    RANGE_PART.is_match(name)
}

/// Expand every range in a host name, leftmost range varying slowest.
///
/// Numeric bounds with a leading zero keep their width (`web[01:03]`),
/// single letters expand alphabetically (`db-[a:c]`), and an optional
/// third field sets the stride.
pub fn expand_hostname_range(name: &str) -> Result<Vec<String>> {
    let Some(caps) = RANGE_PART.captures(name) else {
        return Ok(vec![name.to_string()]);
    };
    let head = &caps[1];
    let beg = &caps[2];
    let end = &caps[3];
    let tail = &caps[5];
    let step: usize = match caps.get(4) {
        Some(m) => m
            .as_str()
            .parse()
            .map_err(|_| Error::parse(name, "invalid range step"))?,
        None => 1,
    };
    if step == 0 {
        return Err(Error::parse(name, "range step must be positive"));
    }

    let beg = if beg.is_empty() { "0" } else { beg };
    let sequence: Vec<String> = if beg.chars().all(|c| c.is_ascii_digit())
        && end.chars().all(|c| c.is_ascii_digit())
    {
        let width = if beg.len() > 1 && beg.starts_with('0') {
            if beg.len() != end.len() {
                return Err(Error::parse(
                    name,
                    "host range must specify equal-length begin and end formats",
                ));
            }
            beg.len()
        } else {
            0
        };
        let start: u64 = beg
            .parse()
            .map_err(|_| Error::parse(name, "invalid range start"))?;
        let stop: u64 = end
            .parse()
            .map_err(|_| Error::parse(name, "invalid range end"))?;
        if start > stop {
            return Err(Error::parse(name, "host range start is after its end"));
        }
        (start..=stop)
            .step_by(step)
            .map(|n| format!("{n:0width$}"))
            .collect()
    } else if beg.len() == 1 && end.len() == 1 {
        let (start, stop) = (beg.as_bytes()[0], end.as_bytes()[0]);
        if !start.is_ascii_alphabetic() || !stop.is_ascii_alphabetic() || start > stop {
            return Err(Error::parse(name, "host range must be numeric or alphabetic"));
        }
        (start..=stop)
            .step_by(step)
            .map(|c| (c as char).to_string())
            .collect()
    } else {
        return Err(Error::parse(name, "host range must be numeric or alphabetic"));
    };

    let mut expanded = Vec::new();
    for value in sequence {
        for rest in expand_hostname_range(tail)? {
            expanded.push(format!("{head}{value}{rest}"));
        }
    }
    Ok(expanded)
}
