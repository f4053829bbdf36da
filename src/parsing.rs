use std::fmt;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::Serialize;

pub fn parse_cpu_to_millicores(q: &str) -> Option<i64> {
    let q = q.trim();
    if q.is_empty() {
        return None;
    }
    if let Some(stripped) = q.strip_suffix('n') {
        if let Ok(nanos) = stripped.parse::<i128>() {
            return Some((nanos / 1_000_000) as i64);
        }
    } else if let Some(stripped) = q.strip_suffix('u') {
        if let Ok(micros) = stripped.parse::<i128>() {
            return Some((micros / 1_000) as i64);
        }
    } else if let Some(stripped) = q.strip_suffix('m') {
        if let Ok(mc) = stripped.parse::<i64>() {
            return Some(mc);
        }
    } else if let Ok(cores) = q.parse::<f64>() {
        return Some((cores * 1000.0).round() as i64);
    }
    None
}

pub fn parse_memory_to_bytes(q: &str) -> Option<i64> {
    let q = q.trim();
    if q.is_empty() {
        return None;
    }

    // Binary suffixes (Ki, Mi, ...) before decimal ones (K, M, ...)
    const BINARY_UNITS: &[(&str, i64)] = &[
        ("Ki", 1024),
        ("Mi", 1024 * 1024),
        ("Gi", 1024 * 1024 * 1024),
        ("Ti", 1024_i64.pow(4)),
        ("Pi", 1024_i64.pow(5)),
        ("Ei", 1024_i64.pow(6)),
    ];
    const DECIMAL_UNITS: &[(&str, i64)] = &[
        ("K", 1000),
        ("M", 1000 * 1000),
        ("G", 1000 * 1000 * 1000),
        ("T", 1000_i64.pow(4)),
        ("P", 1000_i64.pow(5)),
        ("E", 1000_i64.pow(6)),
        ("k", 1000),
    ];

    for (suf, mul) in BINARY_UNITS.iter().chain(DECIMAL_UNITS) {
        if let Some(stripped) = q.strip_suffix(suf) {
            if let Ok(v) = stripped.parse::<f64>() {
                return Some((v * (*mul as f64)).round() as i64);
            }
        }
    }
    // Millibytes show up in VPA recommendations now and then
    if let Some(stripped) = q.strip_suffix('m') {
        if let Ok(v) = stripped.parse::<i64>() {
            return Some(v / 1000);
        }
    }
    q.parse::<i64>().ok()
}

/// Parse a quantity for the named resource into a comparable integer.
/// CPU is measured in millicores, everything else in bytes.
pub fn parse_quantity(resource: &str, q: &Quantity) -> Option<i64> {
    match resource {
        "cpu" => parse_cpu_to_millicores(&q.0),
        _ => parse_memory_to_bytes(&q.0),
    }
}

/// How a current request or limit compares with a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    NotSet,
    Equal,
    LessThan,
    GreaterThan,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::NotSet => "not-set",
            Verdict::Equal => "equal",
            Verdict::LessThan => "less-than",
            Verdict::GreaterThan => "greater-than",
        };
        f.write_str(s)
    }
}

/// Compare against a single recommended value.
pub fn compare_to_target(resource: &str, existing: Option<&Quantity>, target: &Quantity) -> Option<Verdict> {
    let existing = match existing.and_then(|q| parse_quantity(resource, q)) {
        Some(v) if v != 0 => v,
        _ => return Some(Verdict::NotSet),
    };
    let target = parse_quantity(resource, target)?;
    Some(match existing.cmp(&target) {
        std::cmp::Ordering::Less => Verdict::LessThan,
        std::cmp::Ordering::Equal => Verdict::Equal,
        std::cmp::Ordering::Greater => Verdict::GreaterThan,
    })
}

/// Compare against the recommended [lower, upper] range; inside counts as equal.
pub fn compare_to_range(
    resource: &str,
    existing: Option<&Quantity>,
    lower: &Quantity,
    upper: &Quantity,
) -> Option<Verdict> {
    let existing = match existing.and_then(|q| parse_quantity(resource, q)) {
        Some(v) if v != 0 => v,
        _ => return Some(Verdict::NotSet),
    };
    let lower = parse_quantity(resource, lower)?;
    let upper = parse_quantity(resource, upper)?;
    if existing < lower {
        Some(Verdict::LessThan)
    } else if existing > upper {
        Some(Verdict::GreaterThan)
    } else {
        Some(Verdict::Equal)
    }
}
