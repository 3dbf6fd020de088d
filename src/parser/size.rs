use regex::Regex;
use std::sync::OnceLock;

/// Parse a human-readable Nyaa size string ("5.1 GiB") to bytes.
///
/// Units are binary (powers of 1024), matching what Nyaa emits in its
/// `nyaa:size` element.
#[must_use]
pub fn parse_size(size_str: &str) -> Option<u64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)([\d.]+)\s*(TiB|GiB|MiB|KiB|B)").expect("Invalid regex")
    });

    let caps = re.captures(size_str.trim())?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_lowercase();

    let multiplier: f64 = match unit.as_str() {
        "b" => 1.0,
        "kib" => 1024.0,
        "mib" => 1024.0 * 1024.0,
        "gib" => 1024.0 * 1024.0 * 1024.0,
        "tib" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some((value * multiplier) as u64)
}

/// Format bytes as the largest fitting binary unit with one decimal.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;
    const TIB: u64 = GIB * 1024;

    #[allow(clippy::cast_precision_loss)]
    if bytes >= TIB {
        format!("{:.1} TiB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("5.1 GiB"), Some(5_476_083_302));
        assert_eq!(parse_size("409.1 MiB"), Some(428_972_441));
        assert_eq!(parse_size("100 KiB"), Some(102_400));
        assert_eq!(parse_size("512 B"), Some(512));
        assert_eq!(parse_size("1.2 TiB"), Some(1_319_413_953_331));
    }

    #[test]
    fn test_parse_size_case_insensitive() {
        assert_eq!(parse_size("1.5 gib"), Some(1_610_612_736));
        assert_eq!(parse_size("1.5 GIB"), Some(1_610_612_736));
    }

    #[test]
    fn test_parse_size_invalid() {
        assert_eq!(parse_size(""), None);
        assert_eq!(parse_size("unknown"), None);
    }

    #[test]
    fn test_round_trip_at_tenth_unit_precision() {
        // Values representable to 0.1-unit precision survive format -> parse.
        for bytes in [
            (1.5 * 1024.0 * 1024.0 * 1024.0) as u64,
            (2.5 * 1024.0 * 1024.0) as u64,
            (700.0 * 1024.0) as u64,
        ] {
            assert_eq!(parse_size(&format_size(bytes)), Some(bytes));
        }
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.0 KiB");
        assert_eq!(format_size(1_610_612_736), "1.5 GiB");
    }
}
