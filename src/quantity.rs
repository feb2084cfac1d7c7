const BINARY_UNITS: [(&str, f64); 6] = [
    ("Ei", 1_152_921_504_606_846_976.0),
    ("Pi", 1_125_899_906_842_624.0),
    ("Ti", 1_099_511_627_776.0),
    ("Gi", 1_073_741_824.0),
    ("Mi", 1_048_576.0),
    ("Ki", 1_024.0),
];

const DECIMAL_UNITS: [(&str, f64); 6] = [
    ("E", 1_000_000_000_000_000_000.0),
    ("P", 1_000_000_000_000_000.0),
    ("T", 1_000_000_000_000.0),
    ("G", 1_000_000_000.0),
    ("M", 1_000_000.0),
    ("K", 1_000.0),
];

pub fn parse_cpu(value: &str) -> f64 {
    let raw = value.trim();
    if raw.is_empty() {
        return 0.0;
    }

    let (number, divisor) = if let Some(number) = raw.strip_suffix('n') {
        (number, 1_000_000_000.0)
    } else if let Some(number) = raw.strip_suffix('u') {
        (number, 1_000_000.0)
    } else if let Some(number) = raw.strip_suffix('m') {
        (number, 1_000.0)
    } else {
        (raw, 1.0)
    };

    let Ok(numeric) = number.parse::<f64>() else {
        return 0.0;
    };
    let cores = numeric / divisor;
    if !cores.is_finite() || cores < 0.0 {
        return 0.0;
    }
    cores
}

pub fn parse_memory(value: &str) -> f64 {
    let raw = value.trim();
    if raw.is_empty() {
        return 0.0;
    }

    for (suffix, multiplier) in BINARY_UNITS {
        if let Some(number) = raw.strip_suffix(suffix) {
            return finite_bytes(number, multiplier);
        }
    }

    for (suffix, multiplier) in DECIMAL_UNITS {
        if let Some(number) = raw.strip_suffix(suffix) {
            return finite_bytes(number, multiplier);
        }
    }

    if let Some(number) = raw.strip_suffix('m') {
        return finite_bytes(number, 0.001);
    }

    finite_bytes(raw, 1.0)
}

fn finite_bytes(number: &str, multiplier: f64) -> f64 {
    let Ok(numeric) = number.parse::<f64>() else {
        return 0.0;
    };
    let bytes = numeric * multiplier;
    if !bytes.is_finite() || bytes < 0.0 {
        return 0.0;
    }
    bytes
}

pub fn bytes_to_mebibytes(bytes: f64) -> f64 {
    bytes / 1_048_576.0
}

pub fn format_cores(cores: f64) -> String {
    if cores >= 1.0 {
        format!("{cores:.2}c")
    } else {
        format!("{:.0}m", cores * 1_000.0)
    }
}

pub fn format_bytes(value: f64) -> String {
    if value <= 0.0 {
        return "0B".to_string();
    }

    for (suffix, unit_size) in BINARY_UNITS {
        if value >= unit_size {
            return format!("{:.1}{suffix}", value / unit_size);
        }
    }
    format!("{value:.0}B")
}

#[cfg(test)]
mod tests {
    use super::{format_bytes, format_cores, parse_cpu, parse_memory};

    #[test]
    fn cpu_suffixes_scale_to_cores() {
        assert_eq!(parse_cpu("2"), 2.0);
        assert_eq!(parse_cpu("500m"), 0.5);
        assert_eq!(parse_cpu("250000u"), 0.25);
        assert_eq!(parse_cpu("1500000000n"), 1.5);
        assert_eq!(parse_cpu(" 100m "), 0.1);
    }

    #[test]
    fn malformed_cpu_is_zero() {
        assert_eq!(parse_cpu(""), 0.0);
        assert_eq!(parse_cpu("abc"), 0.0);
        assert_eq!(parse_cpu("12x"), 0.0);
        assert_eq!(parse_cpu("-3"), 0.0);
    }

    #[test]
    fn memory_binary_and_decimal_suffixes() {
        assert_eq!(parse_memory("1Ki"), 1024.0);
        assert_eq!(parse_memory("8Gi"), 8.0 * 1_073_741_824.0);
        assert_eq!(parse_memory("1K"), 1000.0);
        assert_eq!(parse_memory("2G"), 2_000_000_000.0);
        assert_eq!(parse_memory("128974848"), 128_974_848.0);
        assert_eq!(parse_memory("1500m"), 1.5);
    }

    #[test]
    fn malformed_memory_is_zero() {
        assert_eq!(parse_memory(""), 0.0);
        assert_eq!(parse_memory("Gi"), 0.0);
        assert_eq!(parse_memory("ten"), 0.0);
        assert_eq!(parse_memory("-1Gi"), 0.0);
    }

    #[test]
    fn display_helpers() {
        assert_eq!(format_cores(1.5), "1.50c");
        assert_eq!(format_cores(0.25), "250m");
        assert_eq!(format_bytes(0.0), "0B");
        assert_eq!(format_bytes(1_073_741_824.0), "1.0Gi");
        assert_eq!(format_bytes(512.0), "512B");
    }
}
