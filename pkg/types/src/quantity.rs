//! Resource quantity notation: `500m`, `2`, `1.5`, `8Gi`, `512Mi`, `3k`.
//!
//! Values are parsed into milli-units so both CPU (millicores) and memory
//! (bytes) share one parser. Fractions that do not land on a whole milli-unit
//! round away from zero.

use anyhow::{Result, bail};

/// Parse a quantity into milli-units (`"2"` → 2000, `"250m"` → 250, `"1Ki"` → 1_024_000).
pub fn parse_milli(input: &str) -> Result<i128> {
    let s = input.trim();
    if s.is_empty() {
        bail!("quantity must not be empty");
    }

    let (negative, body) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let split = body
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(body.len());
    let (number, suffix) = body.split_at(split);
    if number.is_empty() || number == "." {
        bail!("quantity '{}' has no numeric part", input);
    }

    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number, ""),
    };
    if frac_part.contains('.') {
        bail!("quantity '{}' has more than one decimal point", input);
    }
    if frac_part.len() > 18 {
        bail!("quantity '{}' has too many fractional digits", input);
    }

    let (mult_num, mult_den) = suffix_multiplier(suffix)
        .ok_or_else(|| anyhow::anyhow!("quantity '{}' has unknown suffix '{}'", input, suffix))?;

    let digits = format!("{}{}", int_part, frac_part);
    let mantissa: i128 = if digits.is_empty() {
        0
    } else {
        digits
            .parse()
            .map_err(|_| anyhow::anyhow!("quantity '{}' is out of range", input))?
    };
    let scale = 10i128.pow(frac_part.len() as u32);

    // milli = mantissa / scale * mult * 1000, rounded away from zero.
    let numerator = mantissa
        .checked_mul(mult_num)
        .and_then(|v| v.checked_mul(1000))
        .ok_or_else(|| anyhow::anyhow!("quantity '{}' is out of range", input))?;
    let denominator = scale * mult_den;
    let milli = (numerator + denominator - 1) / denominator;

    Ok(if negative { -milli } else { milli })
}

/// Parse a CPU quantity into millicores.
pub fn parse_cpu_millis(input: &str) -> Result<i64> {
    let milli = parse_milli(input)?;
    i64::try_from(milli).map_err(|_| anyhow::anyhow!("cpu quantity '{}' is out of range", input))
}

/// Parse a memory quantity into bytes. Sub-byte remainders round up.
pub fn parse_memory_bytes(input: &str) -> Result<i64> {
    let milli = parse_milli(input)?;
    let bytes = if milli >= 0 {
        (milli + 999) / 1000
    } else {
        -((-milli + 999) / 1000)
    };
    i64::try_from(bytes)
        .map_err(|_| anyhow::anyhow!("memory quantity '{}' is out of range", input))
}

/// Render millicores. Whole cores still use the `m` form so values line up in status output.
pub fn format_cpu_millis(millis: i64) -> String {
    if millis == 0 {
        return "0".to_string();
    }
    format!("{}m", millis)
}

/// Render bytes with the largest binary suffix that divides them exactly.
pub fn format_memory_bytes(bytes: i64) -> String {
    if bytes == 0 {
        return "0".to_string();
    }
    const SUFFIXES: [(&str, i64); 6] = [
        ("Ei", 1 << 60),
        ("Pi", 1 << 50),
        ("Ti", 1 << 40),
        ("Gi", 1 << 30),
        ("Mi", 1 << 20),
        ("Ki", 1 << 10),
    ];
    for (suffix, unit) in SUFFIXES {
        if bytes % unit == 0 {
            return format!("{}{}", bytes / unit, suffix);
        }
    }
    bytes.to_string()
}

fn suffix_multiplier(suffix: &str) -> Option<(i128, i128)> {
    let m = match suffix {
        "" => (1, 1),
        "m" => (1, 1000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        _ => return None,
    };
    Some(m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cpu_forms() {
        assert_eq!(parse_cpu_millis("8000m").unwrap(), 8000);
        assert_eq!(parse_cpu_millis("2").unwrap(), 2000);
        assert_eq!(parse_cpu_millis("1.5").unwrap(), 1500);
        assert_eq!(parse_cpu_millis("0.0001").unwrap(), 1);
        assert_eq!(parse_cpu_millis("-2000m").unwrap(), -2000);
    }

    #[test]
    fn memory_forms() {
        assert_eq!(parse_memory_bytes("8192Mi").unwrap(), 8 << 30);
        assert_eq!(parse_memory_bytes("4Gi").unwrap(), 4 << 30);
        assert_eq!(parse_memory_bytes("1k").unwrap(), 1000);
        assert_eq!(parse_memory_bytes("1.5Ki").unwrap(), 1536);
        assert_eq!(parse_memory_bytes("1500m").unwrap(), 2);
        assert_eq!(parse_memory_bytes("-2048Mi").unwrap(), -(2 << 30));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_milli("").is_err());
        assert!(parse_milli("Gi").is_err());
        assert!(parse_milli("1.2.3").is_err());
        assert!(parse_milli("12Xi").is_err());
        assert!(parse_milli("abc").is_err());
    }

    #[test]
    fn formatting() {
        assert_eq!(format_cpu_millis(3000), "3000m");
        assert_eq!(format_cpu_millis(0), "0");
        assert_eq!(format_memory_bytes(8 << 30), "8Gi");
        assert_eq!(format_memory_bytes(6144 << 20), "6Gi");
        assert_eq!(format_memory_bytes(5_583_457_484), "5583457484");
        assert_eq!(format_memory_bytes(-(2 << 20)), "-2Mi");
    }

    proptest! {
        #[test]
        fn formatted_values_parse_back(cpu in -1_000_000_000i64..1_000_000_000, mem in -(1i64 << 50)..(1i64 << 50)) {
            prop_assert_eq!(parse_cpu_millis(&format_cpu_millis(cpu)).unwrap(), cpu);
            prop_assert_eq!(parse_memory_bytes(&format_memory_bytes(mem)).unwrap(), mem);
        }
    }
}
