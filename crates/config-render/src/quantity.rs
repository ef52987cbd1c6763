//! Kubernetes resource quantities
//!
//! Just enough of the quantity grammar to turn sizes such as `10G`, `512Mi`
//! or `1e3` into byte counts.

use crate::error::RenderError;

/// Parse a quantity into a whole number of bytes (rounded up)
pub fn parse_quantity(input: &str) -> Result<i64, RenderError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(RenderError::InvalidQuantity(input.to_string()));
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| RenderError::InvalidQuantity(input.to_string()))?;

    let multiplier = match suffix {
        "" => 1.0,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0_f64.powi(2),
        "Gi" => 1024.0_f64.powi(3),
        "Ti" => 1024.0_f64.powi(4),
        "Pi" => 1024.0_f64.powi(5),
        "Ei" => 1024.0_f64.powi(6),
        exp if exp.starts_with(['e', 'E']) => {
            let power: i32 = exp[1..]
                .parse()
                .map_err(|_| RenderError::InvalidQuantity(input.to_string()))?;
            10f64.powi(power)
        }
        _ => return Err(RenderError::InvalidQuantity(input.to_string())),
    };

    let bytes = (value * multiplier).ceil();
    if !bytes.is_finite() || bytes.abs() > i64::MAX as f64 {
        return Err(RenderError::InvalidQuantity(input.to_string()));
    }
    #[allow(clippy::cast_possible_truncation)]
    Ok(bytes as i64)
}

/// True when the quantity is unset or parses to zero
pub fn is_zero_quantity(input: Option<&str>) -> bool {
    match input {
        None => true,
        Some(q) => matches!(parse_quantity(q), Ok(0)),
    }
}
