//! Integer parsing of Kubernetes resource quantities
//!
//! Extended resources are whole units, so only integer-valued quantities
//! are accepted. Kubernetes may still serialize a large count with a
//! suffix (`1k`, `2Ki`), which is expanded here.

/// Why a quantity string was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,
    #[error("quantity {0:?} is not a non-negative integer")]
    NotAnInteger(String),
    #[error("quantity {0:?} has an unsupported suffix")]
    UnsupportedSuffix(String),
    #[error("quantity {0:?} overflows")]
    Overflow(String),
}

/// Parse a quantity such as `4`, `+2`, `1k` or `2Ki` into a whole count
pub fn parse_quantity(raw: &str) -> Result<u64, QuantityError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(QuantityError::Empty);
    }

    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let split = unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unsigned.len());
    let (digits, suffix) = unsigned.split_at(split);

    if digits.is_empty() {
        return Err(QuantityError::NotAnInteger(raw.to_string()));
    }

    let multiplier = match suffix {
        "" => 1,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "E" => 1_000_000_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        "Ei" => 1 << 60,
        s if s.starts_with('.') || s.starts_with('e') || s.starts_with('E') => {
            return Err(QuantityError::NotAnInteger(raw.to_string()))
        }
        _ => return Err(QuantityError::UnsupportedSuffix(raw.to_string())),
    };

    let base: u64 = digits
        .parse()
        .map_err(|_| QuantityError::Overflow(raw.to_string()))?;

    base.checked_mul(multiplier)
        .ok_or_else(|| QuantityError::Overflow(raw.to_string()))
}
