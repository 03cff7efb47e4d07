use thiserror::Error;

/// Money is held as integer cents: 1 currency unit = 100 cents, so 40.00 = 4000.
pub type Cents = i64;

/// Wider integer for sums across many accounts.
pub type WideCents = i128;

/// Format cents as a two-decimal string.
/// Example: 4000 -> "40.00", -1234 -> "-12.34"
pub fn format_cents(cents: Cents) -> String {
    format_wide_cents(cents.into())
}

/// Formats ledger-wide sums, which can exceed the range of a single balance.
pub fn format_wide_cents(cents: WideCents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseCentsError {
    #[error("amount is empty")]
    Empty,

    #[error("'{0}' is not a decimal amount")]
    InvalidFormat(String),

    #[error("'{0}' has more than two decimal places")]
    TooPrecise(String),

    #[error("'{0}' is too large")]
    Overflow(String),
}

/// Parse a decimal string into cents.
///
/// Accepts an optional leading sign, whole units and up to two decimal places
/// ("40", "40.5", "40.50", ".75", "-3.10"). Sub-cent precision is rejected
/// rather than truncated so a caller never moves a different amount than the
/// one they typed. The sign is kept: rejecting non-positive amounts is the
/// ledger's call, not the parser's.
pub fn parse_cents(input: &str) -> Result<Cents, ParseCentsError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ParseCentsError::Empty);
    }

    let invalid = || ParseCentsError::InvalidFormat(trimmed.to_string());

    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let (units_str, fraction_str) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if units_str.is_empty() && fraction_str.is_empty() {
        return Err(invalid());
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(units_str) || !all_digits(fraction_str) {
        return Err(invalid());
    }
    if fraction_str.len() > 2 {
        return Err(ParseCentsError::TooPrecise(trimmed.to_string()));
    }

    let overflow = || ParseCentsError::Overflow(trimmed.to_string());
    let units: i64 = if units_str.is_empty() {
        0
    } else {
        units_str.parse().map_err(|_| overflow())?
    };
    let fraction: i64 = match fraction_str.len() {
        0 => 0,
        1 => fraction_str.parse::<i64>().map_err(|_| invalid())? * 10,
        _ => fraction_str.parse().map_err(|_| invalid())?,
    };

    let cents = units
        .checked_mul(100)
        .and_then(|c| c.checked_add(fraction))
        .ok_or_else(overflow)?;
    Ok(if negative { -cents } else { cents })
}
