use crate::error::{LedgerError, LedgerResult};

/// Parses a user-typed amount into integer cents.
///
/// Accepts an optional sign and `R$` prefix (spaces allowed around them),
/// `,` only as three-digit thousands grouping and at most two fractional
/// digits. Blank input is rejected: callers decide whether a missing amount
/// defaults to zero.
pub fn parse_amount_to_cents(raw: &str, field: &str) -> LedgerResult<i64> {
    let mut rest = raw.trim();
    if rest.is_empty() {
        return Err(LedgerError::validation(field, format!("{field} is required")));
    }

    let mut negative = false;
    let mut seen_sign = false;
    let mut seen_currency = false;
    loop {
        if !seen_sign && (rest.starts_with('-') || rest.starts_with('+')) {
            negative = rest.starts_with('-');
            seen_sign = true;
            rest = rest[1..].trim_start();
        } else if !seen_currency && rest.starts_with("R$") {
            seen_currency = true;
            rest = rest[2..].trim_start();
        } else {
            break;
        }
    }
    if rest.is_empty() || rest.contains(char::is_whitespace) {
        return Err(invalid_amount(field));
    }

    let (int_raw, frac_part) = rest.split_once('.').unwrap_or((rest, ""));
    if frac_part.contains('.') || !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid_amount(field));
    }
    let int_digits = ungroup_thousands(int_raw).ok_or_else(|| invalid_amount(field))?;
    if int_digits.is_empty() && frac_part.is_empty() {
        return Err(invalid_amount(field));
    }
    if frac_part.len() > 2 {
        return Err(LedgerError::validation(
            field,
            format!("{field} supports at most two decimal places"),
        ));
    }

    let int_val = if int_digits.is_empty() {
        0_i64
    } else {
        int_digits.parse::<i64>().map_err(|_| out_of_range(field))?
    };
    let frac_val = match frac_part.len() {
        0 => 0_i64,
        1 => frac_part.parse::<i64>().map_err(|_| invalid_amount(field))? * 10,
        _ => frac_part.parse::<i64>().map_err(|_| invalid_amount(field))?,
    };
    let mut cents = int_val
        .checked_mul(100)
        .and_then(|v| v.checked_add(frac_val))
        .ok_or_else(|| out_of_range(field))?;
    if negative {
        cents = -cents;
    }
    Ok(cents)
}

/// `1,234,567` -> `1234567`. Any other use of `,` is malformed.
fn ungroup_thousands(raw: &str) -> Option<String> {
    let all_digits = |g: &str| g.chars().all(|c| c.is_ascii_digit());
    if !raw.contains(',') {
        return all_digits(raw).then(|| raw.to_string());
    }
    let mut groups = raw.split(',');
    let first = groups.next()?;
    if first.is_empty() || first.len() > 3 || !all_digits(first) {
        return None;
    }
    let mut digits = first.to_string();
    for group in groups {
        if group.len() != 3 || !all_digits(group) {
            return None;
        }
        digits.push_str(group);
    }
    Some(digits)
}

fn invalid_amount(field: &str) -> LedgerError {
    LedgerError::validation(field, format!("{field} is not a valid amount"))
}

fn out_of_range(field: &str) -> LedgerError {
    LedgerError::validation(field, format!("{field} is out of range"))
}

/// Exact two-decimal rendering of a cent amount.
pub fn cents_to_text(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Float for chart payloads. Only used on the way out.
pub fn cents_to_display_value(cents: i64) -> f64 {
    cents as f64 / 100.0
}

pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10_f64.powi(digits);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_amount_spellings() {
        assert_eq!(parse_amount_to_cents("1000", "amount").unwrap(), 100_000);
        assert_eq!(parse_amount_to_cents("500.5", "amount").unwrap(), 50_050);
        assert_eq!(parse_amount_to_cents(" R$ 1,234.56 ", "amount").unwrap(), 123_456);
        assert_eq!(parse_amount_to_cents("-12.30", "amount").unwrap(), -1_230);
        assert_eq!(parse_amount_to_cents("+.75", "amount").unwrap(), 75);
        assert_eq!(parse_amount_to_cents("- R$ 12,345,678.9", "amount").unwrap(), -1_234_567_890);
        assert_eq!(parse_amount_to_cents("R$-5", "amount").unwrap(), -500);
    }

    #[test]
    fn rejects_malformed_amounts_naming_the_field() {
        for raw in [
            "", "abc", "1.2.3", "1.234", "-", "12a", "1,50", "1,2345", ",100", "1,,000",
            "1234,567", "1 2", "1 000", ".", "R$", "--1", "R$ R$ 1", "1.5 0",
        ] {
            let err = parse_amount_to_cents(raw, "target_amount").unwrap_err();
            assert_eq!(err.field(), Some("target_amount"), "input {raw:?}");
        }
    }

    #[test]
    fn text_rendering_is_exact() {
        assert_eq!(cents_to_text(150_050), "1500.50");
        assert_eq!(cents_to_text(0), "0.00");
        assert_eq!(cents_to_text(-5), "-0.05");
        assert_eq!(cents_to_text(-120_025), "-1200.25");
    }

    #[test]
    fn decimal_sums_do_not_drift() {
        // 0.10 added ten times is exactly 1.00 in cents.
        let cents = (0..10)
            .map(|_| parse_amount_to_cents("0.10", "amount").unwrap())
            .sum::<i64>();
        assert_eq!(cents_to_text(cents), "1.00");
    }
}
