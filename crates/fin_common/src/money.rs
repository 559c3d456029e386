//! Money helpers. All amounts are integer cents.

/// Format cents as Brazilian real, e.g. `R$ 1.234,56` or `-R$ 25,00`.
pub fn format_brl(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    let units = (abs / 100).to_string();
    let frac = abs % 100;

    let mut grouped = String::with_capacity(units.len() + units.len() / 3);
    for (i, ch) in units.chars().enumerate() {
        if i > 0 && (units.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    format!("{}R$ {},{:02}", sign, grouped, frac)
}

/// Parse a spreadsheet amount into cents.
///
/// Accepts `1.234,56`, `1,234.56`, `1234.56`, `1234,5`, `-50` and an optional
/// `R$`/`$`/`€` prefix. The last `,` or `.` followed by one or two digits is
/// the decimal separator.
pub fn parse_amount(raw: &str) -> Option<i64> {
    let trimmed: String = raw
        .trim()
        .trim_start_matches("R$")
        .trim_start_matches('$')
        .trim_start_matches('€')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if trimmed.is_empty() {
        return None;
    }

    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.as_str()),
    };

    let decimal_pos = body.rfind([',', '.']).filter(|&pos| {
        let tail = body.len() - pos - 1;
        tail == 1 || tail == 2
    });

    let (int_part, frac_part) = match decimal_pos {
        Some(pos) => (&body[..pos], &body[pos + 1..]),
        None => (body, ""),
    };

    let int_digits: String = int_part.chars().filter(|c| *c != '.' && *c != ',').collect();
    if int_digits.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_digits.chars().all(|c| c.is_ascii_digit()) || !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let units: i64 = if int_digits.is_empty() { 0 } else { int_digits.parse().ok()? };
    let cents: i64 = match frac_part.len() {
        0 => 0,
        1 => frac_part.parse::<i64>().ok()? * 10,
        _ => frac_part.parse().ok()?,
    };

    let value = units.checked_mul(100)?.checked_add(cents)?;
    Some(if negative { -value } else { value })
}
