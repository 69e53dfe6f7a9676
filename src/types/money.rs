//! Signed amounts of cents

pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let amount = cents.unsigned_abs();
    format!("{sign}${}.{:02}", amount / 100, amount % 100)
}

/// Parse `[-][$]D[.C[C]]` into cents
pub fn parse_cents(input: &str) -> Result<i64, String> {
    let bad = || format!("cannot parse money amount '{input}'");
    let mut rest = input.trim();
    let negative = match rest.strip_prefix('-') {
        Some(r) => {
            rest = r;
            true
        }
        None => false,
    };
    rest = rest.strip_prefix('$').unwrap_or(rest);

    let (dollars, cents) = match rest.split_once('.') {
        Some((d, c)) => (d, c),
        None => (rest, ""),
    };
    if dollars.is_empty() && cents.is_empty() {
        return Err(bad());
    }
    if !dollars.chars().all(|c| c.is_ascii_digit()) || !cents.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    let whole: i64 = if dollars.is_empty() { 0 } else { dollars.parse().map_err(|_| bad())? };
    let fraction: i64 = match cents.len() {
        0 => 0,
        1 => cents.parse::<i64>().map_err(|_| bad())? * 10,
        2 => cents.parse().map_err(|_| bad())?,
        _ => return Err(bad()),
    };
    let total = whole
        .checked_mul(100)
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(bad)?;
    Ok(if negative { -total } else { total })
}
