/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Render an amount held in minor units (cents) with its currency code and
/// thousands separators, e.g. `KES 25,000.00`.
pub fn format_currency(minor: i64, currency: &str) -> String {
  let sign = if minor < 0 { "-" } else { "" };
  let abs = minor.unsigned_abs();
  let whole = (abs / 100).to_string();
  let cents = abs % 100;

  let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
  for (i, digit) in whole.chars().enumerate() {
    if i > 0 && (whole.len() - i) % 3 == 0 {
      grouped.push(',');
    }
    grouped.push(digit);
  }

  format!("{}{} {}.{:02}", sign, currency, grouped, cents)
}
