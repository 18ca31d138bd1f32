use serde_json::Value;

/// Lessons assumed per month when pro-rating a monthly course price.
pub const DEFAULT_LESSONS_PER_MONTH: u32 = 12;

/// A currency field read from a schema-less document.
#[derive(Debug, Clone, PartialEq)]
pub enum MoneyField {
    Amount(f64),
    Unparseable(String),
    Missing,
}

impl MoneyField {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Amount(v) => Some(*v),
            Self::Unparseable(_) | Self::Missing => None,
        }
    }

    pub fn or_zero(&self) -> f64 {
        self.value().unwrap_or(0.0)
    }

    /// Course and subject prices. Strings keep only their digits, so
    /// `"500 000 so'm"` reads as 500000.
    pub fn price(v: Option<&Value>) -> Self {
        match v {
            None | Some(Value::Null) => Self::Missing,
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Self::Amount)
                .unwrap_or_else(|| Self::Unparseable(n.to_string())),
            Some(Value::String(s)) => {
                let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
                match digits.parse::<f64>() {
                    Ok(v) => Self::Amount(v),
                    Err(_) => Self::Unparseable(s.clone()),
                }
            }
            Some(other) => Self::Unparseable(other.to_string()),
        }
    }

    /// Signed ledger amounts such as `"-15000"` or `"+20,000 UZS"`.
    pub fn amount(v: Option<&Value>) -> Self {
        match v {
            None | Some(Value::Null) => Self::Missing,
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Self::Amount)
                .unwrap_or_else(|| Self::Unparseable(n.to_string())),
            Some(Value::String(s)) => {
                let kept: String = s
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                    .collect();
                match parse_float_prefix(&kept) {
                    Some(v) => Self::Amount(v),
                    None => Self::Unparseable(s.clone()),
                }
            }
            Some(other) => Self::Unparseable(other.to_string()),
        }
    }
}

/// Longest leading `-?digits[.digits]` of `s`, if it holds at least one digit.
pub fn parse_float_prefix(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut end = 0;
    if bytes.first() == Some(&b'-') {
        end = 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        if frac_end > frac_start {
            digits += frac_end - frac_start;
            end = frac_end;
        }
    }
    if digits == 0 {
        return None;
    }
    s[..end].parse::<f64>().ok()
}

/// Per-lesson fee: `round(monthly / lessons_per_month)`. `None` means nothing to deduct.
pub fn daily_fee(monthly: &MoneyField, lessons_per_month: u32) -> Option<i64> {
    if lessons_per_month == 0 {
        return None;
    }
    let monthly = monthly.value()?;
    let fee = (monthly / f64::from(lessons_per_month)).round();
    if !fee.is_finite() || fee <= 0.0 {
        return None;
    }
    Some(fee as i64)
}

fn group_thousands(n: u64) -> String {
    let raw = n.to_string();
    let mut out = String::with_capacity(raw.len() + raw.len() / 3);
    for (i, ch) in raw.chars().enumerate() {
        if i > 0 && (raw.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `"+20,000 UZS"` style label used for manual balance transactions.
pub fn format_ledger_amount(positive: bool, amount: f64) -> String {
    let sign = if positive { '+' } else { '-' };
    let abs = amount.abs();
    let whole = abs.trunc() as u64;
    let cents = ((abs - abs.trunc()) * 100.0).round() as u64;
    if cents == 0 {
        format!("{}{} UZS", sign, group_thousands(whole))
    } else {
        format!("{}{}.{:02} UZS", sign, group_thousands(whole), cents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn daily_fee_rounds_to_nearest() {
        let price = MoneyField::price(Some(&json!(500000)));
        assert_eq!(daily_fee(&price, 12), Some(41667));
        let price = MoneyField::price(Some(&json!("300000")));
        assert_eq!(daily_fee(&price, 12), Some(25000));
    }

    #[test]
    fn formatted_price_string_matches_plain_number() {
        let formatted = MoneyField::price(Some(&json!("500 000 so'm")));
        let plain = MoneyField::price(Some(&json!(500000)));
        assert_eq!(formatted, plain);
        assert_eq!(daily_fee(&formatted, 12), daily_fee(&plain, 12));
    }

    #[test]
    fn unusable_prices_give_no_fee() {
        assert_eq!(daily_fee(&MoneyField::price(None), 12), None);
        assert_eq!(daily_fee(&MoneyField::price(Some(&json!("free"))), 12), None);
        assert_eq!(daily_fee(&MoneyField::price(Some(&json!(0))), 12), None);
        assert_eq!(daily_fee(&MoneyField::price(Some(&json!(5))), 12), None);
        assert_eq!(daily_fee(&MoneyField::price(Some(&json!(120000))), 0), None);
    }

    #[test]
    fn ledger_amounts_parse_defensively() {
        assert_eq!(MoneyField::amount(Some(&json!("-15000"))).value(), Some(-15000.0));
        assert_eq!(MoneyField::amount(Some(&json!("+20,000 UZS"))).value(), Some(20000.0));
        assert_eq!(MoneyField::amount(Some(&json!(1250.5))).value(), Some(1250.5));
        assert_eq!(MoneyField::amount(Some(&json!("12.5.1"))).value(), Some(12.5));
        assert!(matches!(
            MoneyField::amount(Some(&json!("n/a"))),
            MoneyField::Unparseable(_)
        ));
        assert_eq!(MoneyField::amount(None), MoneyField::Missing);
        assert_eq!(MoneyField::amount(Some(&json!("--"))).or_zero(), 0.0);
    }

    #[test]
    fn ledger_labels_group_thousands() {
        assert_eq!(format_ledger_amount(true, 20000.0), "+20,000 UZS");
        assert_eq!(format_ledger_amount(false, 1500000.0), "-1,500,000 UZS");
        assert_eq!(format_ledger_amount(true, 999.5), "+999.50 UZS");
    }
}
