use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::locale::{Currency, Language};

const MONTHS_ID: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "Mei", "Jun", "Jul", "Agu", "Sep", "Okt", "Nov", "Des",
];
const MONTHS_EN: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Formats an amount for display: `Rp 10.000` for rupiah, `$1,234.50` for dollars.
///
/// Rupiah has no minor unit and is rounded to whole numbers. Non-finite
/// amounts render as zero.
pub fn format_currency(amount: f64, currency: Currency) -> String {
    let amount = if amount.is_finite() { amount } else { 0.0 };

    let (body, is_zero) = match currency {
        Currency::Idr => {
            let units = amount.abs().round() as u64;
            (group_thousands(units, '.'), units == 0)
        }
        Currency::Usd => {
            let cents = (amount.abs() * 100.0).round() as u64;
            (
                format!("{}.{:02}", group_thousands(cents / 100, ','), cents % 100),
                cents == 0,
            )
        }
    };

    let sign = if amount < 0.0 && !is_zero { "-" } else { "" };
    match currency {
        Currency::Idr => format!("{sign}{} {body}", currency.symbol()),
        Currency::Usd => format!("{sign}{}{body}", currency.symbol()),
    }
}

/// Receipt-style date, e.g. `14 Okt 2026 09:05` or `Oct 14, 2026 09:05`.
pub fn format_date(value: &DateTime<Utc>, language: Language) -> String {
    let month = value.month0() as usize;
    match language {
        Language::Id => format!(
            "{} {} {} {:02}:{:02}",
            value.day(),
            MONTHS_ID[month],
            value.year(),
            value.hour(),
            value.minute()
        ),
        Language::En => format!(
            "{} {}, {} {:02}:{:02}",
            MONTHS_EN[month],
            value.day(),
            value.year(),
            value.hour(),
            value.minute()
        ),
    }
}

fn group_thousands(value: u64, separator: char) -> String {
    let digits = value.to_string();
    let mut output = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            output.push(separator);
        }
        output.push(digit);
    }
    output
}
