//! Variable engine: `{{ path.to.value | filter:arg }}` interpolation.
//!
//! Paths resolve against the run context with [`lookup_path`]; a missing
//! path renders as an empty string.  Filters chain left to right.  Unknown
//! filters, and filters that cannot handle the value they receive, pass the
//! value through unchanged.  Rendering never fails.
//!
//! | Filter | Effect |
//! |---|---|
//! | `lower` / `lowercase` | lower-case text |
//! | `upper` / `uppercase` | upper-case text |
//! | `capitalize` | first letter upper-case |
//! | `trim` | strip surrounding whitespace |
//! | `first_name` | first whitespace-separated word |
//! | `currency[:CODE]` | `1234.5` → `$1,234.50` (`USD`, `EUR`, `GBP`, `BRL`) |
//! | `number[:decimals]` | fixed decimals (default 0) |
//! | `date[:format]` | RFC 3339 / `YYYY-MM-DD` / unix seconds → strftime (default `%Y-%m-%d`) |
//! | `default:fallback` | fallback when the value is missing or blank |
//! | `json` | JSON encoding |

use std::fmt::Write as _;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::{Captures, Regex};
use serde_json::Value;

use crate::value::{is_empty, lookup_path, to_number, to_text};

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{([^{}]*)\}\}").expect("token pattern is valid"))
}

/// Render every `{{ … }}` token in `template` against `context`.
pub fn render(template: &str, context: &Value) -> String {
    if !template.contains("{{") {
        return template.to_owned();
    }
    token_pattern()
        .replace_all(template, |caps: &Captures<'_>| render_token(&caps[1], context))
        .into_owned()
}

/// Render every string inside `value` (objects and arrays recursively).
pub fn render_value(value: &Value, context: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(render(s, context)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, context)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_token(expression: &str, context: &Value) -> String {
    let mut parts = expression.split('|');
    let path = parts.next().unwrap_or_default().trim();
    let mut value = lookup_path(context, path).cloned().unwrap_or(Value::Null);

    for filter in parts {
        let (name, arg) = match filter.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(unquote(arg.trim()))),
            None => (filter.trim(), None),
        };
        value = apply_filter(name, arg, value);
    }

    to_text(&value)
}

fn unquote(arg: &str) -> &str {
    let quoted = arg.len() >= 2
        && ((arg.starts_with('"') && arg.ends_with('"')) || (arg.starts_with('\'') && arg.ends_with('\'')));
    if quoted { &arg[1..arg.len() - 1] } else { arg }
}

fn apply_filter(name: &str, arg: Option<&str>, value: Value) -> Value {
    let result = match name.to_ascii_lowercase().as_str() {
        "lower" | "lowercase" => Some(to_text(&value).to_lowercase()),
        "upper" | "uppercase" => Some(to_text(&value).to_uppercase()),
        "trim" => Some(to_text(&value).trim().to_owned()),
        "capitalize" => Some(capitalize(&to_text(&value))),
        "first_name" => Some(to_text(&value).split_whitespace().next().unwrap_or_default().to_owned()),
        "currency" => to_number(&value).map(|n| format_currency(n, arg.unwrap_or("USD"))),
        "number" => to_number(&value).map(|n| {
            let decimals = arg.and_then(|a| a.parse::<usize>().ok()).unwrap_or(0).min(10);
            format!("{n:.decimals$}")
        }),
        "date" => format_date(&value, arg.unwrap_or("%Y-%m-%d")),
        "default" => {
            if is_empty(Some(&value)) {
                Some(arg.unwrap_or_default().to_owned())
            } else {
                None
            }
        }
        "json" => serde_json::to_string(&value).ok(),
        _ => None,
    };

    result.map(Value::String).unwrap_or(value)
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Format `amount` with the symbol and separators of `code`.
pub fn format_currency(amount: f64, code: &str) -> String {
    let (symbol, thousands, decimal) = match code.to_ascii_uppercase().as_str() {
        "USD" => ("$", ',', '.'),
        "EUR" => ("€", '.', ','),
        "GBP" => ("£", ',', '.'),
        "BRL" => ("R$ ", '.', ','),
        other => return format!("{} {}", group_digits(amount, ',', '.'), other),
    };
    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{sign}{symbol}{}", group_digits(amount.abs(), thousands, decimal))
}

fn group_digits(amount: f64, thousands: char, decimal: char) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(thousands);
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}{decimal}{frac_part}")
}

fn format_date(value: &Value, format: &str) -> Option<String> {
    let timestamp: DateTime<Utc> = match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|naive| naive.and_utc())
            })?,
        Value::Number(n) => {
            let raw = n.as_i64()?;
            // Millisecond timestamps are common in JS producers.
            let secs = if raw.abs() > 100_000_000_000 { raw / 1000 } else { raw };
            DateTime::from_timestamp(secs, 0)?
        }
        _ => return None,
    };

    // An invalid strftime specifier surfaces as a fmt error, never a panic.
    let mut out = String::new();
    write!(out, "{}", timestamp.format(format)).ok()?;
    Some(out)
}
