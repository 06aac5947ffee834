//! Row-level (scalar) functions callable from expressions.
//!
//! Functions register themselves with [`inventory`]; the compiler resolves call sites through
//! [`lookup_function`]. Every implementation receives already-evaluated arguments and must be
//! total: bad input produces `null` or `NaN`, never a panic.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use tabula_columnar::Value;

pub type ScalarImpl = fn(&[Value]) -> Value;

pub struct ScalarFunction {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub implementation: ScalarImpl,
}

impl std::fmt::Debug for ScalarFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalarFunction")
            .field("name", &self.name)
            .finish()
    }
}

inventory::collect!(ScalarFunction);

fn registry() -> &'static HashMap<String, &'static ScalarFunction> {
    static REGISTRY: OnceLock<HashMap<String, &'static ScalarFunction>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        for spec in inventory::iter::<ScalarFunction> {
            map.insert(spec.name.to_ascii_lowercase(), spec);
        }
        map
    })
}

pub fn lookup_function(name: &str) -> Option<&'static ScalarFunction> {
    registry().get(&name.to_ascii_lowercase()).copied()
}

/// Resolve a `Math.<name>` member call to its scalar equivalent.
pub fn lookup_math(name: &str) -> Option<&'static ScalarFunction> {
    match name {
        "max" => lookup_function("greatest"),
        "min" => lookup_function("least"),
        "random" => None,
        other => lookup_function(other),
    }
}

pub fn iter_functions() -> impl Iterator<Item = &'static ScalarFunction> {
    inventory::iter::<ScalarFunction>.into_iter()
}

macro_rules! scalar {
    ($name:literal, $min:expr, $max:expr, $f:expr) => {
        inventory::submit! {
            ScalarFunction {
                name: $name,
                min_args: $min,
                max_args: $max,
                implementation: $f,
            }
        }
    };
}

fn arg(args: &[Value], idx: usize) -> &Value {
    static NULL: Value = Value::Null;
    args.get(idx).unwrap_or(&NULL)
}

fn numeric(args: &[Value], f: fn(f64) -> f64) -> Value {
    match arg(args, 0) {
        Value::Null => Value::Null,
        v => Value::Number(f(v.to_f64())),
    }
}

fn text(args: &[Value], idx: usize) -> Option<String> {
    match arg(args, idx) {
        Value::Null => None,
        v => Some(v.to_string()),
    }
}

fn integer(args: &[Value], idx: usize) -> Option<i64> {
    let n = arg(args, idx).as_f64()?;
    n.is_finite().then_some(n.trunc() as i64)
}

// Math

scalar!("abs", 1, 1, |a| numeric(a, f64::abs));
scalar!("ceil", 1, 1, |a| numeric(a, f64::ceil));
scalar!("floor", 1, 1, |a| numeric(a, f64::floor));
scalar!("round", 1, 1, |a| numeric(a, |x| (x + 0.5).floor()));
scalar!("trunc", 1, 1, |a| numeric(a, f64::trunc));
scalar!("sqrt", 1, 1, |a| numeric(a, f64::sqrt));
scalar!("cbrt", 1, 1, |a| numeric(a, f64::cbrt));
scalar!("exp", 1, 1, |a| numeric(a, f64::exp));
scalar!("log", 1, 1, |a| numeric(a, f64::ln));
scalar!("log10", 1, 1, |a| numeric(a, f64::log10));
scalar!("log2", 1, 1, |a| numeric(a, f64::log2));
scalar!("sign", 1, 1, |a| numeric(a, sign));
scalar!("pow", 2, 2, pow_fn);
scalar!("greatest", 0, usize::MAX, |a| extreme(a, std::cmp::Ordering::Greater));
scalar!("least", 0, usize::MAX, |a| extreme(a, std::cmp::Ordering::Less));

fn sign(x: f64) -> f64 {
    if x == 0.0 || x.is_nan() {
        x
    } else {
        x.signum()
    }
}

fn pow_fn(args: &[Value]) -> Value {
    match (arg(args, 0), arg(args, 1)) {
        (Value::Null, _) | (_, Value::Null) => Value::Null,
        (a, b) => Value::Number(a.to_f64().powf(b.to_f64())),
    }
}

fn extreme(args: &[Value], keep: std::cmp::Ordering) -> Value {
    args.iter()
        .filter(|v| v.is_valid())
        .fold(None::<&Value>, |best, v| match best {
            Some(b) if v.total_cmp(b) != keep => Some(b),
            _ => Some(v),
        })
        .cloned()
        .unwrap_or(Value::Null)
}

// Validity and equality

scalar!("is_nan", 1, 1, |a| Value::Boolean(
    matches!(arg(a, 0), Value::Number(n) if n.is_nan())
));
scalar!("is_finite", 1, 1, |a| Value::Boolean(
    matches!(arg(a, 0), Value::Number(n) if n.is_finite())
));
scalar!("is_valid", 1, 1, |a| Value::Boolean(arg(a, 0).is_valid()));
scalar!("is_null", 1, 1, |a| Value::Boolean(arg(a, 0).is_null()));
scalar!("coalesce", 1, usize::MAX, |a| a
    .iter()
    .find(|v| !v.is_null())
    .cloned()
    .unwrap_or(Value::Null));
scalar!("equal", 2, 2, |a| Value::Boolean(arg(a, 0) == arg(a, 1)));

// Strings

fn map_text(args: &[Value], f: impl FnOnce(&str) -> String) -> Value {
    match text(args, 0) {
        Some(s) => Value::from(f(&s)),
        None => Value::Null,
    }
}

fn test_text(args: &[Value], f: impl FnOnce(&str, &str) -> bool) -> Value {
    match (text(args, 0), text(args, 1)) {
        (Some(s), Some(needle)) => Value::Boolean(f(&s, &needle)),
        _ => Value::Null,
    }
}

scalar!("lower", 1, 1, |a| map_text(a, str::to_lowercase));
scalar!("upper", 1, 1, |a| map_text(a, str::to_uppercase));
scalar!("trim", 1, 1, |a| map_text(a, |s| s.trim().to_string()));
scalar!("length", 1, 1, length_fn);
scalar!("substring", 2, 3, substring_fn);
scalar!("replace", 3, 3, replace_fn);
scalar!("startswith", 2, 2, |a| test_text(a, |s, n| s.starts_with(n)));
scalar!("endswith", 2, 2, |a| test_text(a, |s, n| s.ends_with(n)));
scalar!("includes", 2, 2, includes_fn);
scalar!("padstart", 2, 3, |a| pad(a, true));
scalar!("padend", 2, 3, |a| pad(a, false));
scalar!("split", 2, 2, split_fn);
scalar!("parse_float", 1, 1, parse_float_fn);
scalar!("parse_int", 1, 2, parse_int_fn);

fn length_fn(args: &[Value]) -> Value {
    match arg(args, 0) {
        Value::Null => Value::Null,
        Value::Array(values) => Value::from(values.len()),
        v => Value::from(v.to_string().chars().count()),
    }
}

fn substring_fn(args: &[Value]) -> Value {
    let Some(s) = text(args, 0) else {
        return Value::Null;
    };
    let chars: Vec<char> = s.chars().collect();
    let clamp = |v: Option<i64>, default: usize| {
        v.map_or(default, |v| v.clamp(0, chars.len() as i64) as usize)
    };
    let mut start = clamp(integer(args, 1), 0);
    let mut end = clamp(integer(args, 2), chars.len());
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }
    Value::from(chars[start..end].iter().collect::<String>())
}

fn replace_fn(args: &[Value]) -> Value {
    match (text(args, 0), text(args, 1), text(args, 2)) {
        (Some(s), Some(pattern), Some(with)) => Value::from(s.replacen(&pattern, &with, 1)),
        _ => Value::Null,
    }
}

fn includes_fn(args: &[Value]) -> Value {
    match arg(args, 0) {
        Value::Null => Value::Null,
        Value::Array(values) => Value::Boolean(values.contains(arg(args, 1))),
        _ => test_text(args, |s, n| s.contains(n)),
    }
}

fn pad(args: &[Value], start: bool) -> Value {
    let Some(s) = text(args, 0) else {
        return Value::Null;
    };
    let width = integer(args, 1).unwrap_or(0).max(0) as usize;
    let fill = text(args, 2).unwrap_or_else(|| " ".to_string());
    let len = s.chars().count();
    if len >= width || fill.is_empty() {
        return Value::from(s);
    }
    let padding: String = fill.chars().cycle().take(width - len).collect();
    Value::from(if start { padding + &s } else { s + &padding })
}

fn split_fn(args: &[Value]) -> Value {
    match (text(args, 0), text(args, 1)) {
        (Some(s), Some(sep)) if sep.is_empty() => {
            Value::array(s.chars().map(|c| Value::from(c.to_string())))
        }
        (Some(s), Some(sep)) => Value::array(s.split(sep.as_str()).map(Value::from)),
        _ => Value::Null,
    }
}

fn parse_float_fn(args: &[Value]) -> Value {
    let Some(s) = text(args, 0) else {
        return Value::Null;
    };
    let s = s.trim_start();
    // Longest numeric prefix, as `parseFloat` does.
    let end = (1..=s.len())
        .rev()
        .filter(|&i| s.is_char_boundary(i))
        .find(|&i| s[..i].parse::<f64>().is_ok() && !s[..i].ends_with(['e', 'E']))
        .unwrap_or(0);
    Value::Number(s[..end].parse().unwrap_or(f64::NAN))
}

fn parse_int_fn(args: &[Value]) -> Value {
    let Some(s) = text(args, 0) else {
        return Value::Null;
    };
    let radix = integer(args, 1).unwrap_or(10);
    if !(2..=36).contains(&radix) {
        return Value::Number(f64::NAN);
    }
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let digits: String = digits
        .chars()
        .take_while(|c| c.is_digit(radix as u32))
        .collect();
    match i64::from_str_radix(&digits, radix as u32) {
        Ok(n) => Value::Number(if negative { -(n as f64) } else { n as f64 }),
        Err(_) => Value::Number(f64::NAN),
    }
}

// Arrays and objects

scalar!("join", 1, 2, join_fn);
scalar!("slice", 2, 3, slice_fn);
scalar!("has", 2, 2, has_fn);
scalar!("keys", 1, 1, |a| match arg(a, 0) {
    Value::Object(map) => Value::array(map.keys().cloned().map(Value::String)),
    _ => Value::Null,
});
scalar!("values", 1, 1, |a| match arg(a, 0) {
    Value::Object(map) => Value::array(map.values().cloned()),
    _ => Value::Null,
});
scalar!("object", 1, 1, object_fn);

fn join_fn(args: &[Value]) -> Value {
    let Value::Array(values) = arg(args, 0) else {
        return Value::Null;
    };
    let sep = text(args, 1).unwrap_or_else(|| ",".to_string());
    let parts: Vec<String> = values
        .iter()
        .map(|v| if v.is_null() { String::new() } else { v.to_string() })
        .collect();
    Value::from(parts.join(&sep))
}

fn slice_bounds(len: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
    let resolve = |v: i64| {
        if v < 0 {
            (len as i64 + v).max(0) as usize
        } else {
            (v as usize).min(len)
        }
    };
    let start = start.map_or(0, resolve);
    let end = end.map_or(len, resolve);
    (start, end.max(start))
}

fn slice_fn(args: &[Value]) -> Value {
    match arg(args, 0) {
        Value::Null => Value::Null,
        Value::Array(values) => {
            let (start, end) = slice_bounds(values.len(), integer(args, 1), integer(args, 2));
            Value::array(values[start..end].iter().cloned())
        }
        v => {
            let chars: Vec<char> = v.to_string().chars().collect();
            let (start, end) = slice_bounds(chars.len(), integer(args, 1), integer(args, 2));
            Value::from(chars[start..end].iter().collect::<String>())
        }
    }
}

fn has_fn(args: &[Value]) -> Value {
    match (arg(args, 0), text(args, 1)) {
        (Value::Object(map), Some(key)) => Value::Boolean(map.contains_key(key.as_str())),
        (Value::Null, _) => Value::Null,
        _ => Value::Boolean(false),
    }
}

/// Build an object from an array of `[key, value]` entries.
fn object_fn(args: &[Value]) -> Value {
    let Value::Array(entries) = arg(args, 0) else {
        return Value::Null;
    };
    let mut map = BTreeMap::new();
    for entry in entries.iter() {
        if let Value::Array(pair) = entry {
            if let Some(key) = pair.first() {
                let value = pair.get(1).cloned().unwrap_or(Value::Null);
                map.insert(Arc::from(key.to_string()), value);
            }
        }
    }
    Value::Object(Arc::new(map))
}

// Dates. Date values are UTC milliseconds since the epoch.

fn datetime(args: &[Value], idx: usize) -> Option<DateTime<Utc>> {
    let ms = match arg(args, idx) {
        Value::Date(ms) => *ms,
        Value::Number(n) if n.is_finite() => *n as i64,
        Value::String(s) => parse_datetime(s)?.timestamp_millis(),
        _ => return None,
    };
    DateTime::from_timestamp_millis(ms)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

fn date_part(args: &[Value], f: fn(&DateTime<Utc>) -> f64) -> Value {
    datetime(args, 0)
        .map(|dt| Value::Number(f(&dt)))
        .unwrap_or(Value::Null)
}

scalar!("date", 1, 7, date_fn);
scalar!("parse_date", 1, 1, |a| match text(a, 0).as_deref().and_then(parse_datetime) {
    Some(dt) => Value::Date(dt.timestamp_millis()),
    None => Value::Null,
});
scalar!("year", 1, 1, |a| date_part(a, |d| d.year() as f64));
scalar!("month", 1, 1, |a| date_part(a, |d| d.month0() as f64));
scalar!("date_of_month", 1, 1, |a| date_part(a, |d| d.day() as f64));
scalar!("dayofweek", 1, 1, |a| date_part(a, |d| {
    d.weekday().num_days_from_sunday() as f64
}));
scalar!("hours", 1, 1, |a| date_part(a, |d| d.hour() as f64));
scalar!("minutes", 1, 1, |a| date_part(a, |d| d.minute() as f64));
scalar!("seconds", 1, 1, |a| date_part(a, |d| d.second() as f64));
scalar!("format_date", 1, 2, format_date_fn);

/// `date(year, month0, day = 1, hours = 0, minutes = 0, seconds = 0, ms = 0)` with a zero-based
/// month, rolling overflowing fields into the next unit.
fn date_fn(args: &[Value]) -> Value {
    let Some(year) = integer(args, 0) else {
        return Value::Null;
    };
    let part = |idx: usize, default: i64| match arg(args, idx) {
        Value::Null => Some(default),
        _ => integer(args, idx),
    };
    let (Some(month), Some(day), Some(h), Some(m), Some(s), Some(ms)) = (
        part(1, 0),
        part(2, 1),
        part(3, 0),
        part(4, 0),
        part(5, 0),
        part(6, 0),
    ) else {
        return Value::Null;
    };
    let year = year + month.div_euclid(12);
    let month = month.rem_euclid(12) as u32 + 1;
    let Some(first) = i32::try_from(year)
        .ok()
        .and_then(|y| NaiveDate::from_ymd_opt(y, month, 1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    else {
        return Value::Null;
    };
    let base = Utc.from_utc_datetime(&first).timestamp_millis();
    let offset = (day - 1) * 86_400_000 + h * 3_600_000 + m * 60_000 + s * 1_000 + ms;
    Value::Date(base + offset)
}

fn format_date_fn(args: &[Value]) -> Value {
    let Some(dt) = datetime(args, 0) else {
        return Value::Null;
    };
    let short = arg(args, 1).truthy();
    let format = if short {
        "%Y-%m-%d"
    } else {
        "%Y-%m-%dT%H:%M:%S%.3fZ"
    };
    Value::from(dt.format(format).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Value {
        let f = lookup_function(name).unwrap_or_else(|| panic!("missing {name}"));
        (f.implementation)(args)
    }

    #[test]
    fn registry_is_case_insensitive() {
        assert!(lookup_function("ABS").is_some());
        assert_eq!(lookup_math("max").map(|f| f.name), Some("greatest"));
        assert!(lookup_function("nope").is_none());
    }

    #[test]
    fn math_propagates_null() {
        assert_eq!(call("abs", &[Value::from(-2)]), Value::Number(2.0));
        assert_eq!(call("abs", &[Value::Null]), Value::Null);
        assert_eq!(call("round", &[Value::from(-2.5)]), Value::Number(-2.0));
        assert_eq!(call("greatest", &[1.into(), Value::Null, 3.into()]), Value::Number(3.0));
    }

    #[test]
    fn string_helpers() {
        assert_eq!(call("padstart", &["7".into(), 3.into(), "0".into()]), Value::from("007"));
        assert_eq!(call("substring", &["hello".into(), 3.into(), 1.into()]), Value::from("el"));
        assert_eq!(call("slice", &["hello".into(), (-3).into()]), Value::from("llo"));
        assert_eq!(call("parse_int", &["42px".into()]), Value::Number(42.0));
        assert_eq!(call("parse_float", &["3.5e2x".into()]), Value::Number(350.0));
        assert!(call("parse_float", &["x".into()]).to_f64().is_nan());
        assert_eq!(
            call("split", &["a,b".into(), ",".into()]),
            Value::array(["a".into(), "b".into()])
        );
    }

    #[test]
    fn date_parts_are_utc() {
        let d = call("date", &[2024.into(), 1.into(), 29.into()]);
        assert_eq!(call("month", &[d.clone()]), Value::Number(1.0));
        assert_eq!(call("date_of_month", &[d.clone()]), Value::Number(29.0));
        assert_eq!(call("format_date", &[d, true.into()]), Value::from("2024-02-29"));
        let parsed = call("parse_date", &["2024-03-01T12:30:00Z".into()]);
        assert_eq!(call("hours", &[parsed]), Value::Number(12.0));
    }
}
