use serde_json::Value;
use std::cmp::Ordering;

/// Literal prefix the upstream sometimes wraps around an otherwise valid
/// JSON array, e.g. `Array[{"instCode":"001",...}]`.
const ARRAY_WRAPPER_PREFIX: &str = "Array";

/// Parse an upstream response body into a JSON array of rows.
///
/// The portal can regress into the `Array[...]`-wrapped string shape at any
/// time, so every read path runs through here. Anything that does not
/// resolve to a genuine JSON array is "no data": `None`, never a panic.
pub fn parse_record_array(body: &str) -> Option<Vec<Value>> {
    let trimmed = body.trim_start_matches('\u{feff}').trim();

    if let Ok(Value::Array(items)) = serde_json::from_str(trimmed) {
        return Some(items);
    }

    let rest = trimmed.strip_prefix(ARRAY_WRAPPER_PREFIX)?;
    match serde_json::from_str(rest.trim_start()) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

/// Trimmed string view of a loosely-typed upstream value. `None` for null,
/// blank or structured values; numbers are coerced since the upstream
/// sometimes sends codes as bare numbers.
pub fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Case-insensitive natural order: digit runs compare numerically, so
/// "Campus 2" sorts before "Campus 10". Used for stable institution
/// ordering in UIs.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let mut left = a_lower.chars().peekable();
    let mut right = b_lower.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                if l.is_ascii_digit() && r.is_ascii_digit() {
                    let l_num = take_digits(&mut left);
                    let r_num = take_digits(&mut right);
                    match compare_digit_runs(&l_num, &r_num) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                match l.cmp(&r) {
                    Ordering::Equal => {
                        left.next();
                        right.next();
                    }
                    other => return other,
                }
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        run.push(c);
        chars.next();
    }
    run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
