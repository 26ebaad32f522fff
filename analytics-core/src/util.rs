use std::time::Duration;

pub fn consume_while<'s>(input: &mut &'s str, predicate: impl FnMut(&char) -> bool) -> &'s str {
    let len = input
        .chars()
        .take_while(predicate)
        .map(char::len_utf8)
        .sum::<usize>();
    let result = &input[..len];
    *input = &input[len..];
    result
}

/// Parses durations the way the service reports them: a sequence of decimal
/// numbers each followed by a unit, for example `1.5ms`, `2m3.1s` or `10µs`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let mut input = value.trim();
    if input.is_empty() {
        return None;
    }
    if input == "0" {
        return Some(Duration::ZERO);
    }
    let mut total = 0f64;
    while !input.is_empty() {
        let number = consume_while(&mut input, |c| c.is_ascii_digit() || *c == '.');
        let unit = consume_while(&mut input, |c| !(c.is_ascii_digit() || *c == '.'));
        if number.is_empty() || unit.is_empty() {
            return None;
        }
        let number: f64 = number.parse().ok()?;
        let nanos_per_unit = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60_000_000_000.0,
            "h" => 3_600_000_000_000.0,
            _ => return None,
        };
        total += number * nanos_per_unit;
    }
    Some(Duration::from_nanos(total.round() as u64))
}

/// Largest index not above `max` that lies on a char boundary of `value`.
pub fn char_boundary_below(value: &str, max: usize) -> usize {
    if max >= value.len() {
        return value.len();
    }
    (0..=max).rev().find(|i| value.is_char_boundary(*i)).unwrap_or(0)
}

/// Renders a duration in the unit expected by the service request `timeout` field.
pub fn format_duration(value: Duration) -> String {
    format!("{}ms", value.as_millis())
}

#[macro_export]
macro_rules! truncate_long {
    ($query:expr) => {
        format_args!(
            "{}{}",
            &$query[..$crate::char_boundary_below(&$query, 497)].trim_end(),
            if $query.len() > 497 { "..." } else { "" },
        )
    };
}
