use anyhow::{anyhow, bail, Result};
use chrono::TimeDelta;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;
const NANOS_PER_MIN: u128 = 60 * NANOS_PER_SEC;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MIN;

/// Render a signed duration in the compact form used on the wire,
/// e.g. `0s`, `1.5s`, `-200ms`, `1h2m3.5s`, `750µs`.
pub fn format_duration(delta: TimeDelta) -> String {
    let total = delta.num_seconds() as i128 * NANOS_PER_SEC as i128 + delta.subsec_nanos() as i128;
    if total == 0 {
        return "0s".to_string();
    }

    let sign = if total < 0 { "-" } else { "" };
    let nanos = total.unsigned_abs();

    let body = if nanos < NANOS_PER_MICRO {
        format!("{}ns", nanos)
    } else if nanos < NANOS_PER_MILLI {
        format!("{}µs", with_fraction(nanos, NANOS_PER_MICRO))
    } else if nanos < NANOS_PER_SEC {
        format!("{}ms", with_fraction(nanos, NANOS_PER_MILLI))
    } else {
        let hours = nanos / NANOS_PER_HOUR;
        let minutes = (nanos % NANOS_PER_HOUR) / NANOS_PER_MIN;
        let seconds = with_fraction(nanos % NANOS_PER_MIN, NANOS_PER_SEC);
        if hours > 0 {
            format!("{}h{}m{}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m{}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    };

    format!("{}{}", sign, body)
}

// `value / unit` as a decimal with trailing zeros trimmed.
fn with_fraction(value: u128, unit: u128) -> String {
    let whole = value / unit;
    let frac = value % unit;
    if frac == 0 {
        return whole.to_string();
    }
    let width = unit.ilog10() as usize;
    let digits = format!("{:0width$}", frac, width = width);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// `delta / divisor`, rounding toward zero like integer division.
///
/// chrono's own `TimeDelta / i32` rounds negative values toward negative
/// infinity at nanosecond precision.
pub fn divide_duration(delta: TimeDelta, divisor: i32) -> TimeDelta {
    match delta.num_nanoseconds() {
        Some(nanos) => TimeDelta::nanoseconds(nanos / i64::from(divisor)),
        None => delta / divisor,
    }
}

/// Parse a signed duration such as `1.5s`, `-200ms`, `+1m30s` or `0`.
pub fn parse_duration(input: &str) -> Result<TimeDelta> {
    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };

    if rest == "0" {
        return Ok(TimeDelta::zero());
    }
    if rest.is_empty() {
        bail!("invalid duration {:?}", input);
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let (int_part, after_int) = rest.split_at(int_len);

        let (frac_part, after_number) = match after_int.strip_prefix('.') {
            Some(tail) => {
                let frac_len = tail.bytes().take_while(u8::is_ascii_digit).count();
                tail.split_at(frac_len)
            }
            None => ("", after_int),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            bail!("invalid duration {:?}", input);
        }

        let unit_len = after_number
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after_number.len());
        let (unit, tail) = after_number.split_at(unit_len);
        let scale = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => NANOS_PER_MICRO,
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SEC,
            "m" => NANOS_PER_MIN,
            "h" => NANOS_PER_HOUR,
            "" => bail!("missing unit in duration {:?}", input),
            other => bail!("unknown unit {:?} in duration {:?}", other, input),
        };

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| anyhow!("invalid duration {:?}", input))?
        };
        let mut value = whole
            .checked_mul(scale)
            .ok_or_else(|| anyhow!("duration {:?} out of range", input))?;

        // Digits beyond nanosecond resolution cannot contribute.
        let frac_digits = &frac_part[..frac_part.len().min(18)];
        if !frac_digits.is_empty() {
            let frac: u128 = frac_digits
                .parse()
                .map_err(|_| anyhow!("invalid duration {:?}", input))?;
            value += frac * scale / 10u128.pow(frac_digits.len() as u32);
        }

        total = total
            .checked_add(value)
            .ok_or_else(|| anyhow!("duration {:?} out of range", input))?;
        rest = tail;
    }

    let secs = i64::try_from(total / NANOS_PER_SEC)
        .map_err(|_| anyhow!("duration {:?} out of range", input))?;
    let delta = TimeDelta::new(secs, (total % NANOS_PER_SEC) as u32)
        .ok_or_else(|| anyhow!("duration {:?} out of range", input))?;
    Ok(if negative { -delta } else { delta })
}
