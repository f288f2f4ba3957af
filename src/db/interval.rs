use std::time::Duration;

/// Parse the store's textual interval representation into a duration.
///
/// Accepts the `HH:MM:SS[.ffffff]` form, optionally prefixed with
/// `N day[s]`. Lenient: fragments that do not parse contribute zero
/// instead of failing the row they came from.
pub fn parse_interval(interval: &str) -> Duration {
    if interval == "00:00:00" {
        return Duration::ZERO;
    }

    let mut total = Duration::ZERO;
    let mut rest = interval.trim();

    // "1 day 02:03:04" / "2 days 02:03:04"
    if let Some(pos) = rest.find("day") {
        let (days_part, tail) = rest.split_at(pos);
        if let Ok(days) = days_part.trim().parse::<u64>() {
            total += Duration::from_secs(days * 24 * 3600);
        }
        rest = tail
            .strip_prefix("days")
            .or_else(|| tail.strip_prefix("day"))
            .unwrap_or(tail)
            .trim();
    }

    if rest.is_empty() {
        return total;
    }

    let (clock, frac) = match rest.split_once('.') {
        Some((clock, frac)) => (clock, Some(frac)),
        None => (rest, None),
    };

    let mut fields = clock.split(':');
    if let (Some(hours), Some(minutes), Some(seconds)) = (fields.next(), fields.next(), fields.next()) {
        if let (Ok(hours), Ok(minutes), Ok(seconds)) =
            (hours.parse::<u64>(), minutes.parse::<u64>(), seconds.parse::<u64>())
        {
            total += Duration::from_secs(hours * 3600 + minutes * 60 + seconds);

            // Fractional seconds carry at most microsecond precision;
            // right-pad short fractions to six digits.
            if let Some(frac) = frac {
                let mut digits: String = frac.chars().take_while(|c| c.is_ascii_digit()).collect();
                while digits.len() < 6 {
                    digits.push('0');
                }
                if let Ok(micros) = digits[..6].parse::<u64>() {
                    total += Duration::from_micros(micros);
                }
            }
        }
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval() {
        assert_eq!(parse_interval("00:00:00"), Duration::ZERO);
    }

    #[test]
    fn interval_with_days() {
        assert_eq!(
            parse_interval("1 day 02:03:04"),
            Duration::from_secs(24 * 3600 + 2 * 3600 + 3 * 60 + 4)
        );
    }

    #[test]
    fn interval_with_fractional_seconds() {
        assert_eq!(
            parse_interval("02:03:04.500000"),
            Duration::from_secs(2 * 3600 + 3 * 60 + 4) + Duration::from_millis(500)
        );
    }

    #[test]
    fn interval_with_plural_days() {
        assert_eq!(
            parse_interval("2 days 03:00:00"),
            Duration::from_secs(2 * 24 * 3600 + 3 * 3600)
        );
    }

    #[test]
    fn interval_with_days_only() {
        assert_eq!(parse_interval("1 day"), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn short_fraction_is_right_padded() {
        assert_eq!(
            parse_interval("00:00:01.5"),
            Duration::from_secs(1) + Duration::from_millis(500)
        );
    }

    #[test]
    fn garbage_contributes_nothing() {
        assert_eq!(parse_interval("not an interval"), Duration::ZERO);
        assert_eq!(parse_interval(""), Duration::ZERO);
    }
}
