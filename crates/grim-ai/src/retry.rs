use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

pub const BASE_BACKOFF_MS: u64 = 250;

static JITTER_COUNTER: AtomicU64 = AtomicU64::new(1);

pub fn should_retry_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

fn deterministic_backoff_ms(attempt: usize) -> u64 {
    let shift = attempt.min(6);
    BASE_BACKOFF_MS.saturating_mul(1_u64 << shift)
}

/// Exponential backoff, optionally with bounded jitter in [50%, 100%] of
/// the deterministic delay.
pub fn backoff_delay_ms(attempt: usize, jitter_enabled: bool) -> u64 {
    let base = deterministic_backoff_ms(attempt);
    if !jitter_enabled || base <= 1 {
        return base;
    }

    let low = base / 2;
    let width = base.saturating_sub(low);
    let seed = JITTER_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(21) ^ 0xD1B5_4A32_D192_ED03;
    let jitter = if width == 0 {
        0
    } else {
        mixed % width.saturating_add(1)
    };
    low.saturating_add(jitter)
}

/// Reads `retry-after` as either delay-seconds or an HTTP date.
pub fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1000));
    }

    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    if delay_ms <= 0 {
        return Some(0);
    }
    u64::try_from(delay_ms).ok()
}

/// The provider's `retry-after` floor wins over the computed backoff.
pub fn retry_delay_ms(attempt: usize, jitter_enabled: bool, retry_after_ms: Option<u64>) -> u64 {
    let backoff = backoff_delay_ms(attempt, jitter_enabled);
    match retry_after_ms {
        Some(floor) => backoff.max(floor),
        None => backoff,
    }
}

pub fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::{
        backoff_delay_ms, deterministic_backoff_ms, parse_retry_after_ms, retry_delay_ms,
        should_retry_status,
    };

    #[test]
    fn retry_status_selection_is_correct() {
        assert!(should_retry_status(408));
        assert!(should_retry_status(429));
        assert!(should_retry_status(502));
        assert!(!should_retry_status(400));
        assert!(!should_retry_status(404));
    }

    #[test]
    fn backoff_doubles_per_attempt_and_caps() {
        assert_eq!(deterministic_backoff_ms(0), 250);
        assert_eq!(deterministic_backoff_ms(1), 500);
        assert_eq!(deterministic_backoff_ms(2), 1_000);
        assert_eq!(deterministic_backoff_ms(6), deterministic_backoff_ms(9));
    }

    #[test]
    fn jittered_backoff_stays_within_expected_bounds() {
        let attempt = 3;
        let base = deterministic_backoff_ms(attempt);
        let low = base / 2;
        for _ in 0..64 {
            let value = backoff_delay_ms(attempt, true);
            assert!(value >= low, "expected {value} >= {low}");
            assert!(value <= base, "expected {value} <= {base}");
        }
    }

    #[test]
    fn unit_parse_retry_after_ms_accepts_seconds_and_rejects_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("2"));
        assert_eq!(parse_retry_after_ms(&headers), Some(2_000));

        headers.insert("retry-after", HeaderValue::from_static("soonish"));
        assert_eq!(parse_retry_after_ms(&headers), None);
    }

    #[test]
    fn functional_parse_retry_after_ms_accepts_http_dates() {
        let mut headers = HeaderMap::new();
        let raw = (Utc::now() + Duration::seconds(2))
            .to_rfc2822()
            .replace("+0000", "GMT");
        headers.insert(
            "retry-after",
            HeaderValue::from_str(raw.as_str()).expect("retry-after date"),
        );
        let delay = parse_retry_after_ms(&headers).expect("delay from date");
        assert!(delay <= 2_500, "delay should be close to 2s, got {delay}");
    }

    #[test]
    fn regression_retry_delay_honors_retry_after_floor() {
        assert_eq!(retry_delay_ms(0, false, None), 250);
        assert_eq!(retry_delay_ms(2, false, Some(100)), 1_000);
        assert_eq!(retry_delay_ms(0, false, Some(1_500)), 1_500);
    }
}
