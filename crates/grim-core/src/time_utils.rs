/// Returns the current Unix timestamp in seconds.
pub fn current_unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::current_unix_timestamp;

    #[test]
    fn clock_is_past_2024() {
        assert!(current_unix_timestamp() > 1_700_000_000);
    }
}
