use rand::Rng;
use std::time::Duration;

/// Random delay between `min_ms` and `max_ms` inclusive
pub fn jitter(min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

/// Random value in `0..upper`, or 0 when `upper` is 0
pub fn random_below(upper: u64) -> u64 {
    if upper == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..upper)
}

/// Convert a string to a sanitized filename
pub fn sanitize_filename(url: &str) -> String {
    // Remove protocol and replace invalid filename characters
    let mut name = url.replace("http://", "").replace("https://", "");
    name = name.replace(['/', ':', '?', '&', '=', '#', '%', '+', ' '], "_");

    // Limit filename length
    if name.len() > 100 {
        let mut cut = 100;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name[..cut].to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..50 {
            let d = jitter(10, 20);
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
        assert_eq!(jitter(0, 0), Duration::ZERO);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(
            sanitize_filename("https://example.com/search?q=test&page=2"),
            "example.com_search_q_test_page_2"
        );
        assert!(sanitize_filename(&"a".repeat(300)).len() <= 100);
    }
}
