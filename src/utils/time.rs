use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch. Deadlines are absolute values of
/// this clock; `0` always means "no deadline".
#[must_use]
pub fn ustime() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotone_enough() {
        let a = ustime();
        let b = ustime();
        assert!(b >= a);
        assert!(a > 0);
    }
}
