//! Partition version arithmetic shared by every backend.

use silo_types::Timestamp;

/// Compute the next record version and partition watermark.
///
/// A caller-supplied version equal to the watermark is bumped past it; a
/// future one advances the watermark; a past one is stored as-is without
/// moving the watermark. Without an explicit version, the next value is
/// `max(now, watermark + 1)`, which protects against stalled or
/// backwards-moving clocks.
pub(crate) fn bump_timestamp(
    watermark: Timestamp,
    explicit: Option<Timestamp>,
) -> (Timestamp, Timestamp) {
    match explicit {
        Some(wanted) if wanted == watermark => {
            let bumped = watermark.next();
            (bumped, bumped)
        }
        Some(wanted) if wanted > watermark => (wanted, wanted),
        Some(wanted) => (wanted, watermark),
        None => {
            let now = Timestamp::now();
            let assigned = if now <= watermark { watermark.next() } else { now };
            (assigned, assigned)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_without_explicit_value_outruns_a_stalled_clock() {
        let far_future = Timestamp(i64::MAX - 10);
        let (assigned, watermark) = bump_timestamp(far_future, None);
        assert_eq!(assigned, far_future.next());
        assert_eq!(watermark, far_future.next());
    }

    #[test]
    fn test_explicit_value_equal_to_watermark_is_bumped() {
        let (assigned, watermark) = bump_timestamp(Timestamp(100), Some(Timestamp(100)));
        assert_eq!(assigned, Timestamp(101));
        assert_eq!(watermark, Timestamp(101));
    }

    #[test]
    fn test_explicit_future_value_becomes_the_watermark() {
        let (assigned, watermark) = bump_timestamp(Timestamp(100), Some(Timestamp(500)));
        assert_eq!(assigned, Timestamp(500));
        assert_eq!(watermark, Timestamp(500));
    }

    #[test]
    fn test_explicit_past_value_keeps_the_watermark() {
        let (assigned, watermark) = bump_timestamp(Timestamp(100), Some(Timestamp(50)));
        assert_eq!(assigned, Timestamp(50));
        assert_eq!(watermark, Timestamp(100));
    }
}
