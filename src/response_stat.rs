use std::fmt;

/// Online aggregate of round-trip time samples.
///
/// The mean and second moment follow Welford's algorithm
/// <https://en.wikipedia.org/wiki/Algorithms_for_calculating_variance#Welford's_online_algorithm>.
#[derive(Clone, Debug, Default)]
pub struct ResponseStat {
    count: u64,
    min_rtt_us: Option<i64>,
    max_rtt_us: i64,
    avg_rtt_us: f64,
    m2_us: f64,
}

impl ResponseStat {
    pub(crate) fn reset(&mut self) {
        self.count = 0;
        self.min_rtt_us = None;
        self.max_rtt_us = 0;
        self.avg_rtt_us = 0.0;
        self.m2_us = 0.0;
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn add_rtt(&mut self, rtt_us: i64) {
        self.min_rtt_us = Some(match self.min_rtt_us {
            None => rtt_us,
            Some(min) => min.min(rtt_us),
        });
        self.max_rtt_us = self.max_rtt_us.max(rtt_us);
        self.count += 1;
        let delta = rtt_us as f64 - self.avg_rtt_us;
        self.avg_rtt_us += delta / self.count as f64;
        self.m2_us += delta * (rtt_us as f64 - self.avg_rtt_us);
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// `None` until the first sample arrives.
    #[must_use]
    pub fn min_rtt_us(&self) -> Option<i64> {
        self.min_rtt_us
    }

    #[must_use]
    pub fn max_rtt_us(&self) -> i64 {
        self.max_rtt_us
    }

    #[must_use]
    pub fn avg_rtt_us(&self) -> f64 {
        self.avg_rtt_us
    }

    /// Spread of the samples, NaN until two samples arrived.
    ///
    /// Computed as `M2 / count - 1`. This is not the sample standard
    /// deviation; the quantity is kept as is.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn std_rtt_us(&self) -> f64 {
        if self.count < 2 {
            f64::NAN
        } else {
            self.m2_us / self.count as f64 - 1.0
        }
    }
}

impl fmt::Display for ResponseStat {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packets received, rtt min/avg/max/mdev = {:.3}/{:.3}/{:.3}/{:.3} ms",
            self.count,
            self.min_rtt_us.unwrap_or(0) as f64 / 1000.0,
            self.avg_rtt_us / 1000.0,
            self.max_rtt_us as f64 / 1000.0,
            self.std_rtt_us() / 1_000_000.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use more_asserts as ma;

    #[test]
    fn three_samples() {
        let mut stat = ResponseStat::default();
        stat.add_rtt(10);
        stat.add_rtt(20);
        stat.add_rtt(30);

        assert_eq!(3, stat.count());
        assert_eq!(Some(10), stat.min_rtt_us());
        assert_eq!(30, stat.max_rtt_us());
        assert!((stat.avg_rtt_us() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn second_moment_accumulates() {
        let mut stat = ResponseStat::default();
        stat.add_rtt(10);
        stat.add_rtt(20);
        stat.add_rtt(30);

        // M2 = 200 for the samples above, so the spread is 200/3 - 1.
        let expected = 200.0 / 3.0 - 1.0;
        assert!((stat.std_rtt_us() - expected).abs() < 1e-9);
    }

    #[test]
    fn spread_is_nan_below_two_samples() {
        let mut stat = ResponseStat::default();
        assert!(stat.std_rtt_us().is_nan());
        stat.add_rtt(10);
        assert!(stat.std_rtt_us().is_nan());
        stat.add_rtt(20);
        assert!(!stat.std_rtt_us().is_nan());
    }

    #[test]
    fn reset_clears_all_fields() {
        let mut stat = ResponseStat::default();
        stat.add_rtt(10);
        stat.add_rtt(20);

        stat.reset();

        assert_eq!(0, stat.count());
        assert_eq!(None, stat.min_rtt_us());
        assert_eq!(0, stat.max_rtt_us());
        assert!(stat.avg_rtt_us().abs() < f64::EPSILON);
        assert!(stat.std_rtt_us().is_nan());
    }

    #[test]
    fn min_and_max_track_extremes() {
        let mut stat = ResponseStat::default();
        for rtt in [50, 30, 70, 40] {
            stat.add_rtt(rtt);
        }
        ma::assert_le!(stat.min_rtt_us().unwrap(), 30);
        ma::assert_ge!(stat.max_rtt_us(), 70);
    }

    #[test]
    fn fmt() {
        let mut stat = ResponseStat::default();
        stat.add_rtt(1000);
        stat.add_rtt(3000);
        assert_eq!(
            // M2 = 2e6, spread = 2e6/2 - 1 = 999999 us, scaled to 1.000.
            "2 packets received, rtt min/avg/max/mdev = 1.000/2.000/3.000/1.000 ms",
            format!("{stat}")
        );
    }
}
