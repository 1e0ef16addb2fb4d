//! Piecewise-linear schedule of the live stripe population
//!
//! System scaling grows the stripe population over a ramp. Each row
//! covers `[start, end)` with a base `count` and a join `rate`; the live
//! count at time t inside a row is `ceil(count + rate * (t - start))`.

/// One schedule row
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduleRow {
    pub start: f64,
    pub end: f64,
    pub count: usize,
    pub rate: f64,
}

/// The full-horizon schedule
#[derive(Clone, Debug)]
pub struct TotalSlicesSchedule {
    rows: Vec<ScheduleRow>,
}

impl TotalSlicesSchedule {
    /// Flat schedule: `count` stripes over the whole horizon
    #[must_use]
    pub fn flat(count: usize, horizon: f64) -> Self {
        Self {
            rows: vec![ScheduleRow {
                start: 0.0,
                end: horizon,
                count,
                rate: 0.0,
            }],
        }
    }

    /// Splice a scaling ramp into the schedule: starting at `ramp_start`,
    /// `added` stripes join at `rate` per hour.
    pub fn add_ramp(&mut self, ramp_start: f64, added: usize, rate: f64) {
        let horizon = self.rows.last().map_or(ramp_start, |r| r.end);
        let base = self.live_at(ramp_start);
        let ramp_end = if rate > 0.0 {
            (ramp_start + added as f64 / rate).min(horizon)
        } else {
            ramp_start
        };

        self.rows.retain(|r| r.start < ramp_start);
        if let Some(last) = self.rows.last_mut() {
            last.end = ramp_start;
        }
        if rate > 0.0 {
            self.rows.push(ScheduleRow {
                start: ramp_start,
                end: ramp_end,
                count: base,
                rate,
            });
        }
        self.rows.push(ScheduleRow {
            start: ramp_end,
            end: horizon,
            count: base + added,
            rate: 0.0,
        });
    }

    /// Live stripe count at time t
    #[must_use]
    pub fn live_at(&self, t: f64) -> usize {
        for row in &self.rows {
            if row.start <= t && t <= row.end {
                return (row.count as f64 + row.rate * (t - row.start)).ceil() as usize;
            }
        }
        self.final_count()
    }

    /// Population once every ramp has finished
    #[must_use]
    pub fn final_count(&self) -> usize {
        self.rows.last().map_or(0, |r| {
            (r.count as f64 + r.rate * (r.end - r.start)).ceil() as usize
        })
    }

    /// `∫ live(t) dt` over the horizon, the PUA denominator
    #[must_use]
    pub fn stripe_hours(&self) -> f64 {
        self.rows
            .iter()
            .map(|r| {
                let dur = r.end - r.start;
                r.count as f64 * dur + r.rate * dur * dur / 2.0
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_schedule() {
        let s = TotalSlicesSchedule::flat(1000, 100.0);
        assert_eq!(s.live_at(0.0), 1000);
        assert_eq!(s.live_at(99.0), 1000);
        assert_eq!(s.final_count(), 1000);
        assert!((s.stripe_hours() - 100_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_ramp() {
        let mut s = TotalSlicesSchedule::flat(1000, 100.0);
        s.add_ramp(10.0, 500, 50.0); // ramp over 10 hours

        assert_eq!(s.live_at(5.0), 1000);
        assert_eq!(s.live_at(15.0), 1250);
        assert_eq!(s.live_at(20.0), 1500);
        assert_eq!(s.live_at(90.0), 1500);
        assert_eq!(s.final_count(), 1500);

        // 10h flat + ramp (1000*10 + 50*100/2) + 80h at 1500
        let expected = 10_000.0 + 12_500.0 + 120_000.0;
        assert!((s.stripe_hours() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_instant_ramp() {
        let mut s = TotalSlicesSchedule::flat(100, 50.0);
        s.add_ramp(20.0, 100, 0.0);
        assert_eq!(s.live_at(19.0), 100);
        assert_eq!(s.live_at(21.0), 200);
        assert_eq!(s.final_count(), 200);
    }
}
