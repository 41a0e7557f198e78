//! Bounded per-channel point buffer.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Points kept per channel.
pub const BUFFER_CAPACITY: usize = 500;

/// Ring buffer of (time, value) points. Once full, the oldest points are dropped.
#[derive(Debug, Clone)]
pub struct SeriesBuffer {
    points: VecDeque<(DateTime<Utc>, f64)>,
    capacity: usize,
}

impl SeriesBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity.min(32)),
            capacity: capacity.max(1),
        }
    }

    /// Append the points newer than the newest buffered one. Returns how many
    /// were added.
    pub fn append_newer(&mut self, times: &[DateTime<Utc>], values: &[f64]) -> usize {
        let newest = self.points.back().map(|(t, _)| *t);
        let mut added = 0;
        for (t, v) in times.iter().zip(values) {
            if newest.is_some_and(|n| *t <= n) {
                continue;
            }
            self.push(*t, *v);
            added += 1;
        }
        added
    }

    /// Replace the contents, keeping only the newest `capacity` points.
    pub fn replace(&mut self, times: &[DateTime<Utc>], values: &[f64]) {
        self.points.clear();
        for (t, v) in times.iter().zip(values) {
            self.push(*t, *v);
        }
    }

    fn push(&mut self, t: DateTime<Utc>, v: f64) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back((t, v));
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last_value(&self) -> Option<f64> {
        self.points.back().map(|(_, v)| *v)
    }

    pub fn times(&self) -> Vec<DateTime<Utc>> {
        self.points.iter().map(|(t, _)| *t).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|(_, v)| *v).collect()
    }
}

impl Default for SeriesBuffer {
    fn default() -> Self {
        Self::new(BUFFER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    #[test]
    fn test_append_skips_known_points() {
        let mut buf = SeriesBuffer::new(10);
        assert_eq!(buf.append_newer(&[at(0), at(1)], &[1.0, 2.0]), 2);
        assert_eq!(buf.append_newer(&[at(0), at(1), at(2)], &[1.0, 2.0, 3.0]), 1);
        assert_eq!(buf.values(), vec![1.0, 2.0, 3.0]);
        assert_eq!(buf.last_value(), Some(3.0));
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut buf = SeriesBuffer::new(3);
        let times: Vec<_> = (0..5).map(at).collect();
        buf.append_newer(&times, &[0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.times(), vec![at(2), at(3), at(4)]);
    }

    #[test]
    fn test_replace() {
        let mut buf = SeriesBuffer::new(2);
        buf.append_newer(&[at(0)], &[9.0]);
        buf.replace(&[at(5), at(6), at(7)], &[5.0, 6.0, 7.0]);
        assert_eq!(buf.values(), vec![6.0, 7.0]);

        buf.replace(&[], &[]);
        assert!(buf.is_empty());
        assert_eq!(buf.last_value(), None);
    }

    #[test]
    fn test_default_capacity() {
        let mut buf = SeriesBuffer::default();
        let times: Vec<_> = (0..600).map(at).collect();
        let values: Vec<_> = (0..600).map(|i| i as f64).collect();
        buf.append_newer(&times, &values);
        assert_eq!(buf.len(), BUFFER_CAPACITY);
        assert_eq!(buf.values()[0], 100.0);
    }
}
