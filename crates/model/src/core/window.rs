use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Extraction window over a watermark column: `from < value <= to`.
///
/// The lower bound is exclusive and the upper bound inclusive, so adjacent
/// windows `(a, b]` and `(b, c]` partition the timeline with no overlap and
/// no gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl WatermarkWindow {
    /// Returns `None` when `to` is before `from`.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Option<Self> {
        (to >= from).then_some(Self { from, to })
    }

    pub fn contains(&self, value: &DateTime<Utc>) -> bool {
        *value > self.from && *value <= self.to
    }

    pub fn is_empty(&self) -> bool {
        self.to <= self.from
    }

    /// The window that follows this one once `to` has been committed.
    pub fn next(&self, to: DateTime<Utc>) -> Option<Self> {
        Self::new(self.to, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn rejects_inverted_bounds() {
        assert!(WatermarkWindow::new(at(2), at(1)).is_none());
        assert!(WatermarkWindow::new(at(1), at(1)).unwrap().is_empty());
    }

    #[test]
    fn lower_bound_exclusive_upper_bound_inclusive() {
        let window = WatermarkWindow::new(at(1), at(2)).unwrap();
        assert!(!window.contains(&at(1)));
        assert!(window.contains(&(at(1) + Duration::microseconds(1))));
        assert!(window.contains(&at(2)));
        assert!(!window.contains(&(at(2) + Duration::microseconds(1))));
    }

    #[test]
    fn adjacent_windows_extract_boundary_row_once() {
        let first = WatermarkWindow::new(at(1), at(2)).unwrap();
        let second = first.next(at(3)).unwrap();

        let rows = [at(1), at(2), at(3)];
        for row in rows.iter().skip(1) {
            let hits = [first, second].iter().filter(|w| w.contains(row)).count();
            assert_eq!(hits, 1, "row {row} must land in exactly one window");
        }
        // The row sitting on the very first lower bound was extracted earlier.
        assert!(!first.contains(&rows[0]) && !second.contains(&rows[0]));
    }
}
