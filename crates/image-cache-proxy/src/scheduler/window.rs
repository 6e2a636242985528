//! Hour-of-day gate for scheduled conversion batches.

use chrono::{Local, Timelike};

use crate::config::ScheduleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub enabled: bool,
    pub use_range: bool,
    pub hour_start: u32,
    pub hour_end: u32,
}

impl From<&ScheduleConfig> for ScheduleWindow {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            enabled: config.enabled,
            use_range: config.use_range,
            hour_start: config.hour_start,
            hour_end: config.hour_end,
        }
    }
}

impl ScheduleWindow {
    /// Open at every hour.
    pub fn always() -> Self {
        Self {
            enabled: true,
            use_range: false,
            hour_start: 0,
            hour_end: 0,
        }
    }

    /// Start is inclusive and end exclusive. A start after the end wraps past
    /// midnight, so 22→6 covers 22:00 to 05:59. Equal bounds never open.
    pub fn contains_hour(&self, hour: u32) -> bool {
        if !self.enabled {
            return false;
        }
        if !self.use_range {
            return true;
        }

        if self.hour_start <= self.hour_end {
            hour >= self.hour_start && hour < self.hour_end
        } else {
            hour >= self.hour_start || hour < self.hour_end
        }
    }

    /// Evaluated against the local wall clock.
    pub fn is_open(&self) -> bool {
        self.contains_hour(Local::now().hour())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn window(start: u32, end: u32) -> ScheduleWindow {
        ScheduleWindow {
            enabled: true,
            use_range: true,
            hour_start: start,
            hour_end: end,
        }
    }

    #[rstest]
    #[case(22, 6, 23, true)]
    #[case(22, 6, 2, true)]
    #[case(22, 6, 22, true)]
    #[case(22, 6, 6, false)]
    #[case(22, 6, 12, false)]
    #[case(10, 14, 10, true)]
    #[case(10, 14, 13, true)]
    #[case(10, 14, 14, false)]
    #[case(10, 14, 9, false)]
    #[case(5, 5, 5, false)]
    fn test_contains_hour(
        #[case] start: u32,
        #[case] end: u32,
        #[case] hour: u32,
        #[case] expected: bool,
    ) {
        assert_eq!(window(start, end).contains_hour(hour), expected);
    }

    #[test]
    fn test_disabled_and_unranged() {
        let mut disabled = window(0, 23);
        disabled.enabled = false;
        assert!(!disabled.contains_hour(12));

        let mut unranged = window(22, 6);
        unranged.use_range = false;
        assert!(unranged.contains_hour(12));
        assert!(ScheduleWindow::always().is_open());
    }
}
