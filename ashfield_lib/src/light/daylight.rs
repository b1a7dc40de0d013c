//! Ambient daylight interpolation over the 1440-minute day.

use serde::{Deserialize, Serialize};

/// Minutes in one day.
const DAY_MINUTES: i32 = 1440;

/// Minute-of-day breakpoints and channel values for ambient daylight.
///
/// Four breakpoints split the day into segments; colors interpolate
/// linearly between neighboring breakpoints, wrapping across midnight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayPlan {
    /// Breakpoints in minutes since midnight, ascending.
    pub times: [i32; 4],
    /// Red channel value at each breakpoint.
    pub red: [u8; 4],
    /// Green channel value at each breakpoint.
    pub green: [u8; 4],
    /// Blue channel value at each breakpoint.
    pub blue: [u8; 4],
}

impl Default for DayPlan {
    fn default() -> Self {
        DayPlan {
            times: [300, 600, 1140, 1380],
            red: [18, 128, 103, 51],
            green: [18, 128, 95, 40],
            blue: [53, 128, 86, 29],
        }
    }
}

impl DayPlan {
    /// Ambient color at the given minute of day.
    ///
    /// Integer interpolation between the two breakpoints surrounding the
    /// minute; the last segment wraps through midnight back to the first
    /// breakpoint.
    #[must_use]
    pub fn color_at(&self, minute: i32) -> [u8; 3] {
        let (segment, elapsed, duration) = self.segment_at(minute);
        let next = if segment < 3 { segment + 1 } else { 0 };
        let lerp = |channel: [u8; 4]| {
            let a = i32::from(channel[segment]);
            let b = i32::from(channel[next]);
            (a + (b - a) * elapsed / duration) as u8
        };
        [lerp(self.red), lerp(self.green), lerp(self.blue)]
    }

    /// Light capacity (0..=100) at the given minute of day.
    ///
    /// Point lights contribute in proportion to how far the ambient color
    /// has dropped from its daily maximum: 0 in full daylight, rising
    /// toward 100 in the darkest hour.
    #[must_use]
    pub fn capacity_at(&self, minute: i32) -> i32 {
        let color = self.color_at(minute);
        let avg = |channel: [u8; 4], pick: fn(u8, u8) -> u8| {
            channel
                .iter()
                .copied()
                .reduce(pick)
                .map_or(0, i32::from)
        };
        let max_avg = (avg(self.red, u8::max) + avg(self.green, u8::max) + avg(self.blue, u8::max)) / 3;
        let min_avg = (avg(self.red, u8::min) + avg(self.green, u8::min) + avg(self.blue, u8::min)) / 3;
        let cur_avg = (i32::from(color[0]) + i32::from(color[1]) + i32::from(color[2])) / 3;
        if max_avg == min_avg {
            return 0;
        }
        ((max_avg - cur_avg) * 100 / (max_avg - min_avg)).clamp(0, 100)
    }

    /// Segment index, minutes elapsed into it and its total duration.
    fn segment_at(&self, minute: i32) -> (usize, i32, i32) {
        let t = minute.rem_euclid(DAY_MINUTES);
        let times = self.times;
        let (segment, elapsed, duration) = if t >= times[0] && t < times[1] {
            (0, t - times[0], times[1] - times[0])
        } else if t >= times[1] && t < times[2] {
            (1, t - times[1], times[2] - times[1])
        } else if t >= times[2] && t < times[3] {
            (2, t - times[2], times[3] - times[2])
        } else {
            let elapsed = if t >= times[3] {
                t - times[3]
            } else {
                t + DAY_MINUTES - times[3]
            };
            (3, elapsed, (DAY_MINUTES - times[3]) + times[0])
        };
        (segment, elapsed, duration.max(1))
    }
}
