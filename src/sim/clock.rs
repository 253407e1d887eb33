use chrono::{NaiveDateTime, TimeDelta};

/// A control clock that walks simulated time in fixed control intervals.
///
/// The final interval is clamped to the end time, so a simulation whose
/// duration is not a multiple of the control step still ends exactly on
/// `end`.
///
/// # Examples
///
/// ```
/// use chrono::{NaiveDate, TimeDelta};
/// use storm_mpc::sim::clock::ControlClock;
///
/// let start = NaiveDate::from_ymd_opt(2024, 6, 1)
///     .and_then(|d| d.and_hms_opt(0, 0, 0))
///     .unwrap();
/// let mut clock = ControlClock::new(start, start + TimeDelta::minutes(25), TimeDelta::minutes(10));
///
/// assert_eq!(clock.steps_remaining(), 3);
/// let mut ticks = 0;
/// while clock.tick().is_some() {
///     ticks += 1;
/// }
/// assert_eq!(ticks, 3);
/// assert!(clock.is_finished());
/// ```
#[derive(Debug, Clone)]
pub struct ControlClock {
    /// Formal start of the simulation
    start: NaiveDateTime,
    /// Formal end of the simulation
    end: NaiveDateTime,
    /// Length of one control interval
    step: TimeDelta,
    /// Current simulated instant
    current: NaiveDateTime,
}

impl ControlClock {
    /// Creates a clock positioned at `start`.
    ///
    /// # Panics
    ///
    /// Panics if `end < start` or `step` is shorter than one millisecond.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime, step: TimeDelta) -> Self {
        Self::resume(start, end, step, start)
    }

    /// Creates a clock positioned at `current`, used when resuming from a snapshot.
    ///
    /// # Panics
    ///
    /// Panics if `end < start`, `step` is shorter than one millisecond, or
    /// `current` lies outside `[start, end]`.
    pub fn resume(
        start: NaiveDateTime,
        end: NaiveDateTime,
        step: TimeDelta,
        current: NaiveDateTime,
    ) -> Self {
        assert!(end >= start, "end must not precede start");
        assert!(
            step >= TimeDelta::milliseconds(1),
            "control step must be at least 1 ms"
        );
        assert!(current >= start && current <= end, "current outside run");
        Self {
            start,
            end,
            step,
            current,
        }
    }

    /// Advances the clock by one control interval.
    ///
    /// # Returns
    ///
    /// * `Some((from, to))` - The interval just covered, `to` clamped to the end time
    /// * `None` - If the clock has already reached the end
    pub fn tick(&mut self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        if self.is_finished() {
            return None;
        }
        let from = self.current;
        let to = (from + self.step).min(self.end);
        self.current = to;
        Some((from, to))
    }

    /// Number of control intervals left, counting a trailing partial interval.
    pub fn steps_remaining(&self) -> usize {
        let remaining_ms = (self.end - self.current).num_milliseconds();
        let step_ms = self.step.num_milliseconds();
        if remaining_ms <= 0 {
            return 0;
        }
        ((remaining_ms + step_ms - 1) / step_ms) as usize
    }

    pub fn is_finished(&self) -> bool {
        self.current >= self.end
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn step(&self) -> TimeDelta {
        self.step
    }

    pub fn current(&self) -> NaiveDateTime {
        self.current
    }
}
