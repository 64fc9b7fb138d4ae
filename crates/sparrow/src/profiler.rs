// Profiler: stage timings of weight loading and inference
//
// The engine records one event per stage execution:
//
//   load        reading and packing the weight file
//   preprocess  device allocation, first upload and input decoding
//   layer       one layer step (propagate, compact, reset, transfer wait)
//   identify    final class selection
//
// Events with the same name are aggregated in the report.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// A single recorded stage execution.
#[derive(Debug, Clone)]
pub struct ProfileEvent {
    pub name: String,
    pub duration: Duration,
}

/// Collects named timing events.
///
/// # Example
/// ```
/// use sparrow::profiler::Profiler;
///
/// let mut prof = Profiler::new();
/// let sum: u64 = prof.measure("layer", || (0..100u64).sum());
/// assert_eq!(sum, 4950);
/// assert_eq!(prof.report().entries[0].count, 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Profiler {
    events: Vec<ProfileEvent>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an already measured duration.
    pub fn record(&mut self, name: &str, duration: Duration) {
        self.events.push(ProfileEvent {
            name: name.to_string(),
            duration,
        });
    }

    /// Run `f` and record its wall-clock time under `name`.
    pub fn measure<F, R>(&mut self, name: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.record(name, start.elapsed());
        result
    }

    pub fn events(&self) -> &[ProfileEvent] {
        &self.events
    }

    /// Sum of all recorded durations.
    pub fn total_time(&self) -> Duration {
        self.events.iter().map(|e| e.duration).sum()
    }

    /// Total time recorded under `name`.
    pub fn stage_time(&self, name: &str) -> Duration {
        self.events
            .iter()
            .filter(|e| e.name == name)
            .map(|e| e.duration)
            .sum()
    }

    /// Aggregate the events by name, slowest stage first.
    pub fn report(&self) -> ProfileReport {
        let mut by_name: HashMap<&str, Vec<Duration>> = HashMap::new();
        for ev in &self.events {
            by_name.entry(ev.name.as_str()).or_default().push(ev.duration);
        }

        let mut entries: Vec<ProfileEntry> = by_name
            .into_iter()
            .map(|(name, durations)| {
                let count = durations.len();
                let total: Duration = durations.iter().sum();
                ProfileEntry {
                    name: name.to_string(),
                    count,
                    total,
                    min: durations.iter().min().copied().unwrap_or_default(),
                    max: durations.iter().max().copied().unwrap_or_default(),
                    avg: total / count as u32,
                }
            })
            .collect();
        entries.sort_by(|a, b| b.total.cmp(&a.total));

        ProfileReport {
            entries,
            total: self.total_time(),
        }
    }
}

/// Aggregated statistics for one stage name.
#[derive(Debug, Clone)]
pub struct ProfileEntry {
    pub name: String,
    pub count: usize,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
}

/// A formatted profiling report, printed with `Display`.
#[derive(Debug, Clone)]
pub struct ProfileReport {
    pub entries: Vec<ProfileEntry>,
    pub total: Duration,
}

impl fmt::Display for ProfileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<12} {:>6} {:>12} {:>12} {:>12} {:>12} {:>7}",
            "Stage", "Count", "Total", "Avg", "Min", "Max", "%"
        )?;
        for entry in &self.entries {
            let pct = if self.total.as_nanos() > 0 {
                entry.total.as_nanos() as f64 / self.total.as_nanos() as f64 * 100.0
            } else {
                0.0
            };
            writeln!(
                f,
                "{:<12} {:>6} {:>12.2?} {:>12.2?} {:>12.2?} {:>12.2?} {:>6.1}%",
                entry.name, entry.count, entry.total, entry.avg, entry.min, entry.max, pct
            )?;
        }
        write!(f, "Total: {:.2?}", self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_aggregates_by_name() {
        let mut prof = Profiler::new();
        prof.record("layer", Duration::from_millis(2));
        prof.record("layer", Duration::from_millis(4));
        prof.record("identify", Duration::from_millis(1));

        let report = prof.report();
        assert_eq!(report.entries.len(), 2);
        let layer = &report.entries[0];
        assert_eq!(layer.name, "layer");
        assert_eq!(layer.count, 2);
        assert_eq!(layer.total, Duration::from_millis(6));
        assert_eq!(layer.avg, Duration::from_millis(3));
        assert_eq!(layer.min, Duration::from_millis(2));
        assert_eq!(report.total, Duration::from_millis(7));
        assert_eq!(prof.stage_time("identify"), Duration::from_millis(1));
    }

    #[test]
    fn test_report_display() {
        let mut prof = Profiler::new();
        prof.record("load", Duration::from_micros(10));
        let text = prof.report().to_string();
        assert!(text.contains("load"));
        assert!(text.contains("Total"));
    }
}
