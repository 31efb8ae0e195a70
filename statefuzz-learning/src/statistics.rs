use std::{fmt::Display, time::Duration};

use statefuzz::wrapper::Counter;
use statefuzz_core::show_duration;

/// A snapshot of the cost and progress of a learning run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Inputs executed on the SUL.
    pub inputs: u64,
    /// Sessions started on the SUL.
    pub resets: u64,
    pub rounds: usize,
    pub counterexamples: usize,
    /// States of the last hypothesis.
    pub states: usize,
    pub duration: Duration,
}

/// Collects [`Statistics`] from the counters of a wrapped SUL.
#[derive(Debug, Clone, Default)]
pub struct StatisticsTracker {
    symbols: Option<Counter>,
    resets: Option<Counter>,
}

impl StatisticsTracker {
    pub fn new(symbols: Counter, resets: Counter) -> Self {
        Self {
            symbols: Some(symbols),
            resets: Some(resets),
        }
    }

    pub fn snapshot(
        &self,
        rounds: usize,
        counterexamples: usize,
        states: usize,
        duration: Duration,
    ) -> Statistics {
        Statistics {
            inputs: self.symbols.as_ref().map_or(0, Counter::get),
            resets: self.resets.as_ref().map_or(0, Counter::get),
            rounds,
            counterexamples,
            states,
            duration,
        }
    }
}

impl Display for Statistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut builder = tabled::builder::Builder::default();
        builder.push_record(["inputs".to_string(), self.inputs.to_string()]);
        builder.push_record(["resets".to_string(), self.resets.to_string()]);
        builder.push_record(["rounds".to_string(), self.rounds.to_string()]);
        builder.push_record([
            "counterexamples".to_string(),
            self.counterexamples.to_string(),
        ]);
        builder.push_record(["states".to_string(), self.states.to_string()]);
        builder.push_record(["duration".to_string(), show_duration(self.duration)]);
        write!(
            f,
            "{}",
            builder.build().with(tabled::settings::Style::rounded())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reads_counters() {
        let (symbols, resets) = (Counter::new(), Counter::new());
        let tracker = StatisticsTracker::new(symbols.clone(), resets.clone());
        symbols.increment();
        symbols.increment();
        resets.increment();
        let stats = tracker.snapshot(2, 1, 3, Duration::from_millis(1500));
        assert_eq!((stats.inputs, stats.resets), (2, 1));

        let rendered = stats.to_string();
        assert!(rendered.contains("counterexamples"));
        assert!(rendered.contains("1.500s"));
        assert_eq!(StatisticsTracker::default().snapshot(0, 0, 1, Duration::ZERO).inputs, 0);
    }
}
