use std::time::Duration;

use itertools::Itertools;

use crate::symbol::{AbstractInput, AbstractOutput};

/// Renders the length of an experiment: milliseconds below a second, seconds with millisecond
/// precision below a minute, and whole minutes and seconds or hours and minutes above that.
pub fn show_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match (secs / 3600, secs / 60 % 60, secs % 60) {
        (0, 0, 0) => format!("{}ms", duration.as_millis()),
        (0, 0, s) => format!("{s}.{:03}s", duration.subsec_millis()),
        (0, m, s) => format!("{m}m {s:02}s"),
        (h, m, _) => format!("{h}h {m:02}m"),
    }
}

/// Helper trait which can be used to display symbols, words and queries in logs.
pub trait Show {
    /// Returns a human readable representation of `self`.
    fn show(&self) -> String;

    /// Show a collection of the thing, for a word this is the space separated list of
    /// its symbols wrapped in brackets.
    fn show_collection<'a, I>(iter: I) -> String
    where
        Self: 'a,
        I: IntoIterator<Item = &'a Self>,
    {
        format!("[{}]", iter.into_iter().map(|x| x.show()).join(" "))
    }
}

impl Show for AbstractInput {
    fn show(&self) -> String {
        self.name().to_string()
    }
}

impl Show for AbstractOutput {
    fn show(&self) -> String {
        self.name().to_string()
    }
}

impl<S: Show> Show for [S] {
    fn show(&self) -> String {
        S::show_collection(self)
    }
}

impl<S: Show> Show for Vec<S> {
    fn show(&self) -> String {
        S::show_collection(self)
    }
}

impl Show for usize {
    fn show(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{show_duration, Show};
    use crate::symbol::AbstractOutput;

    #[test]
    fn durations() {
        assert_eq!(show_duration(Duration::from_micros(42)), "0ms");
        assert_eq!(show_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(show_duration(Duration::from_millis(1500)), "1.500s");
        assert_eq!(show_duration(Duration::from_secs(125)), "2m 05s");
        assert_eq!(show_duration(Duration::from_secs(90_000)), "25h 00m");
    }

    #[test]
    fn words() {
        let word = vec![AbstractOutput::new("ACK"), AbstractOutput::timeout()];
        assert_eq!(word.show(), "[ACK TIMEOUT]");
    }
}
