use std::{path::PathBuf, time::Duration};

use statefuzz::SulConfig;
use statefuzz_core::symbol::AbstractOutput;

use crate::sanitizer::SanitizerPolicy;

/// Parameters of the oracle chains and the learning loop.
#[derive(Debug, Clone)]
pub struct LearningConfig {
    /// How often each membership query is executed, all runs have to agree.
    pub runs_per_membership_query: usize,
    /// How often a query that contradicts the observation tree is re-executed.
    pub membership_query_retries: usize,

    pub ce_sanitization: bool,
    pub ce_reruns: usize,
    pub probabilistic_sanitization: bool,
    pub skip_non_det_tests: bool,
    /// Store the answers to equivalence queries in the observation tree.
    pub cache_tests: bool,

    pub time_limit: Option<Duration>,
    pub test_limit: Option<i64>,
    pub round_limit: Option<usize>,

    /// Outputs after which the SUL is expected to repeat the same output forever.
    pub terminating_outputs: Vec<AbstractOutput>,
    /// What a dead SUL answers after a terminating output, see [`SulConfig::sink_output`].
    pub sink_output: AbstractOutput,

    /// Random words equivalence oracle.
    pub min_length: usize,
    pub max_length: usize,
    pub queries: usize,
    pub seed: u64,

    pub query_file: Option<PathBuf>,
    pub non_det_file: Option<PathBuf>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            runs_per_membership_query: 1,
            membership_query_retries: 3,
            ce_sanitization: true,
            ce_reruns: 3,
            probabilistic_sanitization: true,
            skip_non_det_tests: false,
            cache_tests: false,
            time_limit: None,
            test_limit: None,
            round_limit: None,
            terminating_outputs: vec![AbstractOutput::socket_closed()],
            sink_output: AbstractOutput::socket_closed(),
            min_length: 5,
            max_length: 15,
            queries: 1000,
            seed: 0,
            query_file: None,
            non_det_file: None,
        }
    }
}

impl LearningConfig {
    /// The defaults, with the cache expecting the sink output that `sul` is wrapped with.
    pub fn for_sul(sul: &SulConfig) -> Self {
        Self {
            sink_output: sul.sink_output(),
            ..Self::default()
        }
    }

    pub fn sanitizer_policy(&self) -> SanitizerPolicy {
        SanitizerPolicy {
            probabilistic: self.probabilistic_sanitization,
            reruns: self.ce_reruns,
            skip_non_det: self.skip_non_det_tests,
        }
    }
}
