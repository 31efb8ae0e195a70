use statefuzz_core::symbol::AbstractInput;

/// Bookkeeping for a single step of a session.
#[derive(Debug, Clone)]
pub struct StepContext {
    index: usize,
    input: Option<AbstractInput>,
}

impl StepContext {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn input(&self) -> Option<&AbstractInput> {
        self.input.as_ref()
    }
}

/// Mutable state of one session, created by `pre()` and dropped when the next session starts.
/// Once execution is disabled it stays disabled until the context is dropped, every further
/// step of the session then yields the disabled output.
#[derive(Debug)]
pub struct ExecutionContext<S> {
    session: S,
    steps: Vec<StepContext>,
    enabled: bool,
}

impl<S> ExecutionContext<S> {
    pub fn new(session: S) -> Self {
        Self {
            session,
            steps: vec![],
            enabled: true,
        }
    }

    /// Opens the context for the next step and returns it.
    pub fn add_step_context(&mut self) -> &mut StepContext {
        let index = self.steps.len();
        self.steps.push(StepContext { index, input: None });
        &mut self.steps[index]
    }

    pub fn current_step(&self) -> Option<&StepContext> {
        self.steps.last()
    }

    pub(crate) fn set_current_input(&mut self, input: &AbstractInput) {
        if let Some(step) = self.steps.last_mut() {
            step.input = Some(input.clone());
        }
    }

    pub fn step_contexts(&self) -> &[StepContext] {
        &self.steps
    }

    /// Number of steps taken in this session so far.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn is_execution_enabled(&self) -> bool {
        self.enabled
    }

    pub fn disable_execution(&mut self) {
        self.enabled = false;
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }
}
