use std::{
    io::{BufRead, BufReader, Read},
    path::PathBuf,
    process::{Child, Command, Stdio},
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::Duration,
};

use statefuzz_core::symbol::{AbstractInput, AbstractOutput};
use tracing::{debug, info, warn};

use crate::{
    cleanup::CleanupTasks,
    config::ProcessTrigger,
    sul::{Sul, SulError},
    SulConfig,
};

/// Launches and terminates the SUL process. The child is shared with a cleanup task so it is
/// killed on every exit path.
#[derive(Debug, Clone)]
pub struct ProcessHandler {
    command: String,
    terminate_command: Option<String>,
    dir: Option<PathBuf>,
    run_wait: Duration,
    child: Arc<Mutex<Option<Child>>>,
}

fn command_line(line: &str) -> Result<Command, SulError> {
    let mut parts = line.split_whitespace();
    let program = parts.next().ok_or_else(|| {
        SulError::Process(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty command",
        ))
    })?;
    let mut command = Command::new(program);
    command.args(parts);
    Ok(command)
}

fn forward<R: Read + Send + 'static>(stream: R, name: &'static str) {
    let spawned = thread::Builder::new()
        .name(format!("sfz-{name}"))
        .spawn(move || {
            for line in BufReader::new(stream).lines().map_while(Result::ok) {
                debug!(target: "statefuzz::process", "[{name}] {line}");
            }
        });
    if let Err(e) = spawned {
        warn!("could not forward process {name}: {e}");
    }
}

impl ProcessHandler {
    pub fn new(command: impl Into<String>, config: &SulConfig) -> Self {
        Self {
            command: command.into(),
            terminate_command: config.terminate_command.clone(),
            dir: config.process_dir.clone(),
            run_wait: config.run_wait,
            child: Arc::new(Mutex::new(None)),
        }
    }

    /// Kills the child in `tasks`, whatever way the run ends.
    pub fn register(&self, tasks: &CleanupTasks) {
        let child = Arc::clone(&self.child);
        tasks.submit(move || {
            if let Some(mut child) = child.lock().unwrap_or_else(PoisonError::into_inner).take() {
                let _ = child.kill();
                let _ = child.wait();
            }
        });
    }

    pub fn is_running(&self) -> bool {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        match child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                debug!("SUL process exited with {status}");
                false
            }
            Some(Err(_)) | None => false,
        }
    }

    pub fn launch(&self) -> Result<(), SulError> {
        if self.is_running() {
            return Ok(());
        }
        let mut command = command_line(&self.command)?;
        if let Some(dir) = self.dir.as_ref() {
            command.current_dir(dir);
        }
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(SulError::Process)?;
        info!("launched `{}` as process {}", self.command, child.id());
        if let Some(stdout) = child.stdout.take() {
            forward(stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            forward(stderr, "stderr");
        }
        *self.child.lock().unwrap_or_else(PoisonError::into_inner) = Some(child);

        if !self.run_wait.is_zero() {
            thread::sleep(self.run_wait);
        }
        Ok(())
    }

    pub fn terminate(&self) -> Result<(), SulError> {
        let Some(mut child) = self.child.lock().unwrap_or_else(PoisonError::into_inner).take()
        else {
            return Ok(());
        };
        if let Some(line) = self.terminate_command.as_deref() {
            let status = command_line(line)?.status().map_err(SulError::Process)?;
            debug!("terminate command exited with {status}");
        }
        if let Ok(None) = child.try_wait() {
            child.kill().map_err(SulError::Process)?;
        }
        child.wait().map_err(SulError::Process)?;
        debug!("SUL process {} terminated", child.id());
        Ok(())
    }
}

/// Runs the SUL as a child process, either a fresh one per test or one for the whole run.
/// Outputs observed while the process is not running are marked as not alive.
#[derive(Debug)]
pub struct ProcessWrapper<S> {
    inner: S,
    handler: ProcessHandler,
    trigger: ProcessTrigger,
}

impl<S: Sul> ProcessWrapper<S> {
    pub fn new(inner: S, handler: ProcessHandler, trigger: ProcessTrigger, tasks: &CleanupTasks) -> Self {
        handler.register(tasks);
        Self {
            inner,
            handler,
            trigger,
        }
    }
}

impl<S: Sul> Sul for ProcessWrapper<S> {
    fn pre(&mut self) -> Result<(), SulError> {
        self.handler.launch()?;
        self.inner.pre()
    }

    fn step(&mut self, input: &AbstractInput) -> Result<AbstractOutput, SulError> {
        let mut output = self.inner.step(input)?;
        if !self.handler.is_running() {
            output.set_alive(false);
        }
        Ok(output)
    }

    fn post(&mut self) -> Result<(), SulError> {
        let result = self.inner.post();
        if self.trigger == ProcessTrigger::NewTest {
            self.handler.terminate()?;
        }
        result
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test_log::test]
    fn launch_and_terminate() {
        let handler = ProcessHandler::new("sleep 5", &SulConfig::default());
        handler.launch().unwrap();
        assert!(handler.is_running());
        handler.terminate().unwrap();
        assert!(!handler.is_running());
    }

    #[test]
    fn cleanup_kills_the_process() {
        let tasks = CleanupTasks::new();
        let handler = ProcessHandler::new("sleep 5", &SulConfig::default());
        handler.register(&tasks);
        handler.launch().unwrap();
        tasks.execute();
        assert!(!handler.is_running());
    }

    #[test]
    fn exited_process_is_not_running() {
        let handler = ProcessHandler::new("true", &SulConfig::default());
        handler.launch().unwrap();
        thread::sleep(Duration::from_millis(200));
        assert!(!handler.is_running());
    }
}
