use std::{
    io::{BufRead, BufReader, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::Duration,
};

use statefuzz_core::symbol::{AbstractInput, AbstractOutput};
use tracing::{debug, trace};

use crate::{
    cleanup::CleanupTasks,
    connector::DynamicPort,
    sul::{Sul, SulError},
    SulConfig,
};

type Channel = Arc<Mutex<Option<BufReader<TcpStream>>>>;

/// Before every session, asks a launcher listening on a TCP side channel to reset the SUL and
/// waits for its acknowledgement. An acknowledgement consisting of a port number announces the
/// port the restarted SUL listens on.
#[derive(Debug)]
pub struct ResettingWrapper<S> {
    inner: S,
    address: String,
    port: u16,
    command_wait: Duration,
    ack_wait: Duration,
    dynamic_port: DynamicPort,
    channel: Channel,
}

impl<S: Sul> ResettingWrapper<S> {
    pub fn new(
        inner: S,
        port: u16,
        config: &SulConfig,
        dynamic_port: DynamicPort,
        tasks: &CleanupTasks,
    ) -> Self {
        let channel: Channel = Arc::default();
        let on_cleanup = Arc::clone(&channel);
        tasks.submit(move || {
            if let Some(reader) = on_cleanup.lock().unwrap_or_else(PoisonError::into_inner).take() {
                let _ = reader.get_ref().shutdown(Shutdown::Both);
                debug!("reset channel closed");
            }
        });
        Self {
            inner,
            address: config.reset_address.clone(),
            port,
            command_wait: config.reset_command_wait,
            ack_wait: config.reset_ack_wait,
            dynamic_port,
            channel,
        }
    }

    fn connect(&self) -> Result<BufReader<TcpStream>, SulError> {
        let target = (self.address.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| SulError::Reset(format!("cannot resolve {}: {e}", self.address)))?
            .next()
            .ok_or_else(|| SulError::Reset(format!("no address for {}", self.address)))?;
        let stream = TcpStream::connect_timeout(&target, self.ack_wait)
            .map_err(|e| SulError::Reset(format!("cannot connect to {target}: {e}")))?;
        stream
            .set_read_timeout(Some(self.ack_wait))
            .map_err(|e| SulError::Reset(e.to_string()))?;
        debug!("reset channel connected to {target}");
        Ok(BufReader::new(stream))
    }

    fn reset(&self) -> Result<(), SulError> {
        if !self.command_wait.is_zero() {
            thread::sleep(self.command_wait);
        }
        let mut channel = self.channel.lock().unwrap_or_else(PoisonError::into_inner);
        if channel.is_none() {
            *channel = Some(self.connect()?);
        }
        let Some(reader) = channel.as_mut() else {
            return Err(SulError::Reset("reset channel unavailable".to_string()));
        };

        reader
            .get_mut()
            .write_all(b"reset\n")
            .map_err(|e| SulError::Reset(format!("cannot send reset: {e}")))?;
        let mut ack = String::new();
        let read = reader
            .read_line(&mut ack)
            .map_err(|e| SulError::Reset(format!("no reset acknowledgement: {e}")))?;
        if read == 0 {
            *channel = None;
            return Err(SulError::Reset("reset channel closed by the launcher".to_string()));
        }

        let ack = ack.trim();
        trace!("reset acknowledged with `{ack}`");
        if let Ok(port) = ack.parse::<u16>() {
            debug!("SUL restarted on port {port}");
            self.dynamic_port.set(port);
        }
        Ok(())
    }
}

impl<S: Sul> Sul for ResettingWrapper<S> {
    fn pre(&mut self) -> Result<(), SulError> {
        self.reset()?;
        self.inner.pre()
    }

    fn step(&mut self, input: &AbstractInput) -> Result<AbstractOutput, SulError> {
        self.inner.step(input)
    }

    fn post(&mut self) -> Result<(), SulError> {
        self.inner.post()
    }
}
