use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::Path,
};

use tracing::warn;

use super::Frame;

/// Appends every sent and received frame to `send.replay` and `recv.replay` in a directory.
/// Each record is the encoded frame preceded by its length as a little endian `u32`, so the
/// files can be replayed against an implementation outside of learning.
#[derive(Debug)]
pub struct FrameRecorder {
    sent: File,
    received: File,
}

impl FrameRecorder {
    pub fn create(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let open = |name: &str| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(name))
        };
        Ok(Self {
            sent: open("send.replay")?,
            received: open("recv.replay")?,
        })
    }

    fn append(file: &mut File, frame: &Frame) -> io::Result<()> {
        let bytes = frame.encode();
        file.write_all(&(bytes.len() as u32).to_le_bytes())?;
        file.write_all(&bytes)
    }

    pub fn record_sent(&mut self, frame: &Frame) {
        if let Err(e) = Self::append(&mut self.sent, frame) {
            warn!("could not record sent frame: {e}");
        }
    }

    pub fn record_received(&mut self, frame: &Frame) {
        if let Err(e) = Self::append(&mut self.received, frame) {
            warn!("could not record received frame: {e}");
        }
    }
}
