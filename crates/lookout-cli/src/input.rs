//! Console key input: first character of each stdin line, plus a stop flag
//! raised by Ctrl-C.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use lookout_core::KeyInput;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct ConsoleInput {
    keys: Receiver<char>,
    stop: Arc<AtomicBool>,
    quit_key: char,
}

impl ConsoleInput {
    /// Start a background stdin reader feeding key presses.
    pub fn spawn(stop: Arc<AtomicBool>, quit_key: char) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        std::thread::Builder::new()
            .name("lookout-stdin".into())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if let Some(key) = line.trim().chars().next() {
                        if tx.send(key).is_err() {
                            break;
                        }
                    }
                }
                tracing::debug!("stdin closed; keyboard input disabled");
            })?;
        Ok(Self::from_channel(rx, stop, quit_key))
    }

    pub fn from_channel(keys: Receiver<char>, stop: Arc<AtomicBool>, quit_key: char) -> Self {
        Self {
            keys,
            stop,
            quit_key,
        }
    }
}

impl KeyInput for ConsoleInput {
    fn poll_key(&mut self, timeout: Duration) -> Option<char> {
        if self.stop.load(Ordering::SeqCst) {
            return Some(self.quit_key);
        }
        match self.keys.recv_timeout(timeout) {
            Ok(key) => Some(key),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}
