//! Periodic sync task
//!
//! A dedicated thread that calls a tick closure every interval until stopped.

use log::{debug, warn};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub(crate) struct SyncTask {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SyncTask {
    pub fn start<F>(interval: Duration, tick: F) -> std::io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("authfile-sync".into())
            .spawn(move || {
                debug!("Periodic sync every {interval:?}");
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => tick(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Periodic sync stopped");
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stops the timer thread and waits for it to exit.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Sync timer thread panicked");
            }
        }
    }
}

impl Drop for SyncTask {
    fn drop(&mut self) {
        self.stop();
    }
}
