//! Worker loop
//!
//! Each worker pulls jobs from the shared queue until every sender is gone
//! and the queue is empty, so jobs accepted before shutdown always run.

use log::{debug, error};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::pool::Job;

pub(crate) fn spawn(
    id: usize,
    queue: Arc<Mutex<Receiver<Job>>>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("authfile-worker-{id}"))
        .spawn(move || run(id, queue))
}

fn run(id: usize, queue: Arc<Mutex<Receiver<Job>>>) {
    debug!("Worker {id} started");
    loop {
        // The guard is dropped at the end of this statement, before the job runs.
        let next = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();

        match next {
            Ok(job) => {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("Worker {id}: job panicked");
                }
            }
            Err(_) => break,
        }
    }
    debug!("Worker {id} stopped");
}
