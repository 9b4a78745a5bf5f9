//! Worker threads.
//!
//! Each worker loops over the shared ready queue and resumes whatever it
//! receives, until its finish channel is signalled.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::scheduler::Shared;

struct WorkerThread {
    finish_tx: Sender<()>,
    join_handle: JoinHandle<()>,
}

impl WorkerThread {
    fn spawn(shared: Arc<Shared>, name: String, index: usize) -> Result<Self, SchedulerError> {
        let (finish_tx, finish_rx) = crossbeam_channel::bounded(1);
        let ready_rx = shared.ready_rx.clone();

        let join_handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                debug!(worker = index, "worker started");
                loop {
                    crossbeam_channel::select! {
                        recv(ready_rx) -> msg => match msg {
                            Ok(runnable) => shared.run_one(runnable),
                            Err(_) => break,
                        },
                        recv(finish_rx) -> _ => break,
                    }
                }
                debug!(worker = index, "worker stopped");
            })
            .map_err(|source| SchedulerError::Spawn { index, source })?;

        Ok(Self {
            finish_tx,
            join_handle,
        })
    }
}

/// The fixed set of threads draining the ready queue.
pub(crate) struct WorkerPool {
    workers: Vec<WorkerThread>,
}

impl WorkerPool {
    pub(crate) fn spawn(shared: &Arc<Shared>, config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let mut pool = Self {
            workers: Vec::with_capacity(config.worker_count),
        };
        for index in 0..config.worker_count {
            let name = format!("{}-{index}", config.thread_name);
            match WorkerThread::spawn(shared.clone(), name, index) {
                Ok(worker) => pool.workers.push(worker),
                Err(err) => {
                    pool.finish();
                    return Err(err);
                }
            }
        }
        Ok(pool)
    }

    /// Signal every worker and wait for them to exit.
    pub(crate) fn finish(self) {
        for worker in &self.workers {
            let _ = worker.finish_tx.send(());
        }
        for (index, worker) in self.workers.into_iter().enumerate() {
            if worker.join_handle.join().is_err() {
                warn!(worker = index, "worker thread panicked");
            }
        }
    }
}
