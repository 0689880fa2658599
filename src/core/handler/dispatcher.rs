// src/core/handler/dispatcher.rs

//! Decides which thread runs a pipeline: the caller's, or a bounded worker pool.

use super::registration::AnyPipeline;
use crate::connection::{ConnectionContext, Session};
use crate::core::NetError;
use crate::core::protocol::AnyValue;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, error, info};

/// Where pipeline runs execute.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// On the thread that triggered the message, usually an I/O thread.
    #[default]
    CurrentThread,
    /// On a bounded pool; the trigger returns before the handlers run.
    WorkerPool,
}

#[derive(Default)]
pub enum CommunicationDispatcher {
    #[default]
    CurrentThread,
    WorkerPool(WorkerPool),
}

impl CommunicationDispatcher {
    pub fn current_thread() -> Self {
        CommunicationDispatcher::CurrentThread
    }

    pub fn worker_pool(workers: usize) -> Result<Self, NetError> {
        Ok(CommunicationDispatcher::WorkerPool(WorkerPool::new(workers)?))
    }

    pub fn from_mode(mode: DispatchMode, workers: usize) -> Result<Self, NetError> {
        match mode {
            DispatchMode::CurrentThread => Ok(Self::current_thread()),
            DispatchMode::WorkerPool => Self::worker_pool(workers),
        }
    }

    pub fn mode(&self) -> DispatchMode {
        match self {
            CommunicationDispatcher::CurrentThread => DispatchMode::CurrentThread,
            CommunicationDispatcher::WorkerPool(_) => DispatchMode::WorkerPool,
        }
    }

    /// Runs `pipeline` for `value`.
    ///
    /// On the current thread, pipeline-level errors are returned. On the worker pool,
    /// only a closed pipeline is reported synchronously; failures inside the pooled
    /// run are logged.
    pub fn dispatch(
        &self,
        pipeline: Arc<dyn AnyPipeline>,
        context: Arc<ConnectionContext>,
        session: Arc<Session>,
        value: AnyValue,
    ) -> Result<(), NetError> {
        match self {
            CommunicationDispatcher::CurrentThread => {
                pipeline.run_any(&context, &session, &*value)
            }
            CommunicationDispatcher::WorkerPool(pool) => {
                if pipeline.is_closed() {
                    return Err(NetError::PipelineAccess(format!(
                        "pipeline for '{}' is closed",
                        pipeline.type_name()
                    )));
                }
                pool.execute(move || {
                    if let Err(e) = pipeline.run_any(&context, &session, &*value) {
                        error!(
                            "Pooled pipeline run for '{}' failed: {}",
                            pipeline.type_name(),
                            e
                        );
                    }
                })
            }
        }
    }

    /// Stops accepting work. Runs already handed to the pool may still complete.
    pub fn shutdown(&self) {
        if let CommunicationDispatcher::WorkerPool(pool) = self {
            pool.shutdown();
        }
    }
}

/// A bounded pool of blocking worker threads backed by a dedicated tokio runtime.
pub struct WorkerPool {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    workers: usize,
    stopped: AtomicBool,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self, NetError> {
        if workers == 0 {
            return Err(NetError::Config(
                "worker pool needs at least one thread".to_string(),
            ));
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers)
            .thread_name("commlink-worker")
            .build()?;
        let handle = runtime.handle().clone();
        info!("Dispatch worker pool started with {} thread(s)", workers);
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            workers,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn execute<F>(&self, task: F) -> Result<(), NetError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.stopped.load(Ordering::Acquire) {
            return Err(NetError::PipelineAccess(
                "dispatch worker pool is shut down".to_string(),
            ));
        }
        drop(self.handle.spawn_blocking(task));
        Ok(())
    }

    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
            debug!("Dispatch worker pool shut down");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
