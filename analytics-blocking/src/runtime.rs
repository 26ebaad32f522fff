use analytics_core::{Error, Result};
use std::{
    future::Future,
    sync::{Arc, Mutex},
};
use tokio::{
    runtime::{Builder, Runtime},
    task::JoinHandle,
};

/// Background runtime the blocking facade runs the async client on.
///
/// Shared through `Arc` by every blocking object created from it. Once
/// [`shutdown`](BlockingRuntime::shutdown) is called all of them fail with a
/// closed error instead of waiting.
pub struct BlockingRuntime {
    runtime: Mutex<Option<Runtime>>,
}

impl BlockingRuntime {
    pub fn new() -> Result<Arc<Self>> {
        let runtime = Builder::new_multi_thread()
            .thread_name("analytics-blocking")
            .enable_all()
            .build()
            .map_err(|e| {
                let error = Error::closed("Could not start the background runtime").with_source(e);
                log::error!("{:#}", error);
                error
            })?;
        Ok(Arc::new(Self {
            runtime: Mutex::new(Some(runtime)),
        }))
    }

    /// Process wide runtime, started on first use and again after a shutdown.
    pub fn global() -> Result<Arc<Self>> {
        static GLOBAL: Mutex<Option<Arc<BlockingRuntime>>> = Mutex::new(None);
        let mut global = GLOBAL
            .lock()
            .map_err(|_| Error::closed("The global background runtime is poisoned"))?;
        if let Some(runtime) = global.as_ref()
            && !runtime.is_closed()
        {
            return Ok(runtime.clone());
        }
        let runtime = Self::new()?;
        *global = Some(runtime.clone());
        Ok(runtime)
    }

    pub fn spawn<F>(&self, future: F) -> Result<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let runtime = self
            .runtime
            .lock()
            .map_err(|_| Error::closed("The background runtime is poisoned"))?;
        match runtime.as_ref() {
            Some(runtime) => Ok(runtime.spawn(future)),
            None => Err(Error::closed("The background runtime is shut down")),
        }
    }

    /// Runs `future` on the background runtime and waits for its output.
    ///
    /// Must not be called from a thread of the runtime itself.
    pub fn block_on<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = flume::bounded(1);
        self.spawn(async move {
            let _ = tx.send_async(future.await).await;
        })?;
        rx.recv().map_err(|_| {
            Error::closed("The background runtime was shut down before the call completed")
        })?
    }

    /// Stops the runtime, dropping every task still running on it.
    pub fn shutdown(&self) {
        let runtime = self.runtime.lock().ok().and_then(|mut v| v.take());
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
            log::debug!("Background runtime shut down");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.runtime.lock().map(|v| v.is_none()).unwrap_or(true)
    }
}

impl Drop for BlockingRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
