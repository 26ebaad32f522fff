use crate::{BlockingQueryResult, BlockingRuntime};
use analytics_core::{
    Cluster, ClusterOptions, Credential, Error, HttpTransport, QueryOptions, QueryResult, Result,
    Scope,
};
use std::{future::Future, sync::Arc};
use tokio::task::AbortHandle;

/// Blocking entry point, running a [`Cluster`] on a [`BlockingRuntime`].
///
/// ```no_run
/// use analytics_blocking::BlockingCluster;
/// use analytics_core::{ClusterOptions, Credential, QueryOptions};
/// # fn run() -> analytics_core::Result<()> {
/// let cluster = BlockingCluster::new(
///     "https://analytics.example.com",
///     Credential::from_username_and_password("Administrator", "password"),
///     ClusterOptions::default(),
/// )?;
/// let mut result = cluster.execute_query("SELECT 1", QueryOptions::default())?;
/// for row in result.rows() {
///     println!("{}", row?);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BlockingCluster {
    cluster: Cluster,
    runtime: Arc<BlockingRuntime>,
}

impl BlockingCluster {
    /// Builds a cluster running on the process wide runtime.
    pub fn new(endpoint: &str, credential: Credential, options: ClusterOptions) -> Result<Self> {
        Self::with_runtime(endpoint, credential, options, BlockingRuntime::global()?)
    }

    pub fn with_runtime(
        endpoint: &str,
        credential: Credential,
        options: ClusterOptions,
        runtime: Arc<BlockingRuntime>,
    ) -> Result<Self> {
        Ok(Self::from_cluster(
            Cluster::new(endpoint, credential, options)?,
            runtime,
        ))
    }

    pub fn with_transport(
        endpoint: &str,
        credential: Credential,
        options: ClusterOptions,
        transport: Arc<dyn HttpTransport>,
        runtime: Arc<BlockingRuntime>,
    ) -> Result<Self> {
        Ok(Self::from_cluster(
            Cluster::with_transport(endpoint, credential, options, transport)?,
            runtime,
        ))
    }

    pub fn from_cluster(cluster: Cluster, runtime: Arc<BlockingRuntime>) -> Self {
        Self { cluster, runtime }
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn runtime(&self) -> &Arc<BlockingRuntime> {
        &self.runtime
    }

    pub fn execute_query(
        &self,
        statement: impl Into<String>,
        options: QueryOptions,
    ) -> Result<BlockingQueryResult> {
        let cluster = self.cluster.clone();
        let statement = statement.into();
        let result = self
            .runtime
            .block_on(async move { cluster.execute_query(statement, options).await })?;
        Ok(self.wrap(result))
    }

    /// Starts the query and returns at once, the handle can wait for it or cancel it.
    pub fn submit_query(
        &self,
        statement: impl Into<String>,
        options: QueryOptions,
    ) -> Result<PendingQuery> {
        let cluster = self.cluster.clone();
        let statement = statement.into();
        PendingQuery::spawn(self.clone(), async move {
            cluster.execute_query(statement, options).await
        })
    }

    pub fn database(&self, name: impl Into<String>) -> BlockingDatabase {
        BlockingDatabase {
            cluster: self.clone(),
            name: name.into(),
        }
    }

    /// Closes the transport, the runtime stays available to other clusters.
    pub fn shutdown(&self) {
        self.cluster.shutdown();
    }

    fn wrap(&self, result: QueryResult) -> BlockingQueryResult {
        let row_buffer = self.cluster.adapter().config().stream.row_buffer;
        BlockingQueryResult::new(result, self.runtime.clone(), row_buffer)
    }
}

#[derive(Clone)]
pub struct BlockingDatabase {
    cluster: BlockingCluster,
    name: String,
}

impl BlockingDatabase {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self, name: impl Into<String>) -> BlockingScope {
        BlockingScope {
            scope: self.cluster.cluster.database(self.name.clone()).scope(name),
            cluster: self.cluster.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BlockingScope {
    cluster: BlockingCluster,
    scope: Scope,
}

impl BlockingScope {
    pub fn name(&self) -> &str {
        self.scope.name()
    }

    pub fn execute_query(
        &self,
        statement: impl Into<String>,
        options: QueryOptions,
    ) -> Result<BlockingQueryResult> {
        let scope = self.scope.clone();
        let statement = statement.into();
        let result = self
            .cluster
            .runtime
            .block_on(async move { scope.execute_query(statement, options).await })?;
        Ok(self.cluster.wrap(result))
    }

    pub fn submit_query(
        &self,
        statement: impl Into<String>,
        options: QueryOptions,
    ) -> Result<PendingQuery> {
        let scope = self.scope.clone();
        let statement = statement.into();
        PendingQuery::spawn(self.cluster.clone(), async move {
            scope.execute_query(statement, options).await
        })
    }
}

/// Query running in the background.
pub struct PendingQuery {
    rx: flume::Receiver<Result<QueryResult>>,
    abort: AbortHandle,
    cluster: BlockingCluster,
}

impl PendingQuery {
    fn spawn(
        cluster: BlockingCluster,
        future: impl Future<Output = Result<QueryResult>> + Send + 'static,
    ) -> Result<Self> {
        let (tx, rx) = flume::bounded(1);
        let handle = cluster.runtime.spawn(async move {
            let _ = tx.send_async(future.await).await;
        })?;
        Ok(Self {
            rx,
            abort: handle.abort_handle(),
            cluster,
        })
    }

    /// Blocks until the query has a result.
    pub fn wait(self) -> Result<BlockingQueryResult> {
        match self.rx.recv() {
            Ok(result) => Ok(self.cluster.wrap(result?)),
            Err(..) => Err(Error::closed(
                "The background runtime was shut down before the query completed",
            )),
        }
    }

    /// Whether [`wait`](PendingQuery::wait) would return without blocking.
    pub fn is_ready(&self) -> bool {
        !self.rx.is_empty() || self.rx.is_disconnected()
    }

    /// Stops the query, the request in flight is dropped.
    pub fn cancel(self) {
        self.abort.abort();
    }
}
