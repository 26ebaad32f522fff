use crate::{
    ClientAdapter, ClusterOptions, ConnectionConfig, Credential, HttpTransport, QueryOptions,
    QueryRequest, QueryResult, Result, execute_query,
};
use std::sync::Arc;

/// Entry point of the async client.
///
/// Cheap to clone, every clone shares the same transport and connection pool.
///
/// ```no_run
/// use analytics_core::{Cluster, ClusterOptions, Credential, QueryOptions};
/// use futures::TryStreamExt;
/// # async fn run() -> analytics_core::Result<()> {
/// let cluster = Cluster::new(
///     "https://analytics.example.com",
///     Credential::from_username_and_password("Administrator", "password"),
///     ClusterOptions::default(),
/// )?;
/// let mut result = cluster
///     .execute_query("SELECT 1", QueryOptions::default())
///     .await?;
/// let mut rows = result.rows();
/// while let Some(row) = rows.try_next().await? {
///     println!("{}", row);
/// }
/// drop(rows);
/// println!("{:?}", result.metadata()?.metrics);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Cluster {
    adapter: Arc<ClientAdapter>,
}

impl Cluster {
    pub fn new(endpoint: &str, credential: Credential, options: ClusterOptions) -> Result<Self> {
        let config = ConnectionConfig::new(endpoint, &options)?;
        Ok(Self {
            adapter: Arc::new(ClientAdapter::new(config, credential)?),
        })
    }

    /// Builds a cluster over a custom transport.
    pub fn with_transport(
        endpoint: &str,
        credential: Credential,
        options: ClusterOptions,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let config = ConnectionConfig::new(endpoint, &options)?;
        Ok(Self {
            adapter: Arc::new(ClientAdapter::with_transport(config, credential, transport)),
        })
    }

    pub fn adapter(&self) -> &Arc<ClientAdapter> {
        &self.adapter
    }

    pub async fn execute_query(
        &self,
        statement: impl Into<String>,
        options: QueryOptions,
    ) -> Result<QueryResult> {
        let request = QueryRequest::new(statement, options, self.adapter.config())?;
        execute_query(&self.adapter, request).await
    }

    pub fn database(&self, name: impl Into<String>) -> Database {
        Database {
            cluster: self.clone(),
            name: name.into(),
        }
    }

    /// Closes the transport, in flight requests and streams fail with a closed error.
    pub fn shutdown(&self) {
        self.adapter.close();
    }

    pub fn is_closed(&self) -> bool {
        self.adapter.is_closed()
    }
}

#[derive(Clone)]
pub struct Database {
    cluster: Cluster,
    name: String,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self, name: impl Into<String>) -> Scope {
        Scope {
            database: self.clone(),
            name: name.into(),
        }
    }
}

/// Queries issued through a scope resolve unqualified names inside it.
#[derive(Clone)]
pub struct Scope {
    database: Database,
    name: String,
}

impl Scope {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Value of the `queryContext` field sent with every query of the scope.
    pub fn query_context(&self) -> String {
        format!("default:`{}`.`{}`", self.database.name, self.name)
    }

    pub async fn execute_query(
        &self,
        statement: impl Into<String>,
        options: QueryOptions,
    ) -> Result<QueryResult> {
        self.database
            .cluster
            .execute_query(statement, options.query_context(self.query_context()))
            .await
    }
}
