//! MongoDB client and collection wrapper
//!
//! Typed collections with schema-defined indexes, plus the session and
//! transaction plumbing every ledger operation runs on. Correctness of the
//! ledger rests on storage-level primitives (unique indexes, conditional
//! writes, transactions), never on in-process locks.

use bson::Document;
use futures_util::StreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::{options::IndexOptions, Client, ClientSession, Collection, IndexModel};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, info};

use crate::types::{LedgerError, Result};

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        // Verify connection with timeout
        client
            .database(db_name)
            .run_command(bson::doc! { "ping": 1 })
            .await
            .map_err(|e| LedgerError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    /// Start a session for a multi-document transaction
    pub async fn start_session(&self) -> Result<ClientSession> {
        self.client.start_session().await.map_err(Into::into)
    }

    /// Get the raw MongoDB client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the database handle
    pub fn database(&self) -> mongodb::Database {
        self.client.database(&self.db_name)
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Commit or abort a transaction based on the outcome of its body.
///
/// On a failed body the transaction is aborted and the body's error is
/// surfaced unchanged, so callers observe zero side effects. Commit errors
/// carrying retry labels map to `ConcurrencyConflict` via the `From` impl.
pub async fn finish_transaction<T>(mut session: ClientSession, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            session.commit_transaction().await?;
            Ok(value)
        }
        Err(err) => {
            // Abort failures are secondary; the body's error is what matters.
            let _ = session.abort_transaction().await;
            Err(err)
        }
    }
}

/// Whether a driver error is a unique-index violation
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        ErrorKind::Command(command_error) => command_error.code == 11000,
        _ => false,
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
{
    /// Create a new collection and apply indexes
    pub async fn new(client: &Client, db_name: &str, collection_name: &str) -> Result<Self> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<()> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Find one document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| LedgerError::Database(format!("Find failed: {}", e)))
    }

    /// Find many documents by filter, sorted
    pub async fn find_many(&self, filter: Document, sort: Document) -> Result<Vec<T>> {
        let cursor = self
            .inner
            .find(filter)
            .sort(sort)
            .await
            .map_err(|e| LedgerError::Database(format!("Find failed: {}", e)))?;

        let results: Vec<T> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    /// Get the underlying collection for session-scoped operations
    pub fn inner(&self) -> &Collection<T> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    // Transaction and index behavior needs a running MongoDB replica set;
    // see tests/mongo_properties.rs for the ignored integration suite.
}
