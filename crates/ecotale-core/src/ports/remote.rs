use async_trait::async_trait;

use crate::error::FetchError;

/// Read side of the hosted backend.
///
/// The query shape belongs to the adapter; the engine only forwards it.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    type Query: Send + Sync;
    type Record: Send;

    async fn read(&self, query: &Self::Query) -> Result<Vec<Self::Record>, FetchError>;
}
