//! Read-only search/aggregation projection (spec §4.1, §6.1): a thin
//! pass-through over the event store.

use std::sync::Arc;
use webhook_core::model::{SearchFilter, SearchPage};
use webhook_store::error::StoreError;
use webhook_store::event_store::EventStore;

pub async fn search(store: &Arc<dyn EventStore>, filter: SearchFilter) -> Result<SearchPage, StoreError> {
    store.search(filter).await
}
