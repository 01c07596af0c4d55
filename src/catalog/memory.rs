use std::collections::BTreeMap;

use async_trait::async_trait;
use data_model::{CatalogDocument, DocumentDescriptor, DocumentId, Identifier, OwnerId};
use tokio::sync::RwLock;

use super::{CatalogError, Deletion, MetadataCatalog};

#[derive(Default)]
struct Records {
    next_id: i64,
    documents: BTreeMap<i64, CatalogDocument>,
}

/// Process-local catalog with sequential numeric ids. Search is a
/// case-insensitive substring match on the document name.
#[derive(Default)]
pub struct InMemoryMetadataCatalog {
    records: RwLock<Records>,
}

impl InMemoryMetadataCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataCatalog for InMemoryMetadataCatalog {
    async fn create(&self, descriptor: &DocumentDescriptor) -> Result<CatalogDocument, CatalogError> {
        let mut records = self.records.write().await;
        records.next_id += 1;
        let id = records.next_id;
        let document = CatalogDocument {
            id: Identifier::Numeric(id),
            descriptor: descriptor.clone(),
        };
        records.documents.insert(id, document.clone());
        Ok(document)
    }

    async fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<CatalogDocument>, CatalogError> {
        let records = self.records.read().await;
        Ok(records
            .documents
            .values()
            .filter(|doc| &doc.descriptor.user_id == owner)
            .cloned()
            .collect())
    }

    async fn search(
        &self,
        owner: &OwnerId,
        term: &str,
    ) -> Result<Vec<CatalogDocument>, CatalogError> {
        let term = term.to_lowercase();
        let records = self.records.read().await;
        Ok(records
            .documents
            .values()
            .filter(|doc| &doc.descriptor.user_id == owner)
            .filter(|doc| doc.descriptor.name.to_lowercase().contains(&term))
            .cloned()
            .collect())
    }

    async fn count(&self, owner: &OwnerId) -> Result<u64, CatalogError> {
        Ok(self.list_by_owner(owner).await?.len() as u64)
    }

    async fn delete(&self, id: &DocumentId) -> Result<Deletion, CatalogError> {
        let Identifier::Numeric(id) = id else {
            return Ok(Deletion::NotFound);
        };
        Ok(match self.records.write().await.documents.remove(id) {
            Some(document) => Deletion::Removed(document),
            None => Deletion::NotFound,
        })
    }
}
