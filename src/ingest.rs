use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreError;
use crate::models::{Company, CompanyFields, CompanyId, JobCandidate, JobFields, WriteOutcome};

/// Storage operations the ingestion pipeline relies on. Both upserts must be
/// atomic with respect to their natural key.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find_company_by_name(&self, name: &str) -> Result<Option<Company>, StoreError>;

    /// Inserts the company or refreshes its fields, returning its id.
    async fn upsert_company(
        &self,
        name: &str,
        fields: &CompanyFields,
    ) -> Result<CompanyId, StoreError>;

    /// Inserts the job or overwrites every scraped field of the existing
    /// `(title, company_id)` row.
    async fn upsert_job(
        &self,
        title: &str,
        company_id: CompanyId,
        fields: &JobFields,
    ) -> Result<WriteOutcome, StoreError>;
}

/// Maps company names to stable ids.
#[derive(Clone)]
pub struct CompanyResolver {
    store: Arc<dyn JobStore>,
}

impl CompanyResolver {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Find-or-create in a single storage call; concurrent callers for the same
    /// name end up with the same id.
    pub async fn resolve(
        &self,
        name: &str,
        fields: &CompanyFields,
    ) -> Result<CompanyId, StoreError> {
        let id = self.store.upsert_company(name, fields).await?;
        debug!(company = name, id, "resolved company");
        Ok(id)
    }
}

#[derive(Clone)]
pub struct JobWriter {
    store: Arc<dyn JobStore>,
}

impl JobWriter {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn write(
        &self,
        candidate: &JobCandidate,
        company_id: CompanyId,
    ) -> Result<WriteOutcome, StoreError> {
        self.store
            .upsert_job(candidate.title(), company_id, &candidate.fields)
            .await
    }
}
