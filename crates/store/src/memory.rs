//! In-memory reference implementation of the store boundary.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use foreman_core::types::JobId;
use foreman_core::{Job, JobStatus};
use tokio::sync::RwLock;

use crate::{JobStore, StoreError};

/// Map-backed job store.
///
/// Designed to be wrapped in `Arc` and shared; the interior `RwLock`
/// serializes all mutations.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn insert(&self, job: Job) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn update(&self, mut job: Job) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs.get(&job.id).ok_or(StoreError::NotFound(job.id))?;
        if stored.version != job.version {
            return Err(StoreError::VersionConflict {
                id: job.id,
                expected: job.version,
                found: stored.version,
            });
        }
        job.version += 1;
        job.updated_at = Utc::now();
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|job| status.is_none_or(|s| job.status == s))
            .cloned()
            .collect();
        // Newest first, with id as a stable tie-breaker.
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn increment_progress(&self, id: JobId, success: bool) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.increment_progress(success)?;
        job.version += 1;
        Ok(job.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
