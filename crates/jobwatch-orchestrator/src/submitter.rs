//! Job creation: input validation and the insert into the job store.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{JobwatchError, Result};
use crate::job::Job;
use crate::store::JobStoreClient;
use crate::validation::{validate_url, AllowList};

/// Shown when the store accepted the insert but returned nothing usable.
pub const NO_JOB_DETAILS_MESSAGE: &str = "Task submission failed: No task details received.";

/// Validates URLs and creates jobs in the backend store.
///
/// Holds no per-submission state, so it can be called again right after a
/// success or a failure.
#[derive(Clone)]
pub struct TaskSubmitter {
    store: Arc<dyn JobStoreClient>,
    allow_list: AllowList,
}

impl std::fmt::Debug for TaskSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSubmitter")
            .field("allow_list", &self.allow_list)
            .finish_non_exhaustive()
    }
}

impl TaskSubmitter {
    /// Creates a submitter writing to `store` and accepting hosts from `allow_list`.
    #[must_use]
    pub fn new(store: Arc<dyn JobStoreClient>, allow_list: AllowList) -> Self {
        Self { store, allow_list }
    }

    /// Returns the allow-list used for validation.
    #[must_use]
    pub const fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Checks `url` without touching the store.
    pub fn validate(&self, url: &str) -> Result<()> {
        validate_url(url, &self.allow_list)
    }

    /// Creates exactly one `Pending` job for `url`.
    ///
    /// The URL is trimmed before it is stored. Nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns [`JobwatchError::Submission`] when the insert fails or the store
    /// returns no identifiable job.
    pub async fn submit(&self, url: &str) -> Result<Job> {
        let url = url.trim();
        match self.store.insert(url).await {
            Ok(Some(job)) if !job.id.is_blank() => {
                info!(job_id = %job.id, url, "Job submitted");
                Ok(job)
            }
            Ok(_) => {
                warn!(url, "Job store returned no job details");
                Err(JobwatchError::submission(NO_JOB_DETAILS_MESSAGE))
            }
            Err(e) => {
                warn!(url, error = %e, "Job submission failed");
                Err(JobwatchError::submission(e.to_string()))
            }
        }
    }
}
