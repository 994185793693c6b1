//! Read-only index health checks.
//!
//! The doctor only reports; it never mutates the store. Orphaned derived
//! data stays in place until an explicit full rebuild prunes it.

use crate::error::Result;
use crate::store::{DoctorReport, SqliteStore};

pub const DEFAULT_SAMPLE_LIMIT: usize = 10;

pub struct Doctor {
    profiles: Vec<String>,
    sample_limit: usize,
}

impl Doctor {
    pub fn new(profiles: Vec<String>) -> Self {
        Self {
            profiles,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
        }
    }

    pub fn with_sample_limit(mut self, limit: usize) -> Self {
        self.sample_limit = limit;
        self
    }

    pub fn report(&self, store: &SqliteStore) -> Result<DoctorReport> {
        let report = store.doctor_report(&self.profiles, self.sample_limit)?;
        tracing::debug!(summary = %report.summary_line(), "doctor pass");
        Ok(report)
    }
}
