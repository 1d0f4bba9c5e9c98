//! Job identifier type.

use std::str::FromStr;

use derive_more::{Debug, Display, From, Into};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of one fan-out round.
///
/// Every call to the dispatcher mints a new identifier, including fresh
/// generations for an input that was analysed before.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Debug, Display, From, Into)]
#[debug("{_0}")]
#[display("{_0}")]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Creates a new random job ID.
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a job ID from an existing UUID.
    #[inline]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[inline]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn test_job_id_parses_its_display_form() -> anyhow::Result<()> {
        let job_id = JobId::new();
        let parsed: JobId = job_id.to_string().parse()?;
        assert_eq!(parsed, job_id);
        Ok(())
    }

    #[test]
    fn test_job_id_serializes_as_plain_string() -> anyhow::Result<()> {
        let job_id = JobId::new();
        let json = serde_json::to_string(&job_id)?;
        assert_eq!(json, format!("\"{job_id}\""));
        Ok(())
    }
}
