// ABOUTME: Ownership records behind the exclusive per-context claim in storage
// ABOUTME: Identifies the owning process so abandoned claims can be recognized and broken

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::Result;
use crate::storage::StorageError;

/// Who is executing a context. Stored as the claim payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    /// Identifies one factory instance
    pub owner: String,
    pub pid: u32,
    pub host: String,
    pub acquired_at: DateTime<Utc>,
}

impl ClaimRecord {
    /// A claim for `owner` in the current process
    pub fn for_owner(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            pid: std::process::id(),
            host: local_host(),
            acquired_at: Utc::now(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self).map_err(StorageError::from)?)
    }

    /// `None` for a payload that is not a claim record
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }

    /// Whether the owning process is known to be gone.
    ///
    /// Claims from other hosts, and from this process, are never considered abandoned.
    pub async fn is_abandoned(&self) -> bool {
        if self.host != local_host() || self.pid == std::process::id() {
            return false;
        }
        !is_process_alive(self.pid).await
    }
}

pub fn local_host() -> String {
    hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

/// Check if a process with the given PID is running
async fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use std::process::Stdio;
        tokio::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            // without a way to check, keep treating the claim as live
            .unwrap_or(true)
    }

    #[cfg(windows)]
    {
        tokio::process::Command::new("tasklist")
            .arg("/FI")
            .arg(format!("PID eq {}", pid))
            .output()
            .await
            .map(|output| String::from_utf8_lossy(&output.stdout).contains(&pid.to_string()))
            .unwrap_or(true)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_and_garbage() {
        let record = ClaimRecord::for_owner("factory-1");
        let bytes = record.to_bytes().unwrap();

        assert_eq!(ClaimRecord::from_bytes(&bytes), Some(record));
        assert_eq!(ClaimRecord::from_bytes(b"not json"), None);
    }

    #[tokio::test]
    async fn test_claim_of_this_process_is_live() {
        assert!(!ClaimRecord::for_owner("other").is_abandoned().await);
    }

    #[tokio::test]
    async fn test_claim_of_other_host_is_live() {
        let record = ClaimRecord {
            host: format!("{}-elsewhere", local_host()),
            pid: u32::MAX,
            ..ClaimRecord::for_owner("remote")
        };
        assert!(!record.is_abandoned().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_claim_of_exited_process_is_abandoned() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let record = ClaimRecord {
            pid,
            ..ClaimRecord::for_owner("crashed")
        };
        assert!(record.is_abandoned().await);
    }
}
