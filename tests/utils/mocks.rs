use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use houseparty::session::{BackendError, RewardsService};

// ============================================================================
// Mock Infrastructure
// ============================================================================

/// Rewards service that records every call and can be told to fail.
#[derive(Clone, Default)]
pub struct RecordingRewards {
    badge_checks: Arc<RwLock<Vec<String>>>,
    kit_rolls: Arc<RwLock<Vec<(String, String)>>>,
    failing: bool,
}

#[allow(dead_code)]
impl RecordingRewards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub async fn badge_checks(&self) -> Vec<String> {
        self.badge_checks.read().await.clone()
    }

    pub async fn kit_rolls(&self) -> Vec<(String, String)> {
        self.kit_rolls.read().await.clone()
    }

    fn outcome<T>(&self, value: T) -> Result<T, BackendError> {
        if self.failing {
            Err(BackendError::Database("rewards unavailable".to_string()))
        } else {
            Ok(value)
        }
    }
}

#[async_trait]
impl RewardsService for RecordingRewards {
    async fn check_badges(&self, user_id: &str) -> Result<Vec<String>, BackendError> {
        self.badge_checks.write().await.push(user_id.to_string());
        self.outcome(Vec::new())
    }

    async fn roll_kit_unlock(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<String>, BackendError> {
        self.kit_rolls
            .write()
            .await
            .push((user_id.to_string(), session_id.to_string()));
        self.outcome(None)
    }
}
