use async_trait::async_trait;
use rand::seq::IndexedRandom;
use rand::Rng;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::errors::BackendError;

/// Post-completion reward checks. Best effort: callers log failures and move on.
#[async_trait]
pub trait RewardsService: Send + Sync {
    /// Returns badge ids newly earned by this winner.
    async fn check_badges(&self, user_id: &str) -> Result<Vec<String>, BackendError>;

    /// Rolls for a chance-based kit unlock. Returns the kit id on a hit.
    async fn roll_kit_unlock(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<String>, BackendError>;
}

/// Win-count thresholds and the badge each one awards.
const WIN_BADGES: [(u32, &str); 3] = [(1, "first_win"), (10, "house_regular"), (50, "house_legend")];

#[derive(Debug, Default)]
struct RewardsState {
    wins: HashMap<String, u32>,
    badges: HashMap<String, Vec<String>>,
    kits: HashMap<String, Vec<String>>,
}

/// In-memory rewards for development and testing.
pub struct InMemoryRewardsService {
    unlock_chance: f64,
    kit_pool: Vec<String>,
    state: Mutex<RewardsState>,
}

impl InMemoryRewardsService {
    /// `unlock_chance` is clamped to `[0, 1]`; a non-finite chance never unlocks.
    pub fn new(unlock_chance: f64, kit_pool: Vec<String>) -> Self {
        let unlock_chance = if unlock_chance.is_finite() {
            unlock_chance.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            unlock_chance,
            kit_pool,
            state: Mutex::new(RewardsState::default()),
        }
    }

    pub async fn badges_for(&self, user_id: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .badges
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn kits_for(&self, user_id: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .kits
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    fn roll(&self, owned: &[String]) -> Option<String> {
        let mut rng = rand::rng();
        if !rng.random_bool(self.unlock_chance) {
            return None;
        }
        let unowned: Vec<&String> = self
            .kit_pool
            .iter()
            .filter(|kit| !owned.contains(kit))
            .collect();
        unowned.choose(&mut rng).map(|kit| (*kit).clone())
    }
}

#[async_trait]
impl RewardsService for InMemoryRewardsService {
    #[instrument(skip(self))]
    async fn check_badges(&self, user_id: &str) -> Result<Vec<String>, BackendError> {
        let mut state = self.state.lock().await;
        let wins = {
            let wins = state.wins.entry(user_id.to_string()).or_default();
            *wins += 1;
            *wins
        };

        let earned: Vec<String> = WIN_BADGES
            .iter()
            .filter(|(threshold, _)| *threshold == wins)
            .map(|(_, badge)| badge.to_string())
            .collect();

        if !earned.is_empty() {
            info!(user_id, ?earned, "Badges earned");
            state
                .badges
                .entry(user_id.to_string())
                .or_default()
                .extend(earned.iter().cloned());
        }
        Ok(earned)
    }

    #[instrument(skip(self))]
    async fn roll_kit_unlock(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<String>, BackendError> {
        let mut state = self.state.lock().await;
        let owned = state.kits.get(user_id).cloned().unwrap_or_default();

        let unlocked = self.roll(&owned);
        match &unlocked {
            Some(kit) => {
                info!(user_id, session_id, kit = %kit, "Kit unlocked");
                state
                    .kits
                    .entry(user_id.to_string())
                    .or_default()
                    .push(kit.clone());
            }
            None => debug!(user_id, session_id, "No kit unlocked"),
        }
        Ok(unlocked)
    }
}
