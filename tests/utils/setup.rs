use std::sync::Arc;
use std::time::Duration;

use houseparty::session::{
    models::GameDefinition, CoordinatorConfig, InMemorySessionBackend, PlayerCandidate,
    SessionCoordinator,
};

use super::mocks::RecordingRewards;

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

pub const HOUSE_ID: &str = "house-1";
pub const GAME_ID: &str = "game-1";
pub const HOST: &str = "host";

#[allow(dead_code)]
pub struct TestSetup {
    pub backend: Arc<InMemorySessionBackend>,
    pub rewards: Arc<RecordingRewards>,
    pub game: GameDefinition,
    pub config: CoordinatorConfig,
}

pub struct TestSetupBuilder {
    members: Vec<String>,
    scoring_type: String,
    lower_is_better: Option<bool>,
    rewards: RecordingRewards,
}

#[allow(dead_code)]
impl TestSetupBuilder {
    pub fn new() -> Self {
        Self {
            members: vec![HOST.to_string()],
            scoring_type: "points".to_string(),
            lower_is_better: None,
            rewards: RecordingRewards::new(),
        }
    }

    /// House members besides the host.
    pub fn with_members(mut self, members: &[&str]) -> Self {
        self.members
            .extend(members.iter().map(|member| member.to_string()));
        self
    }

    pub fn with_scoring_type(mut self, scoring_type: &str) -> Self {
        self.scoring_type = scoring_type.to_string();
        self
    }

    pub fn lower_is_better(mut self, lower_is_better: bool) -> Self {
        self.lower_is_better = Some(lower_is_better);
        self
    }

    pub fn with_failing_rewards(mut self) -> Self {
        self.rewards = RecordingRewards::failing();
        self
    }

    pub async fn build(self) -> TestSetup {
        let backend = Arc::new(InMemorySessionBackend::new());
        let game = GameDefinition {
            id: GAME_ID.to_string(),
            house_id: HOUSE_ID.to_string(),
            name: "Cornhole".to_string(),
            scoring_type: self.scoring_type,
            lower_is_better: self.lower_is_better,
            display_unit: None,
        };
        backend.add_game(game.clone()).await;
        for member in &self.members {
            backend.add_house_member(HOUSE_ID, member).await;
        }

        TestSetup {
            backend,
            rewards: Arc::new(self.rewards),
            game,
            config: CoordinatorConfig {
                debounce_window: Duration::from_millis(500),
                retry_delay: Duration::from_secs(1),
            },
        }
    }
}

#[allow(dead_code)]
impl TestSetup {
    pub async fn coordinator(&self) -> SessionCoordinator {
        SessionCoordinator::open(
            self.backend.clone(),
            self.rewards.clone(),
            self.config.clone(),
            GAME_ID,
            HOST,
            "Host",
        )
        .await
        .expect("game should exist")
    }

    /// Opens a coordinator, selects `players` and creates the session.
    pub async fn session_with(&self, players: &[&str]) -> SessionCoordinator {
        let mut coordinator = self.coordinator().await;
        for player in players {
            coordinator
                .select_player(PlayerCandidate::account(*player, player.to_uppercase()))
                .expect("selection should be open");
        }
        coordinator
            .create_session()
            .await
            .expect("session should be created");
        coordinator
    }

    pub fn session_id(coordinator: &SessionCoordinator) -> String {
        coordinator
            .session()
            .expect("session should exist")
            .id
            .clone()
    }
}
