mod utils;

use futures::future::join_all;
use std::time::Duration;

use houseparty::scoring::{scoring_types, MeasurementUnit};
use houseparty::session::{
    models::{InvitationStatus, SessionStatus},
    BackendError, CoordinatorPhase, InvitationService, SessionBackend, SessionError,
};
use utils::{setup::HOST, TestSetup, TestSetupBuilder};

fn deadlock() -> BackendError {
    BackendError::from_code("40P01", "deadlock detected")
}

/// Polls until fire-and-forget work shows up or gives up after half a second.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn house_only_session_goes_straight_to_active() {
    let setup = TestSetupBuilder::new()
        .with_members(&["amy", "ben"])
        .build()
        .await;

    let coordinator = setup.session_with(&["amy", "ben"]).await;
    let session_id = TestSetup::session_id(&coordinator);

    assert_eq!(coordinator.phase(), CoordinatorPhase::Active);

    let record = setup.backend.fetch_session(&session_id).await.unwrap().unwrap();
    assert_eq!(record.status, SessionStatus::Active);
    assert!(record.started_at.is_some());

    let scores = setup.backend.fetch_scores(&session_id).await.unwrap();
    let ids: Vec<&str> = scores.iter().map(|s| s.player_id.as_str()).collect();
    assert_eq!(ids, vec!["amy", "ben", HOST]);
    assert!(scores.iter().all(|s| s.score == 0.0));

    assert!(setup
        .backend
        .fetch_invitations(&session_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn outside_invitee_leaves_session_pending() {
    let setup = TestSetupBuilder::new().with_members(&["amy"]).build().await;

    let coordinator = setup.session_with(&["amy", "zoe"]).await;
    let session_id = TestSetup::session_id(&coordinator);

    assert_eq!(coordinator.phase(), CoordinatorPhase::AwaitingInvitations);
    assert!(!coordinator.can_begin());

    let invitations = setup.backend.fetch_invitations(&session_id).await.unwrap();
    assert_eq!(invitations.len(), 1);
    assert_eq!(invitations[0].invitee_id, "zoe");
    assert_eq!(invitations[0].status, InvitationStatus::Pending);

    let scores = setup.backend.fetch_scores(&session_id).await.unwrap();
    assert_eq!(scores.len(), 2, "only house members get score rows");
    assert!(scores.iter().all(|s| s.player_id != "zoe"));
}

#[tokio::test]
async fn can_begin_tracks_every_invitation() {
    let setup = TestSetupBuilder::new().build().await;
    let mut coordinator = setup.session_with(&["zoe", "yan"]).await;
    let session_id = TestSetup::session_id(&coordinator);
    let invitations = InvitationService::new(setup.backend.clone());

    invitations.respond(&session_id, "zoe", true).await.unwrap();
    assert!(!coordinator.refresh_invitations().await.unwrap());

    invitations.respond(&session_id, "yan", false).await.unwrap();
    assert!(!coordinator.refresh_invitations().await.unwrap());
    assert!(matches!(
        coordinator.begin_active_play(HOST).await,
        Err(SessionError::InvitationsUnresolved)
    ));

    coordinator.remove_invitation(HOST, "yan").await.unwrap();
    assert!(coordinator.can_begin());

    coordinator.begin_active_play(HOST).await.unwrap();
    assert_eq!(coordinator.phase(), CoordinatorPhase::Active);
    let session = coordinator.session().unwrap();
    assert!(session.has_player("zoe"));
    assert!(!session.has_player("yan"));
}

#[tokio::test]
async fn concurrent_acceptances_create_one_row_each() {
    let setup = TestSetupBuilder::new().build().await;
    let coordinator = setup.session_with(&["zoe", "yan"]).await;
    let session_id = TestSetup::session_id(&coordinator);
    let invitations = InvitationService::new(setup.backend.clone());

    let answers = join_all([
        invitations.respond(&session_id, "zoe", true),
        invitations.respond(&session_id, "zoe", true),
        invitations.respond(&session_id, "yan", true),
    ])
    .await;
    assert!(answers.iter().all(Result::is_ok));

    let scores = setup.backend.fetch_scores(&session_id).await.unwrap();
    let zoe_rows = scores.iter().filter(|s| s.player_id == "zoe").count();
    assert_eq!(zoe_rows, 1);
    assert_eq!(scores.len(), 3);
}

#[tokio::test]
async fn only_the_creator_begins_play() {
    let setup = TestSetupBuilder::new().build().await;
    let mut coordinator = setup.session_with(&["zoe"]).await;
    let session_id = TestSetup::session_id(&coordinator);

    InvitationService::new(setup.backend.clone())
        .respond(&session_id, "zoe", true)
        .await
        .unwrap();
    assert!(coordinator.refresh_invitations().await.unwrap());

    assert!(matches!(
        coordinator.begin_active_play("zoe").await,
        Err(SessionError::NotCreator(_))
    ));
    coordinator.begin_active_play(HOST).await.unwrap();

    let record = setup.backend.fetch_session(&session_id).await.unwrap().unwrap();
    assert_eq!(record.status, SessionStatus::Active);
}

#[tokio::test]
async fn scores_never_drop_below_zero_for_any_type() {
    for scoring_type in scoring_types() {
        let setup = TestSetupBuilder::new()
            .with_scoring_type(scoring_type.id())
            .build()
            .await;
        let mut coordinator = setup.session_with(&[]).await;

        coordinator.increment_score(HOST, 2).unwrap();
        let after_decrement = coordinator.increment_score(HOST, -5).unwrap();
        let after_set = coordinator.set_score(HOST, -12.5, None).unwrap();

        assert!(after_decrement >= 0.0, "{} went negative", scoring_type.id());
        assert!(after_set >= 0.0, "{} went negative", scoring_type.id());
        coordinator.teardown();
    }
}

#[tokio::test(start_paused = true)]
async fn rapid_direct_sets_collapse_into_one_write() {
    let setup = TestSetupBuilder::new().build().await;
    let mut coordinator = setup.session_with(&[]).await;

    for value in [3.0, 7.0, 12.0, 15.0] {
        coordinator.set_score(HOST, value, None).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(setup.backend.upsert_history().await.is_empty());

    tokio::time::sleep(Duration::from_millis(600)).await;

    let history = setup.backend.upsert_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].1.score, 15.0);
}

#[tokio::test(start_paused = true)]
async fn increments_supersede_a_pending_direct_set() {
    let setup = TestSetupBuilder::new().build().await;
    let mut coordinator = setup.session_with(&[]).await;

    coordinator.set_score(HOST, 5.0, None).unwrap();
    coordinator.increment_score(HOST, 1).unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    let history = setup.backend.upsert_history().await;
    assert_eq!(history.len(), 1, "the debounced write was dropped");
    assert_eq!(history[0].1.score, 6.0);
}

#[tokio::test(start_paused = true)]
async fn deadlocked_write_is_retried_once_after_delay() {
    let setup = TestSetupBuilder::new().build().await;
    let mut coordinator = setup.session_with(&[]).await;
    setup.backend.fail_next_upserts(vec![deadlock()]).await;

    coordinator.increment_score(HOST, 4).unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(setup.backend.upsert_history().await.len(), 1);

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(setup.backend.upsert_history().await.len(), 1, "retry waits for the delay");

    tokio::time::sleep(Duration::from_millis(200)).await;
    let history = setup.backend.upsert_history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].1.score, 4.0);

    let stored = setup
        .backend
        .fetch_scores(&TestSetup::session_id(&coordinator))
        .await
        .unwrap();
    assert_eq!(stored[0].score, 4.0);
}

#[tokio::test(start_paused = true)]
async fn other_write_failures_are_not_retried() {
    let setup = TestSetupBuilder::new().build().await;
    let mut coordinator = setup.session_with(&[]).await;
    setup
        .backend
        .fail_next_upserts(vec![BackendError::from_code("23514", "check violation")])
        .await;

    coordinator.increment_score(HOST, 1).unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(setup.backend.upsert_history().await.len(), 1);
    assert_eq!(coordinator.session().unwrap().player(HOST).unwrap().score, 1.0);
}

#[tokio::test(start_paused = true)]
async fn a_second_deadlock_is_given_up_on() {
    let setup = TestSetupBuilder::new().build().await;
    let mut coordinator = setup.session_with(&[]).await;
    setup
        .backend
        .fail_next_upserts(vec![deadlock(), deadlock()])
        .await;

    coordinator.increment_score(HOST, 1).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(setup.backend.upsert_history().await.len(), 2);
}

#[tokio::test]
async fn completion_records_winners_and_checks_rewards() {
    let setup = TestSetupBuilder::new()
        .with_members(&["amy", "ben"])
        .build()
        .await;
    let mut coordinator = setup.session_with(&["amy", "ben"]).await;
    let session_id = TestSetup::session_id(&coordinator);

    coordinator.increment_score("amy", 6).unwrap();
    coordinator.increment_score("ben", 6).unwrap();
    coordinator.increment_score(HOST, 2).unwrap();

    let preview = coordinator.request_end_game().unwrap();
    assert!(preview.is_tie);

    let outcome = coordinator.confirm_end_game().await.unwrap();
    assert_eq!(outcome.winner_ids, vec!["amy", "ben"]);
    assert_eq!(coordinator.phase(), CoordinatorPhase::Completed);

    let record = setup.backend.fetch_session(&session_id).await.unwrap().unwrap();
    assert_eq!(record.status, SessionStatus::Completed);
    assert_eq!(setup.backend.winner_ids(&session_id).await, vec!["amy", "ben"]);

    let rewards = setup.rewards.clone();
    assert!(
        eventually(|| {
            let rewards = rewards.clone();
            async move { rewards.kit_rolls().await.len() == 3 }
        })
        .await
    );
    let mut checked = setup.rewards.badge_checks().await;
    checked.sort();
    assert_eq!(checked, vec!["amy", "ben"]);
}

#[tokio::test]
async fn lower_is_better_games_pick_the_smallest_score() {
    let setup = TestSetupBuilder::new()
        .with_members(&["amy"])
        .lower_is_better(true)
        .build()
        .await;
    let mut coordinator = setup.session_with(&["amy"]).await;

    coordinator.set_score(HOST, 5.0, None).unwrap();
    coordinator.set_score("amy", 3.0, None).unwrap();

    let preview = coordinator.request_end_game().unwrap();
    assert_eq!(preview.winner_ids, vec!["amy"]);
}

#[tokio::test]
async fn failed_completion_can_be_confirmed_again() {
    let setup = TestSetupBuilder::new().build().await;
    let mut coordinator = setup.session_with(&[]).await;
    let session_id = TestSetup::session_id(&coordinator);

    coordinator.increment_score(HOST, 3).unwrap();
    let preview = coordinator.request_end_game().unwrap();
    assert!(preview.is_solo);
    assert!(preview.solo_has_score);

    setup
        .backend
        .fail_next_completion(BackendError::Database("connection reset".to_string()))
        .await;
    assert!(matches!(
        coordinator.confirm_end_game().await,
        Err(SessionError::Backend(_))
    ));
    assert_eq!(coordinator.phase(), CoordinatorPhase::Active);
    let record = setup.backend.fetch_session(&session_id).await.unwrap().unwrap();
    assert_eq!(record.status, SessionStatus::Active);

    let outcome = coordinator.confirm_end_game().await.unwrap();
    assert_eq!(outcome.winner_ids, vec![HOST]);
}

#[tokio::test]
async fn reward_failures_do_not_undo_completion() {
    let setup = TestSetupBuilder::new().with_failing_rewards().build().await;
    let mut coordinator = setup.session_with(&[]).await;

    coordinator.increment_score(HOST, 1).unwrap();
    coordinator.request_end_game().unwrap();
    coordinator.confirm_end_game().await.unwrap();

    let rewards = setup.rewards.clone();
    assert!(
        eventually(|| {
            let rewards = rewards.clone();
            async move { !rewards.kit_rolls().await.is_empty() }
        })
        .await
    );
    assert_eq!(coordinator.phase(), CoordinatorPhase::Completed);
}

#[tokio::test(start_paused = true)]
async fn cancelling_drops_pending_writes() {
    let setup = TestSetupBuilder::new().build().await;
    let mut coordinator = setup.session_with(&[]).await;
    let session_id = TestSetup::session_id(&coordinator);

    coordinator
        .set_measurement(HOST, 12.0, MeasurementUnit::Feet)
        .unwrap();
    coordinator.cancel(HOST).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(setup.backend.upsert_history().await.is_empty());
    let record = setup.backend.fetch_session(&session_id).await.unwrap().unwrap();
    assert_eq!(record.status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn failed_invitation_removal_is_rolled_back() {
    let setup = TestSetupBuilder::new().build().await;
    let mut coordinator = setup.session_with(&["zoe"]).await;
    let session_id = TestSetup::session_id(&coordinator);

    // Gone remotely while the coordinator still shows it.
    setup
        .backend
        .delete_invitation(&session_id, "zoe")
        .await
        .unwrap();

    let result = coordinator.remove_invitation(HOST, "zoe").await;
    assert!(matches!(
        result,
        Err(SessionError::Backend(BackendError::NotFound(_)))
    ));
    assert_eq!(coordinator.session().unwrap().invitations.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn back_to_back_increments_persist_the_latest_value() {
    let setup = TestSetupBuilder::new().build().await;
    let backend = setup.backend.clone();

    // Spawned so the write tasks land in the worker's LIFO slot.
    let (session_id, local) = tokio::spawn(async move {
        let mut coordinator = setup.session_with(&[]).await;
        coordinator.increment_score(HOST, 1).unwrap();
        let local = coordinator.increment_score(HOST, 1).unwrap();
        (TestSetup::session_id(&coordinator), local)
    })
    .await
    .unwrap();
    assert_eq!(local, 2.0);

    assert!(
        eventually(|| {
            let backend = backend.clone();
            async move {
                backend
                    .upsert_history()
                    .await
                    .iter()
                    .any(|(_, record)| record.score == 2.0)
            }
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let scores = backend.fetch_scores(&session_id).await.unwrap();
    assert_eq!(scores[0].score, 2.0, "persisted value is stale");
    let history = backend.upsert_history().await;
    assert_eq!(history.last().map(|(_, record)| record.score), Some(2.0));
}

#[tokio::test]
async fn accepted_invitee_cannot_back_out() {
    let setup = TestSetupBuilder::new().build().await;
    let mut coordinator = setup.session_with(&["zoe"]).await;
    let session_id = TestSetup::session_id(&coordinator);
    let invitations = InvitationService::new(setup.backend.clone());

    invitations.respond(&session_id, "zoe", true).await.unwrap();
    assert!(coordinator.refresh_invitations().await.unwrap());

    let changed = invitations.respond(&session_id, "zoe", false).await;
    assert!(matches!(changed, Err(SessionError::AlreadyAnswered(status)) if status == "accepted"));
    assert_eq!(
        invitations.respond(&session_id, "zoe", true).await.unwrap(),
        InvitationStatus::Accepted
    );

    assert!(coordinator.refresh_invitations().await.unwrap());
    assert!(matches!(
        coordinator.remove_invitation(HOST, "zoe").await,
        Err(SessionError::InvalidState { .. })
    ));

    coordinator.begin_active_play(HOST).await.unwrap();
    let session = coordinator.session().unwrap();
    assert!(session.has_player("zoe"));
    assert_eq!(session.invitations[0].status, InvitationStatus::Accepted);
}

#[tokio::test]
async fn declined_invitee_cannot_join_later() {
    let setup = TestSetupBuilder::new().build().await;
    let mut coordinator = setup.session_with(&["zoe"]).await;
    let session_id = TestSetup::session_id(&coordinator);
    let invitations = InvitationService::new(setup.backend.clone());

    invitations.respond(&session_id, "zoe", false).await.unwrap();
    assert!(matches!(
        invitations.respond(&session_id, "zoe", true).await,
        Err(SessionError::AlreadyAnswered(_))
    ));

    assert!(!coordinator.refresh_invitations().await.unwrap());
    assert!(!coordinator.session().unwrap().has_player("zoe"));
    let scores = setup.backend.fetch_scores(&session_id).await.unwrap();
    assert!(scores.iter().all(|s| s.player_id != "zoe"));
}

#[tokio::test]
async fn finishing_a_session_closes_its_invitation_feed() {
    let setup = TestSetupBuilder::new().build().await;
    let mut coordinator = setup.session_with(&["zoe"]).await;
    let mut watcher = coordinator.watch_invitations().await.unwrap();

    coordinator.cancel(HOST).await.unwrap();

    let drained = tokio::time::timeout(Duration::from_secs(1), async {
        while watcher.next_snapshot().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok(), "watcher should end once the session is cancelled");
}
