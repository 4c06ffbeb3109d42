// Integration tests for Lume Session

use actix_web::{http::header, http::StatusCode, test, web, App};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lume_session::core::{CallLimits, JoinOutcome, MatchError, Matcher, RewardPolicy, SessionRegistry};
use lume_session::models::{
    ActiveSessionResponse, ActivityType, EndSessionResponse, JoinResponse, Rating,
    RateSessionResponse, RewardEvent, Session, SessionStatus, Side, SignalResponse, Ticket,
};
use lume_session::relay::{Frame, RelayHub};
use lume_session::routes::{configure_routes, AppState};
use lume_session::services::{
    ClaimOutcome, MemoryStore, RatingUpdate, SessionClose, SessionStore, StoreError,
};
use std::collections::HashSet;
use std::sync::Arc;

fn build_state(store: Arc<MemoryStore>) -> AppState {
    let store_dyn: Arc<dyn SessionStore> = store;
    AppState {
        store: store_dyn.clone(),
        matcher: Matcher::new(store_dyn.clone(), 60),
        registry: SessionRegistry::new(store_dyn, RewardPolicy::default(), CallLimits::default(), None),
        relay: RelayHub::new(),
    }
}

async fn pair(state: &AppState, waiting: &str, caller: &str) -> uuid::Uuid {
    state.matcher.join(waiting, "beginner").await.unwrap();
    match state.matcher.join(caller, "beginner").await.unwrap() {
        JoinOutcome::Matched { session, .. } => session.id,
        JoinOutcome::Waiting { .. } => panic!("expected {} to be paired with {}", caller, waiting),
    }
}

#[tokio::test]
async fn test_join_join_then_both_see_session() {
    let store = Arc::new(MemoryStore::new());
    let state = build_state(store.clone());

    let first = state.matcher.join("alice", "beginner").await.unwrap();
    assert!(!first.is_matched());

    let second = state.matcher.join("bob", "beginner").await.unwrap();
    let JoinOutcome::Matched { session, partner_id } = second else {
        panic!("bob should have been matched");
    };
    assert_eq!(partner_id, "alice");
    assert_eq!(session.participant_a, "alice");
    assert_eq!(session.participant_b, "bob");
    assert_eq!(store.ticket_count().await, 0);

    let alice_view = state.registry.active_session("alice").await.unwrap().unwrap();
    assert_eq!(alice_view.session.id, session.id);
    assert_eq!(alice_view.partner_id, "bob");
    assert_eq!(alice_view.duration_limit_secs, 300);

    let bob_view = state.registry.active_session("bob").await.unwrap().unwrap();
    assert_eq!(bob_view.partner_id, "alice");
}

#[tokio::test]
async fn test_different_keys_never_pair() {
    let state = build_state(Arc::new(MemoryStore::new()));

    state.matcher.join("alice", "beginner").await.unwrap();
    let outcome = state.matcher.join("bob", "advanced").await.unwrap();

    assert!(!outcome.is_matched());
}

#[tokio::test]
async fn test_waiting_order_is_fifo() {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc::now();

    // Seed two waiting tickets directly so the joins below only claim
    store.upsert_ticket("early", "beginner", t0).await.unwrap();
    store
        .upsert_ticket("late", "beginner", t0 + Duration::seconds(5))
        .await
        .unwrap();

    let state = build_state(store);
    let outcome = state
        .matcher
        .join_at("caller", "beginner", t0 + Duration::seconds(10))
        .await
        .unwrap();

    match outcome {
        JoinOutcome::Matched { partner_id, .. } => assert_eq!(partner_id, "early"),
        JoinOutcome::Waiting { .. } => panic!("caller should have been matched"),
    }
}

#[tokio::test]
async fn test_expired_ticket_is_not_claimed() {
    let store = Arc::new(MemoryStore::new());
    let state = build_state(store.clone());
    let t0 = Utc::now();

    state.matcher.join_at("stale", "beginner", t0).await.unwrap();

    let outcome = state
        .matcher
        .join_at("fresh", "beginner", t0 + Duration::seconds(61))
        .await
        .unwrap();

    assert!(!outcome.is_matched());
    assert!(store.get_ticket("stale").await.unwrap().is_none());
    assert!(store.get_ticket("fresh").await.unwrap().is_some());
}

#[tokio::test]
async fn test_rejoin_refreshes_ticket() {
    let store = Arc::new(MemoryStore::new());
    let state = build_state(store.clone());
    let t0 = Utc::now();

    state.matcher.join_at("alice", "beginner", t0).await.unwrap();
    state
        .matcher
        .join_at("alice", "beginner", t0 + Duration::seconds(50))
        .await
        .unwrap();

    // Still inside the TTL of the refreshed ticket
    let outcome = state
        .matcher
        .join_at("bob", "beginner", t0 + Duration::seconds(90))
        .await
        .unwrap();

    assert!(outcome.is_matched());
    assert_eq!(store.ticket_count().await, 0);
}

#[tokio::test]
async fn test_join_while_in_session_conflicts() {
    let state = build_state(Arc::new(MemoryStore::new()));
    pair(&state, "alice", "bob").await;

    let err = state.matcher.join("alice", "beginner").await.unwrap_err();
    assert!(matches!(err, MatchError::Conflict(_)));
}

#[tokio::test]
async fn test_leave_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let state = build_state(store.clone());

    state.matcher.join("alice", "beginner").await.unwrap();
    assert!(state.matcher.leave("alice").await.unwrap());
    assert!(!state.matcher.leave("alice").await.unwrap());
    assert_eq!(store.ticket_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_pair_each_user_at_most_once() {
    let store = Arc::new(MemoryStore::new());
    let state = build_state(store.clone());

    let mut tasks = Vec::new();
    for i in 0..40 {
        let matcher = state.matcher.clone();
        tasks.push(tokio::spawn(async move {
            matcher.join(&format!("user-{}", i), "beginner").await
        }));
    }

    let mut sessions = Vec::new();
    for task in tasks {
        if let JoinOutcome::Matched { session, .. } = task.await.unwrap().unwrap() {
            sessions.push(session);
        }
    }

    let mut seen = HashSet::new();
    for session in &sessions {
        assert_ne!(session.participant_a, session.participant_b);
        assert!(seen.insert(session.participant_a.clone()), "user paired twice");
        assert!(seen.insert(session.participant_b.clone()), "user paired twice");
    }

    // Everyone is either paired exactly once or still waiting
    assert_eq!(seen.len() + store.ticket_count().await, 40);
}

/// Memory store whose active-session lookup answers late, widening the gap
/// between a join's pre-check and its claim
struct SlowLookupStore {
    inner: MemoryStore,
}

#[async_trait]
impl SessionStore for SlowLookupStore {
    async fn purge_expired_tickets(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.purge_expired_tickets(cutoff).await
    }

    async fn has_active_session(&self, user_id: &str) -> Result<bool, StoreError> {
        let active = self.inner.has_active_session(user_id).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        active
    }

    async fn claim_and_pair(
        &self,
        caller: &str,
        compatibility_key: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        self.inner.claim_and_pair(caller, compatibility_key, cutoff, now).await
    }

    async fn upsert_ticket(
        &self,
        user_id: &str,
        compatibility_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Ticket, StoreError> {
        self.inner.upsert_ticket(user_id, compatibility_key, now).await
    }

    async fn remove_ticket(&self, user_id: &str) -> Result<bool, StoreError> {
        self.inner.remove_ticket(user_id).await
    }

    async fn get_ticket(&self, user_id: &str) -> Result<Option<Ticket>, StoreError> {
        self.inner.get_ticket(user_id).await
    }

    async fn active_session_for(&self, user_id: &str) -> Result<Option<Session>, StoreError> {
        self.inner.active_session_for(user_id).await
    }

    async fn get_session(&self, session_id: uuid::Uuid) -> Result<Option<Session>, StoreError> {
        self.inner.get_session(session_id).await
    }

    async fn finish_session(
        &self,
        session_id: uuid::Uuid,
        close: &SessionClose,
        rewards: &[RewardEvent],
    ) -> Result<bool, StoreError> {
        self.inner.finish_session(session_id, close, rewards).await
    }

    async fn record_rating(
        &self,
        session_id: uuid::Uuid,
        side: Side,
        rating: Rating,
        policy: &RewardPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<RatingUpdate>, StoreError> {
        self.inner.record_rating(session_id, side, rating, policy, now).await
    }

    async fn rewards_for_session(&self, session_id: uuid::Uuid) -> Result<Vec<RewardEvent>, StoreError> {
        self.inner.rewards_for_session(session_id).await
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        self.inner.health_check().await
    }
}

#[tokio::test]
async fn test_same_user_joining_twice_concurrently_gets_one_session() {
    let store = Arc::new(SlowLookupStore {
        inner: MemoryStore::new(),
    });
    let t0 = Utc::now();
    store.upsert_ticket("a", "beginner", t0).await.unwrap();
    store
        .upsert_ticket("b", "beginner", t0 + Duration::seconds(1))
        .await
        .unwrap();
    let matcher = Matcher::new(store.clone(), 60);

    // Both calls pass the pre-check before either claims
    let (first, second) = tokio::join!(matcher.join("x", "beginner"), matcher.join("x", "beginner"));
    let outcomes = [first, second];

    let matched = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(JoinOutcome::Matched { .. })))
        .count();
    assert_eq!(matched, 1);
    assert!(outcomes.iter().any(|o| matches!(o, Err(MatchError::Conflict(_)))));

    // b was not consumed by a second pairing
    assert!(store.get_ticket("b").await.unwrap().is_some());
    assert!(store.inner.active_session_for("b").await.unwrap().is_none());
}

#[tokio::test]
async fn test_end_is_idempotent_and_rewards_once() {
    let store = Arc::new(MemoryStore::new());
    let state = build_state(store.clone());
    let session_id = pair(&state, "alice", "bob").await;

    let first = state
        .registry
        .end(session_id, "alice", "call_completed")
        .await
        .unwrap();
    assert_eq!(first.status, SessionStatus::Completed);
    assert!(!first.already_ended);
    assert_eq!(first.points_awarded, Some(10));

    let second = state.registry.end(session_id, "bob", "call_completed").await.unwrap();
    assert!(second.already_ended);
    assert_eq!(second.status, SessionStatus::Completed);

    let rewards = store.rewards_for_session(session_id).await.unwrap();
    assert_eq!(rewards.len(), 2);
    assert!(rewards.iter().all(|r| r.activity_type == ActivityType::VideoCall));

    // Both are free to queue again
    assert!(!state.matcher.join("alice", "beginner").await.unwrap().is_matched());
}

#[tokio::test]
async fn test_cancelled_end_emits_no_rewards() {
    let store = Arc::new(MemoryStore::new());
    let state = build_state(store.clone());
    let session_id = pair(&state, "alice", "bob").await;

    let outcome = state.registry.end(session_id, "bob", "user_left").await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Cancelled);
    assert!(outcome.points_awarded.is_none());
    assert!(store.reward_events().await.is_empty());
}

#[tokio::test]
async fn test_end_by_outsider_is_rejected() {
    let state = build_state(Arc::new(MemoryStore::new()));
    let session_id = pair(&state, "alice", "bob").await;

    let err = state
        .registry
        .end(session_id, "mallory", "call_completed")
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::NotParticipant { .. }));

    let err = state
        .registry
        .end(uuid::Uuid::new_v4(), "alice", "call_completed")
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::NotFound(_)));
}

#[tokio::test]
async fn test_mutual_rating_awards_partner_rating() {
    let store = Arc::new(MemoryStore::new());
    let state = build_state(store.clone());
    let session_id = pair(&state, "alice", "bob").await;
    state.registry.end(session_id, "alice", "completed").await.unwrap();

    // alice thinks bob was good, bob thinks alice was neutral
    let first = state.registry.rate(session_id, "alice", "good").await.unwrap();
    assert!(!first.both_rated);
    assert!(first.rewards.is_empty());

    let second = state.registry.rate(session_id, "bob", "neutral").await.unwrap();
    assert!(second.both_rated);
    assert_eq!(second.rewards.len(), 2);
    assert_eq!(second.points_awarded, Some(10));

    let ratings: Vec<_> = store
        .reward_events()
        .await
        .into_iter()
        .filter(|r| r.activity_type == ActivityType::PeerRating)
        .collect();
    let alice = ratings.iter().find(|r| r.user_id == "alice").unwrap();
    let bob = ratings.iter().find(|r| r.user_id == "bob").unwrap();
    assert_eq!(alice.points, 5);
    assert_eq!(bob.points, 10);

    // A repeated rating changes nothing
    let again = state.registry.rate(session_id, "bob", "bad").await.unwrap();
    assert!(again.rewards.is_empty());
    assert_eq!(store.reward_events().await.len(), 4);
}

#[tokio::test]
async fn test_invalid_rating_is_rejected() {
    let state = build_state(Arc::new(MemoryStore::new()));
    let session_id = pair(&state, "alice", "bob").await;

    let err = state.registry.rate(session_id, "alice", "amazing").await.unwrap_err();
    assert!(matches!(err, MatchError::InvalidInput(_)));
}

#[actix_web::test]
async fn test_http_join_and_session_lookup() {
    let state = build_state(Arc::new(MemoryStore::new()));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/matching/join")
        .set_json(serde_json::json!({ "user_id": "alice", "compatibility_key": "advanced" }))
        .to_request();
    let resp: JoinResponse = test::call_and_read_body_json(&app, req).await;
    assert!(resp.success);
    assert!(!resp.matched);
    assert_eq!(resp.duration_limit_secs, 600);

    let req = test::TestRequest::post()
        .uri("/api/v1/matching/join")
        .set_json(serde_json::json!({ "userId": "bob", "englishLevel": "advanced" }))
        .to_request();
    let resp: JoinResponse = test::call_and_read_body_json(&app, req).await;
    assert!(resp.matched);
    assert_eq!(resp.partner_id.as_deref(), Some("alice"));
    let session_id = resp.session_id.unwrap();

    let req = test::TestRequest::get()
        .uri("/api/v1/matching/session/alice")
        .to_request();
    let resp: ActiveSessionResponse = test::call_and_read_body_json(&app, req).await;
    assert!(resp.active_session);
    let view = resp.session.unwrap();
    assert_eq!(view.id, session_id);
    assert_eq!(view.partner_id, "bob");

    let req = test::TestRequest::get()
        .uri("/api/v1/matching/session/carol")
        .to_request();
    let resp: ActiveSessionResponse = test::call_and_read_body_json(&app, req).await;
    assert!(!resp.active_session);

    let req = test::TestRequest::post()
        .uri("/api/v1/matching/join")
        .set_json(serde_json::json!({ "user_id": "alice", "compatibility_key": "advanced" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[actix_web::test]
async fn test_http_join_validation() {
    let state = build_state(Arc::new(MemoryStore::new()));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/matching/join")
        .set_json(serde_json::json!({ "user_id": "", "compatibility_key": "beginner" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_http_end_and_rate() {
    let state = build_state(Arc::new(MemoryStore::new()));
    let session_id = pair(&state, "alice", "bob").await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/matching/end")
        .set_json(serde_json::json!({ "session_id": session_id, "user_id": "alice" }))
        .to_request();
    let resp: EndSessionResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp.status, SessionStatus::Completed);
    assert!(!resp.already_ended);

    let req = test::TestRequest::post()
        .uri("/api/v1/matching/end")
        .set_json(serde_json::json!({ "session_id": session_id, "user_id": "bob" }))
        .to_request();
    let resp: EndSessionResponse = test::call_and_read_body_json(&app, req).await;
    assert!(resp.already_ended);

    let req = test::TestRequest::post()
        .uri("/api/v1/matching/rate")
        .set_json(serde_json::json!({ "session_id": session_id, "user_id": "mallory", "rating": "good" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::post()
        .uri("/api/v1/matching/rate")
        .set_json(serde_json::json!({ "session_id": session_id, "user_id": "bob", "rating": "good" }))
        .to_request();
    let resp: RateSessionResponse = test::call_and_read_body_json(&app, req).await;
    assert!(!resp.both_rated);
}

#[actix_web::test]
async fn test_signal_requires_upgrade() {
    let state = build_state(Arc::new(MemoryStore::new()));
    let session_id = pair(&state, "alice", "bob").await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/signal/{}/alice", session_id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UPGRADE_REQUIRED);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/signal/{}/alice", uuid::Uuid::new_v4()))
        .insert_header((header::UPGRADE, "websocket"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_http_signal_fallback_delivers_to_connected_channels() {
    let state = build_state(Arc::new(MemoryStore::new()));
    let session_id = pair(&state, "alice", "bob").await;
    let relay = state.relay.clone();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure_routes),
    )
    .await;

    // Nobody attached yet: the frame is dropped, not queued
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/signal/{}/alice", session_id))
        .set_payload("{\"type\":\"offer\"}")
        .to_request();
    let resp: SignalResponse = test::call_and_read_body_json(&app, req).await;
    assert!(resp.success);
    assert_eq!(resp.delivered, 0);

    let mut alice = relay.connect(session_id, "alice").await.unwrap();
    let mut bob = relay.connect(session_id, "bob").await.unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/signal/{}/bob", session_id))
        .set_payload("{\"type\":\"answer\"}")
        .to_request();
    let resp: SignalResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp.delivered, 1);

    let frame = alice.recv().await.unwrap();
    assert_eq!(frame, Frame::Text("{\"type\":\"answer\"}".to_string()));

    // The poster's own socket does not get its frame back
    let echoed = tokio::time::timeout(std::time::Duration::from_millis(50), bob.recv()).await;
    assert!(echoed.is_err());

    // Ended sessions no longer accept signaling
    let req = test::TestRequest::post()
        .uri("/api/v1/matching/end")
        .set_json(serde_json::json!({ "session_id": session_id, "user_id": "alice", "reason": "user_left" }))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/signal/{}/alice", session_id))
        .set_payload("late")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_signal_rejects_non_participants() {
    let state = build_state(Arc::new(MemoryStore::new()));
    let session_id = pair(&state, "alice", "bob").await;
    let relay = state.relay.clone();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure_routes),
    )
    .await;

    let mut alice = relay.connect(session_id, "alice").await.unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/signal/{}/mallory", session_id))
        .insert_header((header::UPGRADE, "websocket"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/signal/{}/mallory", session_id))
        .set_payload("{\"type\":\"offer\"}")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // Nothing from the outsider reached the participant
    let leaked = tokio::time::timeout(std::time::Duration::from_millis(50), alice.recv()).await;
    assert!(leaked.is_err());
    assert_eq!(relay.connection_count(session_id).await, 1);
}
