use std::time::Duration;

use serde_json::{Value, json};
use stratus_engine::memory::{Call, Fault, MemoryBackend, MemoryVolumeHandler};
use stratus_engine::{
    Action, ErrorKind, HandlerRegistry, NewState, OpContext, Operation, Reconciler, Request,
    StateAfterFailure, WaitPolicy,
};
use tokio_util::sync::CancellationToken;

const VOLUME: &str = MemoryVolumeHandler::RESOURCE_TYPE;

fn setup() -> (MemoryBackend, Reconciler) {
    let backend = MemoryBackend::new();
    let registry = HandlerRegistry::new()
        .with(MemoryVolumeHandler::new(backend.clone()))
        .expect("register memory volume");
    (backend, Reconciler::new(registry))
}

fn config(name: &str, size: u64) -> Vec<u8> {
    serde_json::to_vec(&json!({"name": name, "size": size})).unwrap()
}

fn id_of(state: &[u8]) -> String {
    serde_json::from_slice::<Value>(state).unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string()
}

fn fast_waits() -> OpContext {
    OpContext::new().with_wait_policy(WaitPolicy {
        timeout: Duration::from_secs(2),
        interval: Duration::from_millis(5),
    })
}

async fn provision(reconciler: &Reconciler, desired: &[u8]) -> Vec<u8> {
    reconciler
        .apply(&OpContext::new(), Request::new(VOLUME, Some(desired), None))
        .await
        .expect("initial apply")
        .new_state
        .into_bytes()
}

#[tokio::test]
async fn create_records_backend_assigned_id() {
    let (backend, reconciler) = setup();
    let desired = config("a", 10);

    let outcome = reconciler
        .apply(&OpContext::new(), Request::new(VOLUME, Some(&desired), None))
        .await
        .unwrap();

    assert_eq!(outcome.action, Action::Create);
    let state: Value = serde_json::from_slice(outcome.new_state.as_bytes()).unwrap();
    assert_eq!(state["name"], "a");
    assert_eq!(state["size"], 10);
    assert!(backend.exists(state["id"].as_str().unwrap()).await);
}

#[tokio::test]
async fn delete_twice_is_idempotent() {
    let (backend, reconciler) = setup();
    let ctx = OpContext::new();
    let state = provision(&reconciler, &config("a", 10)).await;

    let first = reconciler
        .apply(&ctx, Request::new(VOLUME, None, Some(&state)))
        .await
        .unwrap();
    assert_eq!(first.action, Action::Delete);
    assert_eq!(first.new_state, NewState::Untracked);

    let after_first = first.new_state.into_bytes();
    assert!(after_first.is_empty());
    backend.clear_calls().await;

    let second = reconciler
        .apply(&ctx, Request::new(VOLUME, None, Some(&after_first)))
        .await
        .unwrap();
    assert_eq!(second.new_state, NewState::Untracked);
    assert!(backend.calls().await.is_empty());
}

#[tokio::test]
async fn create_then_delete_leaves_nothing_behind() {
    let (backend, reconciler) = setup();
    let desired = config("a", 10);
    let state = provision(&reconciler, &desired).await;
    let id = id_of(&state);

    reconciler
        .apply(&OpContext::new(), Request::new(VOLUME, None, Some(&state)))
        .await
        .unwrap();

    assert!(!backend.exists(&id).await);
    assert!(backend.is_empty().await);

    // A plan against the stale state now sees the object as gone.
    let plan = reconciler
        .plan(&OpContext::new(), Request::new(VOLUME, Some(&desired), Some(&state)))
        .await
        .unwrap();
    assert_eq!(plan.action, Action::Create);
}

#[tokio::test]
async fn deleting_an_already_gone_object_succeeds() {
    let (backend, reconciler) = setup();
    let state = provision(&reconciler, &config("a", 10)).await;
    backend.remove_out_of_band(&id_of(&state)).await;

    let outcome = reconciler
        .apply(&OpContext::new(), Request::new(VOLUME, None, Some(&state)))
        .await
        .unwrap();
    assert!(outcome.new_state.is_untracked());
}

#[tokio::test]
async fn not_found_from_delete_is_swallowed() {
    let (backend, reconciler) = setup();
    let state = provision(&reconciler, &config("a", 10)).await;
    backend.fail_next(Operation::Delete, Fault::NotFound).await;

    let outcome = reconciler
        .apply(&OpContext::new(), Request::new(VOLUME, None, Some(&state)))
        .await
        .unwrap();
    assert!(outcome.new_state.is_untracked());
}

#[tokio::test]
async fn noop_returns_prior_state_byte_for_byte() {
    let (backend, reconciler) = setup();
    let desired = config("a", 10);
    let state = provision(&reconciler, &desired).await;
    backend.clear_calls().await;

    let outcome = reconciler
        .apply(&OpContext::new(), Request::new(VOLUME, Some(&desired), Some(&state)))
        .await
        .unwrap();

    assert_eq!(outcome.action, Action::Noop);
    assert_eq!(outcome.new_state.as_bytes(), state.as_slice());
    let calls = backend.calls().await;
    assert_eq!(calls.len(), 1, "only the plan's describe: {calls:?}");
}

#[tokio::test]
async fn applied_state_plans_noop_afterwards() {
    let (_backend, reconciler) = setup();
    let ctx = OpContext::new();
    let state = provision(&reconciler, &config("a", 10)).await;

    let bigger = config("a", 20);
    let updated = reconciler
        .apply(&ctx, Request::new(VOLUME, Some(&bigger), Some(&state)))
        .await
        .unwrap();
    assert_eq!(updated.action, Action::Update);
    assert_eq!(updated.changed_attributes, vec!["size"]);

    let new_state = updated.new_state.into_bytes();
    assert_eq!(id_of(&new_state), id_of(&state));

    let plan = reconciler
        .plan(&ctx, Request::new(VOLUME, Some(&bigger), Some(&new_state)))
        .await
        .unwrap();
    assert_eq!(plan.action, Action::Noop);
}

#[tokio::test]
async fn update_keeps_prior_fields_the_handler_did_not_return() {
    let (_backend, reconciler) = setup();
    let state = provision(&reconciler, &config("a", 10)).await;

    // Extra bookkeeping written by an older handler version.
    let mut recorded: Value = serde_json::from_slice(&state).unwrap();
    recorded["schema"] = json!(1);
    let state = serde_json::to_vec(&recorded).unwrap();

    let outcome = reconciler
        .apply(&OpContext::new(), Request::new(VOLUME, Some(&config("a", 20)), Some(&state)))
        .await
        .unwrap();

    let merged: Value = serde_json::from_slice(outcome.new_state.as_bytes()).unwrap();
    assert_eq!(merged["schema"], 1);
    assert_eq!(merged["size"], 20);
    assert_eq!(merged["id"], recorded["id"]);
}

#[tokio::test]
async fn replace_deletes_before_creating() {
    let (backend, reconciler) = setup();
    let state = provision(&reconciler, &config("a", 10)).await;
    let old_id = id_of(&state);
    backend.clear_calls().await;

    let outcome = reconciler
        .apply(&OpContext::new(), Request::new(VOLUME, Some(&config("b", 10)), Some(&state)))
        .await
        .unwrap();

    assert_eq!(outcome.action, Action::Replace);
    let calls = backend.calls().await;
    assert_eq!(
        calls,
        vec![
            Call::Describe(old_id.clone()),
            Call::Delete(old_id.clone()),
            Call::Create("b".to_string()),
        ]
    );
    let new_id = id_of(outcome.new_state.as_bytes());
    assert_ne!(new_id, old_id);
    assert!(!backend.exists(&old_id).await);
    assert!(backend.exists(&new_id).await);
}

#[tokio::test]
async fn replace_aborts_when_delete_fails() {
    let (backend, reconciler) = setup();
    let state = provision(&reconciler, &config("a", 10)).await;
    let old_id = id_of(&state);
    backend
        .fail_next(Operation::Delete, Fault::Remote("DependencyViolation".into()))
        .await;
    backend.clear_calls().await;

    let err = reconciler
        .apply(&OpContext::new(), Request::new(VOLUME, Some(&config("b", 10)), Some(&state)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Remote);
    assert_eq!(err.state, StateAfterFailure::Unchanged);
    assert!(
        !backend
            .calls()
            .await
            .iter()
            .any(|c| matches!(c, Call::Create(_)))
    );
    assert!(backend.exists(&old_id).await);
}

#[tokio::test]
async fn replace_with_failed_create_reports_untracked() {
    let (backend, reconciler) = setup();
    let ctx = OpContext::new();
    let state = provision(&reconciler, &config("a", 10)).await;
    backend
        .fail_next(Operation::Create, Fault::Remote("QuotaExceeded".into()))
        .await;

    let renamed = config("b", 10);
    let err = reconciler
        .apply(&ctx, Request::new(VOLUME, Some(&renamed), Some(&state)))
        .await
        .unwrap_err();

    assert_eq!(err.state, StateAfterFailure::Untracked);
    assert!(err.to_string().contains("QuotaExceeded"));
    assert!(backend.is_empty().await);

    // Storing the untracked marker makes the next plan a plain create.
    let plan = reconciler
        .plan(&ctx, Request::new(VOLUME, Some(&renamed), Some(b"")))
        .await
        .unwrap();
    assert_eq!(plan.action, Action::Create);
}

#[tokio::test]
async fn create_adopts_existing_object_we_own() {
    let (backend, reconciler) = setup();
    let ctx = OpContext::new().with_owner("team-a");
    let existing = backend.insert("a", 10, "team-a").await;

    let outcome = reconciler
        .apply(&ctx, Request::new(VOLUME, Some(&config("a", 10)), None))
        .await
        .unwrap();

    assert_eq!(outcome.action, Action::Create);
    assert_eq!(id_of(outcome.new_state.as_bytes()), existing);
    assert!(backend.calls().await.contains(&Call::Adopt("a".to_string())));
    assert_eq!(backend.len().await, 1);
}

#[tokio::test]
async fn create_refuses_object_owned_by_someone_else() {
    let (backend, reconciler) = setup();
    let ctx = OpContext::new().with_owner("team-a");
    backend.insert("a", 10, "team-b").await;

    let err = reconciler
        .apply(&ctx, Request::new(VOLUME, Some(&config("a", 10)), None))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(err.state, StateAfterFailure::Unchanged);
}

#[tokio::test]
async fn repeated_create_delivery_converges_to_one_object() {
    let (backend, reconciler) = setup();
    let ctx = OpContext::new();
    let desired = config("a", 10);

    let first = reconciler
        .apply(&ctx, Request::new(VOLUME, Some(&desired), None))
        .await
        .unwrap();
    let second = reconciler
        .apply(&ctx, Request::new(VOLUME, Some(&desired), None))
        .await
        .unwrap();

    assert_eq!(first.new_state, second.new_state);
    assert_eq!(backend.len().await, 1);
}

#[tokio::test]
async fn update_of_vanished_object_asks_for_replan() {
    let (backend, reconciler) = setup();
    let ctx = OpContext::new();
    let state = provision(&reconciler, &config("a", 10)).await;
    let bigger = config("a", 20);
    let request = Request::new(VOLUME, Some(&bigger), Some(&state));

    let plan = reconciler.plan(&ctx, request).await.unwrap();
    assert_eq!(plan.action, Action::Update);

    backend.remove_out_of_band(&id_of(&state)).await;

    let err = reconciler.apply_plan(&ctx, request, &plan).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.state, StateAfterFailure::Unchanged);

    let replanned = reconciler.plan(&ctx, request).await.unwrap();
    assert_eq!(replanned.action, Action::Create);
}

#[tokio::test]
async fn apply_plan_skips_the_live_read() {
    let (backend, reconciler) = setup();
    let ctx = OpContext::new();
    let state = provision(&reconciler, &config("a", 10)).await;
    let bigger = config("a", 20);
    let request = Request::new(VOLUME, Some(&bigger), Some(&state));

    let plan = reconciler.plan(&ctx, request).await.unwrap();
    backend.clear_calls().await;

    let outcome = reconciler.apply_plan(&ctx, request, &plan).await.unwrap();
    assert_eq!(outcome.changed_attributes, vec!["size"]);
    assert_eq!(backend.calls().await, vec![Call::Update(id_of(&state))]);
}

#[tokio::test]
async fn malformed_desired_config_fails_before_any_remote_call() {
    let (backend, reconciler) = setup();

    let err = reconciler
        .apply(&OpContext::new(), Request::new(VOLUME, Some(br#"{"name": "a"}"#), None))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Decode);
    assert!(err.to_string().contains("size"), "{err}");
    assert!(backend.calls().await.is_empty());
}

#[tokio::test]
async fn create_waits_for_the_object_to_settle() {
    let (backend, reconciler) = setup();
    backend.set_settle_polls(3).await;

    let outcome = reconciler
        .apply(&fast_waits(), Request::new(VOLUME, Some(&config("a", 10)), None))
        .await
        .unwrap();

    assert_eq!(outcome.action, Action::Create);
}

#[tokio::test]
async fn create_that_never_settles_times_out() {
    let (backend, reconciler) = setup();
    backend.set_settle_polls(u32::MAX).await;
    let ctx = OpContext::new().with_wait_policy(WaitPolicy {
        timeout: Duration::from_millis(50),
        interval: Duration::from_millis(10),
    });

    let err = reconciler
        .apply(&ctx, Request::new(VOLUME, Some(&config("a", 10)), None))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.source.is_retryable());
}

#[tokio::test]
async fn hung_remote_call_hits_the_deadline() {
    let (backend, reconciler) = setup();
    backend.fail_next(Operation::Create, Fault::Hang).await;
    let ctx = OpContext::new().with_timeout(Duration::from_millis(50));

    let err = reconciler
        .apply(&ctx, Request::new(VOLUME, Some(&config("a", 10)), None))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn cancelled_context_stops_the_apply() {
    let (backend, reconciler) = setup();
    backend.fail_next(Operation::Create, Fault::Hang).await;
    let token = CancellationToken::new();
    let ctx = OpContext::new().with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let err = reconciler
        .apply(&ctx, Request::new(VOLUME, Some(&config("a", 10)), None))
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
}
