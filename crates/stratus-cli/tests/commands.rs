use std::path::{Path, PathBuf};

use serde_json::json;
use stratus_cli::commands::{self, PlanFile};
use stratus_engine::memory::{Call, Fault, MemoryBackend, MemoryVolumeHandler};
use stratus_engine::{
    Action, Cause, ErrorKind, HandlerRegistry, OpContext, Operation, PlanOptions, Reconciler,
};

const VOLUME: &str = MemoryVolumeHandler::RESOURCE_TYPE;

struct Workspace {
    _dir: tempfile::TempDir,
    root: PathBuf,
    backend: MemoryBackend,
    reconciler: Reconciler,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let backend = MemoryBackend::new();
        let registry = HandlerRegistry::new()
            .with(MemoryVolumeHandler::new(backend.clone()))
            .unwrap();
        Self {
            _dir: dir,
            root,
            backend,
            reconciler: Reconciler::new(registry),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn desired(&self, name: &str, size: u64) -> PathBuf {
        let path = self.path("desired.json");
        std::fs::write(&path, json!({"name": name, "size": size}).to_string()).unwrap();
        path
    }

    async fn plan(&self, desired: Option<&Path>) -> PlanFile {
        commands::plan(
            &self.reconciler,
            &OpContext::new(),
            VOLUME,
            desired,
            Some(&self.path("state.json")),
            PlanOptions::default(),
        )
        .await
        .unwrap()
    }

    async fn apply(&self, desired: Option<&Path>) -> eyre::Result<stratus_engine::ApplyOutcome> {
        commands::apply(
            &self.reconciler,
            &OpContext::new(),
            VOLUME,
            desired,
            &self.path("state.json"),
            None,
        )
        .await
    }

    fn state(&self) -> Vec<u8> {
        std::fs::read(self.path("state.json")).unwrap()
    }
}

#[tokio::test]
async fn create_then_noop() {
    let ws = Workspace::new();
    let desired = ws.desired("data", 10);

    let saved = ws.plan(Some(&desired)).await;
    assert_eq!(saved.plan.action, Action::Create);
    assert_eq!(saved.plan.cause, Cause::FirstProvision);
    assert_eq!(saved.prior, None);

    let outcome = ws.apply(Some(&desired)).await.unwrap();
    assert_eq!(outcome.action, Action::Create);
    let state: serde_json::Value = serde_json::from_slice(&ws.state()).unwrap();
    assert_eq!(state["name"], "data");

    assert_eq!(ws.plan(Some(&desired)).await.plan.action, Action::Noop);
}

#[tokio::test]
async fn delete_leaves_untracked_marker_and_repeats_quietly() {
    let ws = Workspace::new();
    let desired = ws.desired("data", 10);
    ws.apply(Some(&desired)).await.unwrap();

    let outcome = ws.apply(None).await.unwrap();
    assert_eq!(outcome.action, Action::Delete);
    assert!(ws.state().is_empty());
    assert!(ws.backend.is_empty().await);

    ws.backend.clear_calls().await;
    let again = ws.apply(None).await.unwrap();
    assert_eq!(again.action, Action::Delete);
    assert!(ws.state().is_empty());
    assert!(ws.backend.calls().await.is_empty());
}

#[tokio::test]
async fn saved_plan_applies_without_describe() {
    let ws = Workspace::new();
    ws.apply(Some(&ws.desired("data", 10))).await.unwrap();
    let desired = ws.desired("data", 20);

    let saved = ws.plan(Some(&desired)).await;
    assert_eq!(saved.plan.action, Action::Update);
    let plan_path = ws.path("plan.json");
    commands::save_plan(&plan_path, &saved).unwrap();

    ws.backend.clear_calls().await;
    let outcome = commands::apply(
        &ws.reconciler,
        &OpContext::new(),
        VOLUME,
        Some(&desired),
        &ws.path("state.json"),
        Some(&plan_path),
    )
    .await
    .unwrap();

    assert_eq!(outcome.action, Action::Update);
    assert_eq!(outcome.changed_attributes, vec!["size"]);
    let calls = ws.backend.calls().await;
    assert!(!calls.iter().any(|c| matches!(c, Call::Describe(_))), "{calls:?}");
}

#[tokio::test]
async fn saved_plan_is_refused_after_inputs_change() {
    let ws = Workspace::new();
    let desired = ws.desired("data", 10);
    let saved = ws.plan(Some(&desired)).await;
    let plan_path = ws.path("plan.json");
    commands::save_plan(&plan_path, &saved).unwrap();

    let desired = ws.desired("data", 30);
    let err = commands::apply(
        &ws.reconciler,
        &OpContext::new(),
        VOLUME,
        Some(&desired),
        &ws.path("state.json"),
        Some(&plan_path),
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("plan again"), "{err}");
    assert!(ws.backend.calls().await.is_empty());
}

#[tokio::test]
async fn failed_replace_records_untracked() {
    let ws = Workspace::new();
    ws.apply(Some(&ws.desired("data", 10))).await.unwrap();
    ws.backend
        .fail_next(Operation::Create, Fault::Remote("quota exceeded".into()))
        .await;

    let err = ws.apply(Some(&ws.desired("logs", 10))).await.unwrap_err();
    let apply_err = err
        .downcast_ref::<stratus_engine::ApplyError>()
        .expect("apply error");
    assert_eq!(apply_err.kind(), ErrorKind::Remote);
    assert!(ws.state().is_empty());

    // The marker means the next run provisions from scratch.
    let saved = ws.plan(Some(&ws.desired("logs", 10))).await;
    assert_eq!(saved.plan.action, Action::Create);
}

#[tokio::test]
async fn failed_update_keeps_prior_state() {
    let ws = Workspace::new();
    ws.apply(Some(&ws.desired("data", 10))).await.unwrap();
    let before = ws.state();
    ws.backend
        .fail_next(Operation::Update, Fault::Remote("throttled".into()))
        .await;

    ws.apply(Some(&ws.desired("data", 20))).await.unwrap_err();
    assert_eq!(ws.state(), before);
}

#[tokio::test]
async fn render_shows_replacement_fields() {
    let ws = Workspace::new();
    ws.apply(Some(&ws.desired("data", 10))).await.unwrap();

    let saved = ws.plan(Some(&ws.desired("logs", 20))).await;
    let text = commands::render_plan(VOLUME, &saved.plan);

    assert!(text.starts_with("memory_volume: replace (drift)\n"), "{text}");
    assert!(
        text.contains(r#"-/+ name: "data" => "logs" (forces replacement)"#),
        "{text}"
    );
    assert!(text.contains("~ size: 10 => 20"), "{text}");
}
