//! End-to-end informer runs against a mock transport.

use informer::mock::{Call, MockEvents, MockListWatch, RecordingHandler, test_deployment};
use informer::{
    Controller, ControllerConfig, InformerError, Phase, PreSyncPolicy, RunContext, Store, SyncGate,
    TransportError,
};
use k8s_openapi::api::apps::v1::Deployment;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    events: MockEvents<Deployment>,
    handler: RecordingHandler,
    gate: SyncGate,
    store: Store<Deployment>,
    phase: watch::Receiver<Phase>,
    ctx: RunContext,
    run: JoinHandle<Result<(), InformerError>>,
}

impl Harness {
    fn start(config: ControllerConfig) -> Self {
        let (transport, events) = MockListWatch::new();
        let handler = RecordingHandler::new();
        let controller = Controller::new(Arc::new(transport), Arc::new(handler.clone()), config);
        let gate = controller.gate();
        let store = controller.store();
        let phase = controller.phase();
        let ctx = RunContext::new();
        let run = tokio::spawn(controller.run(ctx.clone()));
        Self {
            events,
            handler,
            gate,
            store,
            phase,
            ctx,
            run,
        }
    }

    async fn wait_for_phase(&mut self, target: Phase) {
        tokio::time::timeout(TIMEOUT, self.phase.wait_for(|p| *p == target))
            .await
            .unwrap_or_else(|_| panic!("never reached {:?}", target))
            .expect("controller dropped");
    }

    async fn stop(self) -> (Result<(), InformerError>, RecordingHandler, MockEvents<Deployment>) {
        self.ctx.cancel();
        let result = tokio::time::timeout(TIMEOUT, self.run)
            .await
            .expect("controller did not stop")
            .expect("controller panicked");
        (result, self.handler, self.events)
    }
}

#[tokio::test]
async fn test_added_after_sync_fires_once() {
    let mut h = Harness::start(ControllerConfig::default());

    h.events.list([
        test_deployment("default", "a", "1"),
        test_deployment("default", "b", "1"),
    ]);
    h.wait_for_phase(Phase::Running).await;
    assert!(h.gate.read().await);
    assert_eq!(h.store.len(), 2);

    h.events.apply(test_deployment("default", "c", "1"));
    h.handler.wait_for_calls(1).await;

    let (result, handler, _) = h.stop().await;
    result.expect("run failed");
    assert_eq!(handler.calls(), vec![Call::Added("default/c".to_string())]);
}

#[tokio::test]
async fn test_listing_phase_events_never_reach_handler() {
    let mut h = Harness::start(ControllerConfig::default());

    h.events.init();
    for name in ["x", "y", "z"] {
        h.events.init_apply(test_deployment("default", name, "1"));
    }
    h.wait_for_phase(Phase::Syncing).await;
    assert!(!h.gate.read().await);
    h.events.init_done();
    h.wait_for_phase(Phase::Running).await;

    h.events.apply(test_deployment("default", "x", "2"));
    h.handler.wait_for_calls(1).await;

    let (result, handler, _) = h.stop().await;
    result.expect("run failed");
    assert_eq!(handler.calls(), vec![Call::Updated("default/x".to_string())]);
}

#[tokio::test]
async fn test_shutdown_during_sync_stops_without_opening_gate() {
    let mut h = Harness::start(ControllerConfig::default());

    h.events.init();
    h.events.init_apply(test_deployment("default", "a", "1"));
    h.wait_for_phase(Phase::Syncing).await;

    let gate = h.gate.clone();
    let phase = h.phase.clone();
    let (result, handler, _) = h.stop().await;

    assert!(matches!(result, Err(InformerError::SyncCancelled)), "{:?}", result);
    assert!(result.as_ref().is_err_and(InformerError::is_cancelled));
    assert!(!gate.read().await);
    assert_eq!(*phase.borrow(), Phase::Stopped);
    assert!(handler.calls().is_empty());
}

#[tokio::test]
async fn test_shutdown_after_running_stops_delivery() {
    let mut h = Harness::start(ControllerConfig::default());

    h.events.list([test_deployment("default", "a", "1")]);
    h.wait_for_phase(Phase::Running).await;
    h.events.apply(test_deployment("default", "a", "2"));
    h.handler.wait_for_calls(1).await;

    let phase = h.phase.clone();
    let (result, handler, events) = h.stop().await;
    result.expect("run failed");
    assert_eq!(*phase.borrow(), Phase::Stopped);

    // The cache loop has dropped the transport stream
    assert!(events.is_closed());
    events.apply(test_deployment("default", "late", "1"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(handler.calls(), vec![Call::Updated("default/a".to_string())]);
}

#[tokio::test]
async fn test_fatal_listing_error_fails_run() {
    let mut h = Harness::start(ControllerConfig::default());

    h.events.init();
    h.events.fail(TransportError::Fatal("deployments.apps is forbidden".to_string()));

    let result = tokio::time::timeout(TIMEOUT, &mut h.run)
        .await
        .expect("controller did not stop")
        .expect("controller panicked");
    match result {
        Err(InformerError::SyncFailed(reason)) => assert!(reason.contains("forbidden"), "{}", reason),
        other => panic!("expected sync failure, got {:?}", other),
    }
    assert!(!h.gate.read().await);
    assert_eq!(*h.phase.borrow(), Phase::Stopped);
    assert!(h.handler.calls().is_empty());
}

#[tokio::test]
async fn test_post_sync_events_each_dispatched_once() {
    let mut h = Harness::start(ControllerConfig::default());

    h.events.list([test_deployment("default", "a", "1")]);
    h.wait_for_phase(Phase::Running).await;

    h.events.apply(test_deployment("default", "b", "1"));
    h.events.apply(test_deployment("default", "a", "2"));
    // Unchanged resource version: no mutation, no event
    h.events.apply(test_deployment("default", "a", "2"));
    h.events.delete(test_deployment("default", "b", "2"));
    h.events.delete(test_deployment("default", "missing", "1"));
    h.handler.wait_for_calls(3).await;

    let (result, handler, _) = h.stop().await;
    result.expect("run failed");
    assert_eq!(
        handler.calls(),
        vec![
            Call::Added("default/b".to_string()),
            Call::Updated("default/a".to_string()),
            Call::Deleted("default/b".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_replay_policy_delivers_listing_after_sync() {
    let mut h = Harness::start(ControllerConfig {
        pre_sync: PreSyncPolicy::Replay,
        ..ControllerConfig::default()
    });

    h.events.list([
        test_deployment("default", "a", "1"),
        test_deployment("default", "b", "1"),
    ]);
    h.wait_for_phase(Phase::Running).await;
    h.handler.wait_for_calls(2).await;
    h.events.apply(test_deployment("default", "c", "1"));
    h.handler.wait_for_calls(3).await;

    let (result, handler, _) = h.stop().await;
    result.expect("run failed");
    assert_eq!(
        handler.calls(),
        vec![
            Call::Added("default/a".to_string()),
            Call::Added("default/b".to_string()),
            Call::Added("default/c".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_relist_after_sync_keeps_gate_open() {
    let mut h = Harness::start(ControllerConfig::default());

    h.events.list([
        test_deployment("default", "a", "1"),
        test_deployment("default", "b", "1"),
    ]);
    h.wait_for_phase(Phase::Running).await;

    h.events.fail(TransportError::Transient("watch stream reset".to_string()));
    h.events.list([test_deployment("default", "b", "1")]);
    h.handler.wait_for_calls(1).await;
    assert!(h.gate.read().await);

    let (result, handler, _) = h.stop().await;
    result.expect("run failed");
    assert_eq!(handler.calls(), vec![Call::Deleted("default/a".to_string())]);
}

#[tokio::test]
async fn test_failing_handler_does_not_stop_run() {
    let (transport, events) = MockListWatch::<Deployment>::new();
    let handler = RecordingHandler::failing();
    let controller = Controller::new(
        Arc::new(transport),
        Arc::new(handler.clone()),
        ControllerConfig::default(),
    );
    let mut phase = controller.phase();
    let ctx = RunContext::new();
    let run = tokio::spawn(controller.run(ctx.clone()));

    events.list(Vec::new());
    tokio::time::timeout(TIMEOUT, phase.wait_for(|p| *p == Phase::Running))
        .await
        .expect("never reached Running")
        .expect("controller dropped");

    events.apply(test_deployment("default", "a", "1"));
    events.apply(test_deployment("default", "b", "1"));
    handler.wait_for_calls(2).await;

    ctx.cancel();
    run.await.expect("controller panicked").expect("run failed");
    assert_eq!(handler.calls().len(), 2);
}

#[tokio::test]
#[ignore] // Requires a reachable cluster (KUBECONFIG or in-cluster)
async fn test_live_cluster_sync() {
    use informer::KubeListWatch;
    use kube::{Api, Client};
    use kube_runtime::watcher;

    let client = Client::try_default().await.expect("Failed to create client");
    let api: Api<Deployment> = Api::all(client);
    let transport = Arc::new(KubeListWatch::new(api, watcher::Config::default()));
    let controller = Controller::new(transport, Arc::new(RecordingHandler::new()), ControllerConfig::default());
    let gate = controller.gate();
    let mut phase = controller.phase();
    let ctx = RunContext::new();
    let run = tokio::spawn(controller.run(ctx.clone()));

    tokio::time::timeout(Duration::from_secs(30), phase.wait_for(|p| *p == Phase::Running))
        .await
        .expect("cache did not sync")
        .expect("controller dropped");
    assert!(gate.read().await);

    ctx.cancel();
    run.await.expect("controller panicked").expect("run failed");
}
