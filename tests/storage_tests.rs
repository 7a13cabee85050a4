// ABOUTME: Integration tests for durable context storage
// ABOUTME: Tests persistence across restarts, claims shared between owners, deletion and append mode

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use labgraph::discriminator::DiscriminatorSet;
use labgraph::engine::{
    ClaimRecord, ContextResolution, ContextStatus, EngineError, ErrorDescriptor,
    ExistingRunningPolicy, FailureKind, ResolvePolicy, TaskConfiguration, TaskContextFactory,
};
use labgraph::storage::{FileSystemStorage, StoragePolicy, StorageService};

mod common;
use common::{engine, filesystem_storage, Behavior, TestTask, OUTPUT_ARTIFACT};

#[tokio::test]
async fn test_completed_contexts_survive_restart() {
    let temp_dir = TempDir::new().unwrap();

    let first_run = {
        let engine = engine(filesystem_storage(&temp_dir).await);
        let task = TestTask::new("Train").with("algo", "svm").build();
        let result = engine.execute(task.clone()).await.unwrap();
        assert_eq!(task.runs(), 1);
        result
    };

    // a fresh storage and engine over the same root, as after a restart
    let engine = engine(filesystem_storage(&temp_dir).await);
    let task = TestTask::new("Train").with("algo", "svm").build();
    let second_run = engine.execute(task.clone()).await.unwrap();

    assert_eq!(task.runs(), 0);
    assert!(second_run.root().unwrap().cache_hit);
    assert_eq!(first_run.context_id("Train"), second_run.context_id("Train"));

    let id = second_run.context_id("Train").unwrap();
    let output = engine
        .storage()
        .retrieve(id, OUTPUT_ARTIFACT)
        .await
        .unwrap();
    assert!(String::from_utf8(output).unwrap().starts_with("Train:"));

    let context_dir = temp_dir.path().join("store").join(id.as_str());
    assert!(context_dir.join("context.json").exists());
    assert!(context_dir.join("discriminators.json").exists());
    assert!(context_dir.join(OUTPUT_ARTIFACT).exists());
}

fn simulate_configuration() -> TaskConfiguration {
    TaskConfiguration::new(
        "Simulate",
        DiscriminatorSet::new().with("steps", 10).unwrap(),
    )
}

fn policy(on_existing_running: ExistingRunningPolicy, wait_timeout: Option<Duration>) -> ResolvePolicy {
    ResolvePolicy {
        on_existing_running,
        wait_timeout,
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_record_of_exited_owner_is_replaced() {
    let temp_dir = TempDir::new().unwrap();
    let configuration = simulate_configuration();
    let id = configuration.context_id().unwrap();

    {
        let factory = TaskContextFactory::new(filesystem_storage(&temp_dir).await);
        let resolution = factory.create_context(&configuration, vec![]).await.unwrap();
        let mut context = resolution.into_context();
        factory.mark_running(&mut context).await.unwrap();
    }

    // the owning process went away without finishing
    let storage = filesystem_storage(&temp_dir).await;
    let held = storage.read_claim(&id).await.unwrap().unwrap();
    assert!(storage.release_claim(&id, &held).await.unwrap());
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let exited = ClaimRecord {
        pid: child.id(),
        ..ClaimRecord::for_owner("crashed")
    };
    child.wait().unwrap();
    assert!(storage
        .try_claim(&id, &exited.to_bytes().unwrap())
        .await
        .unwrap());

    let factory = TaskContextFactory::new(storage);
    let stale = factory.get_context(&id).await.unwrap();
    assert_eq!(stale.status, ContextStatus::Running);

    let reject = policy(ExistingRunningPolicy::Reject, None);
    match factory.resolve(&configuration, vec![], reject).await.unwrap() {
        ContextResolution::Created(context) => {
            assert_eq!(context.status, ContextStatus::Pending)
        }
        ContextResolution::Existing(_) => panic!("a stale record must not be reused"),
    }
}

#[tokio::test]
async fn test_live_owner_in_another_factory_is_never_replaced() {
    let temp_dir = TempDir::new().unwrap();
    let configuration = simulate_configuration();

    // two factories over one root stand in for two processes
    let owner = TaskContextFactory::new(filesystem_storage(&temp_dir).await);
    let other = TaskContextFactory::new(filesystem_storage(&temp_dir).await);

    let mut context = owner
        .create_context(&configuration, vec![])
        .await
        .unwrap()
        .into_context();
    owner.mark_running(&mut context).await.unwrap();

    let err = other
        .resolve(&configuration, vec![], policy(ExistingRunningPolicy::Reject, None))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateRunningConfiguration { .. }));

    let err = other
        .resolve(
            &configuration,
            vec![],
            policy(ExistingRunningPolicy::Wait, Some(Duration::from_millis(250))),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::WaitTimeout { .. }));

    // a waiter picks up the result once the owner finishes
    let (waited, _) = tokio::join!(
        other.resolve(&configuration, vec![], policy(ExistingRunningPolicy::Wait, None)),
        async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            owner.mark_completed(&mut context).await.unwrap();
        }
    );
    let waited = waited.unwrap();
    assert!(waited.is_cache_hit());
    assert_eq!(waited.context().id, context.id);
}

#[tokio::test]
async fn test_waiter_in_another_factory_observes_failure() {
    let temp_dir = TempDir::new().unwrap();
    let configuration = simulate_configuration();

    let owner = TaskContextFactory::new(filesystem_storage(&temp_dir).await);
    let other = TaskContextFactory::new(filesystem_storage(&temp_dir).await);

    let mut context = owner
        .create_context(&configuration, vec![])
        .await
        .unwrap()
        .into_context();

    let (waited, _) = tokio::join!(
        other.resolve(&configuration, vec![], policy(ExistingRunningPolicy::Wait, None)),
        async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            owner
                .mark_failed(
                    &mut context,
                    ErrorDescriptor::new(FailureKind::Execution, "out of memory"),
                    false,
                )
                .await
                .unwrap();
        }
    );

    assert!(matches!(
        waited.unwrap_err(),
        EngineError::ConfiguredExecutionFailed { ref message, .. } if message == "out of memory"
    ));
}

#[tokio::test]
async fn test_delete_and_garbage_collection() {
    let temp_dir = TempDir::new().unwrap();
    let storage = filesystem_storage(&temp_dir).await;
    let engine = engine(Arc::clone(&storage));

    let good = engine
        .execute(TestTask::new("Good").build())
        .await
        .unwrap();
    let bad = engine
        .execute(
            TestTask::new("Bad")
                .behavior(Behavior::Fail("nope".to_string()))
                .build(),
        )
        .await
        .unwrap();

    let good_id = good.context_id("Good").unwrap().clone();
    let bad_id = bad.context_id("Bad").unwrap().clone();
    assert_eq!(storage.list_contexts().await.unwrap().len(), 2);

    let candidates = engine.factory().collect_garbage(true).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].id, bad_id);
    assert_eq!(storage.list_contexts().await.unwrap().len(), 2);

    engine.factory().collect_garbage(false).await.unwrap();
    assert_eq!(storage.list_contexts().await.unwrap(), vec![good_id.clone()]);
    assert!(!temp_dir.path().join("store").join(bad_id.as_str()).exists());

    let context = engine.factory().get_context(&good_id).await.unwrap();
    engine.factory().destroy_context(&context).await.unwrap();
    assert!(storage.list_contexts().await.unwrap().is_empty());
    assert!(engine.factory().get_context(&good_id).await.is_err());
}

#[tokio::test]
async fn test_append_mode_versions_persist() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("append");
    let policy = StoragePolicy::new().with_append_property("metrics.log");
    let id = TaskConfiguration::new("Train", DiscriminatorSet::new())
        .context_id()
        .unwrap();

    {
        let storage = FileSystemStorage::open_with_policy(&root, policy.clone())
            .await
            .unwrap();
        storage.store(&id, "metrics.log", b"epoch 1").await.unwrap();
        storage.store(&id, "metrics.log", b"epoch 2").await.unwrap();
        storage.store(&id, "model", b"v1").await.unwrap();
        storage.store(&id, "model", b"v2").await.unwrap();
    }

    let storage = FileSystemStorage::open_with_policy(&root, policy)
        .await
        .unwrap();
    storage.store(&id, "metrics.log", b"epoch 3").await.unwrap();

    assert_eq!(
        storage.retrieve(&id, "metrics.log").await.unwrap(),
        b"epoch 3".to_vec()
    );
    assert_eq!(
        storage.retrieve_all(&id, "metrics.log").await.unwrap(),
        vec![b"epoch 1".to_vec(), b"epoch 2".to_vec(), b"epoch 3".to_vec()]
    );
    assert_eq!(storage.retrieve(&id, "model").await.unwrap(), b"v2".to_vec());

    let mut properties = storage.list_properties(&id).await.unwrap();
    properties.sort();
    assert_eq!(properties, vec!["metrics.log".to_string(), "model".to_string()]);
}
