/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

use reelsmith::generation::GenerationOrchestrator;
use reelsmith::queue::TaskManager;
use reelsmith::{GenerationError, GenerationState, LockError, RenderError, TaskError, TaskStatus};
use serde_json::json;

use crate::fixtures::{fast_config, TestFixture};

#[tokio::test]
async fn test_start_generation_submits_batch() {
    let fixture = TestFixture::new().await;
    let tasks = fixture.task_manager();
    let orchestrator = GenerationOrchestrator::new(fixture.dal(), tasks.clone());

    let handle = orchestrator
        .start_generation(42, "video", vec![json!({ "clip": 1 }), json!({ "clip": 2 })])
        .await
        .unwrap();

    assert_eq!(handle.task_ids.len(), 2);
    assert!(orchestrator.is_generating(42, "video").await.unwrap());

    let status = orchestrator.get_generation(&handle.status_id).await.unwrap();
    assert_eq!(status.status, GenerationState::Queuing);
    assert_eq!(status.total_queued, 2);
    assert_eq!(status.lock_id.as_deref(), Some(handle.lock_id.as_str()));

    for id in &handle.task_ids {
        let task = tasks.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.generation_status_id.as_deref(), Some(handle.status_id.as_str()));
    }
}

#[tokio::test]
async fn test_second_generation_for_pair_is_rejected() {
    let fixture = TestFixture::new().await;
    let orchestrator = GenerationOrchestrator::new(fixture.dal(), fixture.task_manager());

    orchestrator
        .start_generation(42, "video", vec![json!({})])
        .await
        .unwrap();

    let second = orchestrator
        .start_generation(42, "video", vec![json!({})])
        .await;
    assert!(matches!(
        second,
        Err(GenerationError::Lock(LockError::LockHeld { account_id: 42, .. }))
    ));

    // a different content type is a different pair
    orchestrator
        .start_generation(42, "image", vec![json!({})])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_empty_generation_completes_immediately() {
    let fixture = TestFixture::new().await;
    let orchestrator = GenerationOrchestrator::new(fixture.dal(), fixture.task_manager());

    let handle = orchestrator
        .start_generation(42, "video", Vec::new())
        .await
        .unwrap();
    assert!(handle.task_ids.is_empty());

    let status = orchestrator.get_generation(&handle.status_id).await.unwrap();
    assert_eq!(status.status, GenerationState::Completed);
    assert!(!orchestrator.is_generating(42, "video").await.unwrap());
}

#[tokio::test]
async fn test_failed_batch_settles_as_failed() {
    let fixture = TestFixture::new().await;
    let tasks = fixture.task_manager();
    let orchestrator = GenerationOrchestrator::new(fixture.dal(), tasks.clone());

    let handle = orchestrator
        .start_generation(42, "video", vec![json!({})])
        .await
        .unwrap();
    tasks.cancel_task(&handle.task_ids[0]).await.unwrap();

    let status = orchestrator.get_generation(&handle.status_id).await.unwrap();
    assert_eq!(status.status, GenerationState::Failed);
    assert_eq!(status.total_failed, 1);
    assert!(!orchestrator.is_generating(42, "video").await.unwrap());
}

#[tokio::test]
async fn test_retry_in_settled_batch_takes_lock_back() {
    let fixture = TestFixture::new().await;
    let tasks = TaskManager::new(fixture.dal(), fast_config().max_retries(0).build());
    let orchestrator = GenerationOrchestrator::new(fixture.dal(), tasks.clone());

    let handle = orchestrator
        .start_generation(42, "video", vec![json!({})])
        .await
        .unwrap();
    let claimed = tasks.claim_next("worker-a").await.unwrap().unwrap();
    tasks
        .fail_task(&claimed, "worker-a", &RenderError::Failed("boom".into()), 5)
        .await
        .unwrap();
    assert_eq!(
        orchestrator.get_generation(&handle.status_id).await.unwrap().status,
        GenerationState::Failed
    );
    assert!(!orchestrator.is_generating(42, "video").await.unwrap());

    tasks.retry_task(&claimed.id).await.unwrap();

    let reopened = orchestrator.get_generation(&handle.status_id).await.unwrap();
    assert_eq!(reopened.status, GenerationState::Processing);
    assert!(orchestrator.is_generating(42, "video").await.unwrap());
    let lock = orchestrator
        .locks()
        .get_lock(42, "video")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reopened.lock_id.as_deref(), Some(lock.lock_id.as_str()));

    let second = orchestrator
        .start_generation(42, "video", vec![json!({})])
        .await;
    assert!(matches!(
        second,
        Err(GenerationError::Lock(LockError::LockHeld { account_id: 42, .. }))
    ));

    // finishing the retried unit settles the batch and frees the pair again
    let reclaimed = tasks.claim_next("worker-a").await.unwrap().unwrap();
    assert_eq!(reclaimed.id, claimed.id);
    tasks.complete_task(&reclaimed.id, "worker-a", 5).await.unwrap();

    let settled = orchestrator.get_generation(&handle.status_id).await.unwrap();
    assert_eq!(settled.status, GenerationState::Completed);
    assert!(!orchestrator.is_generating(42, "video").await.unwrap());
}

#[tokio::test]
async fn test_retry_in_settled_batch_refused_while_pair_is_busy() {
    let fixture = TestFixture::new().await;
    let tasks = TaskManager::new(fixture.dal(), fast_config().max_retries(0).build());
    let orchestrator = GenerationOrchestrator::new(fixture.dal(), tasks.clone());

    let first = orchestrator
        .start_generation(42, "video", vec![json!({})])
        .await
        .unwrap();
    let claimed = tasks.claim_next("worker-a").await.unwrap().unwrap();
    tasks
        .fail_task(&claimed, "worker-a", &RenderError::Failed("boom".into()), 5)
        .await
        .unwrap();

    let second = orchestrator
        .start_generation(42, "video", vec![json!({})])
        .await
        .unwrap();

    match tasks.retry_task(&claimed.id).await {
        Err(TaskError::LockHeld {
            operation,
            account_id,
            content_type,
            ..
        }) => {
            assert_eq!(operation, "retry");
            assert_eq!(account_id, 42);
            assert_eq!(content_type, "video");
        }
        other => panic!("expected LockHeld, got {:?}", other),
    }

    // nothing moved
    let task = tasks.get_task(&claimed.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 0);
    let batch = orchestrator.get_generation(&first.status_id).await.unwrap();
    assert_eq!(batch.status, GenerationState::Failed);
    assert_eq!((batch.total_queued, batch.total_failed), (0, 1));

    let lock = orchestrator
        .locks()
        .get_lock(42, "video")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lock.lock_id, second.lock_id);
}
