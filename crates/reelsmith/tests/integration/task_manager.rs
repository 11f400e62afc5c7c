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

use reelsmith::generation::GenerationStatusService;
use reelsmith::queue::{FailureOutcome, TaskManager};
use reelsmith::{GenerationState, RenderError, TaskError, TaskStatus};
use serde_json::json;
use std::time::Duration;

use crate::fixtures::{ago, fast_config, TestFixture};

#[tokio::test]
async fn test_submit_and_list_newest_first() {
    let fixture = TestFixture::new().await;
    let tasks = fixture.task_manager();

    let mut submitted = Vec::new();
    for clip in 0..3 {
        submitted.push(tasks.submit_task(42, json!({ "clip": clip })).await.unwrap());
        // distinct created_at values
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tasks.submit_task(7, json!({ "clip": 99 })).await.unwrap();

    let stats = tasks.get_stats().await.unwrap();
    assert_eq!(stats.count(TaskStatus::Queued), 4);
    assert_eq!(stats.count(TaskStatus::Processing), 0);

    let listed = tasks.get_tasks_by_account(42, 10, 0).await.unwrap();
    let listed_ids: Vec<_> = listed.iter().map(|t| t.id.clone()).collect();
    submitted.reverse();
    assert_eq!(listed_ids, submitted);
    assert!(listed.iter().all(|t| t.status == TaskStatus::Queued));

    let page = tasks.get_tasks_by_account(42, 2, 1).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].id, submitted[1]);
}

#[tokio::test]
async fn test_task_ids_use_key_prefix() {
    let fixture = TestFixture::new().await;
    let tasks = TaskManager::new(fixture.dal(), fast_config().key_prefix("render:").build());

    let id = tasks.submit_task(1, json!({})).await.unwrap();
    assert!(id.starts_with("render:"));

    let task = tasks.get_task(&id).await.unwrap();
    assert_eq!(task.payload, json!({}));
    assert!(task.queued_at.is_some());
}

#[tokio::test]
async fn test_get_unknown_task_is_not_found() {
    let fixture = TestFixture::new().await;
    let tasks = fixture.task_manager();

    assert!(matches!(
        tasks.get_task("task:missing").await,
        Err(TaskError::NotFound(_))
    ));
    assert!(matches!(
        tasks.retry_task("task:missing").await,
        Err(TaskError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_claim_is_fifo_and_exclusive() {
    let fixture = TestFixture::new().await;
    let tasks = fixture.task_manager();

    let first = tasks.submit_task(1, json!({ "n": 1 })).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = tasks.submit_task(1, json!({ "n": 2 })).await.unwrap();

    let a = tasks.claim_next("worker-a").await.unwrap().unwrap();
    let b = tasks.claim_next("worker-b").await.unwrap().unwrap();
    assert_eq!(a.id, first);
    assert_eq!(b.id, second);
    assert_eq!(a.status, TaskStatus::Processing);
    assert_eq!(a.worker_id.as_deref(), Some("worker-a"));
    assert!(a.started_at.is_some());
    assert!(a.last_heartbeat_at.is_some());

    assert!(tasks.claim_next("worker-c").await.unwrap().is_none());
}

#[tokio::test]
async fn test_complete_records_timing() {
    let fixture = TestFixture::new().await;
    let tasks = fixture.task_manager();

    let id = tasks.submit_task(1, json!({})).await.unwrap();
    tasks.claim_next("worker-a").await.unwrap().unwrap();
    let done = tasks.complete_task(&id, "worker-a", 120).await.unwrap();

    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.processing_time_ms, 120);
    assert!(done.completed_at.is_some());

    let stats = tasks.get_stats().await.unwrap();
    assert_eq!(stats.count(TaskStatus::Completed), 1);
    assert_eq!(stats.completed_since, 1);
    assert_eq!(stats.avg_processing_time_ms, Some(120.0));
}

#[tokio::test]
async fn test_fail_retries_then_fails() {
    let fixture = TestFixture::new().await;
    let tasks = fixture.task_manager();
    let error = RenderError::Failed("encoder crashed".to_string());

    let id = tasks.submit_task(1, json!({})).await.unwrap();

    // max_retries is 2: two requeues, then a terminal failure
    for attempt in 1..=2 {
        let claimed = wait_for_claim(&tasks, "worker-a").await;
        assert_eq!(claimed.id, id);
        match tasks.fail_task(&claimed, "worker-a", &error, 10).await.unwrap() {
            FailureOutcome::Retrying { retry_count, .. } => assert_eq!(retry_count, attempt),
            FailureOutcome::Failed => panic!("expected a retry on attempt {}", attempt),
        }
        let task = tasks.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(task.worker_id.is_none());
        assert_eq!(task.error_message.as_deref(), Some("Render failed: encoder crashed"));
    }

    let claimed = wait_for_claim(&tasks, "worker-a").await;
    assert!(matches!(
        tasks.fail_task(&claimed, "worker-a", &error, 10).await.unwrap(),
        FailureOutcome::Failed
    ));

    let task = tasks.get_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert!(task.failed_at.is_some());
}

#[tokio::test]
async fn test_backoff_delays_reclaim() {
    let fixture = TestFixture::new().await;
    let tasks = TaskManager::new(
        fixture.dal(),
        fast_config()
            .initial_retry_delay(Duration::from_secs(30))
            .max_retry_delay(Duration::from_secs(60))
            .build(),
    );

    tasks.submit_task(1, json!({})).await.unwrap();
    let claimed = tasks.claim_next("worker-a").await.unwrap().unwrap();
    tasks
        .fail_task(&claimed, "worker-a", &RenderError::Failed("boom".into()), 5)
        .await
        .unwrap();

    // queued, but not claimable until its retry time passes
    assert!(tasks.claim_next("worker-a").await.unwrap().is_none());
    let task = tasks.get_task(&claimed.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert!(task.retry_at.is_some());
}

#[tokio::test]
async fn test_retry_guard() {
    let fixture = TestFixture::new().await;
    let tasks = TaskManager::new(fixture.dal(), fast_config().max_retries(0).build());

    let id = tasks.submit_task(1, json!({})).await.unwrap();
    match tasks.retry_task(&id).await {
        Err(TaskError::InvalidState {
            operation, status, ..
        }) => {
            assert_eq!(operation, "retry");
            assert_eq!(status, TaskStatus::Queued);
        }
        other => panic!("expected InvalidState, got {:?}", other),
    }

    let claimed = tasks.claim_next("worker-a").await.unwrap().unwrap();
    tasks
        .fail_task(&claimed, "worker-a", &RenderError::Failed("boom".into()), 5)
        .await
        .unwrap();

    let retried = tasks.retry_task(&id).await.unwrap();
    assert_eq!(retried.status, TaskStatus::Queued);
    assert_eq!(retried.retry_count, 1);
    assert!(tasks.claim_next("worker-a").await.unwrap().is_some());
}

#[tokio::test]
async fn test_cancel_guard_names_current_status() {
    let fixture = TestFixture::new().await;
    let tasks = fixture.task_manager();

    let id = tasks.submit_task(1, json!({})).await.unwrap();
    tasks.claim_next("worker-a").await.unwrap().unwrap();

    let err = tasks.cancel_task(&id).await.unwrap_err();
    assert!(matches!(
        err,
        TaskError::InvalidState {
            status: TaskStatus::Processing,
            operation: "cancel",
            ..
        }
    ));
    assert!(err.to_string().contains("Processing"));
}

#[tokio::test]
async fn test_cancel_queued_task() {
    let fixture = TestFixture::new().await;
    let tasks = fixture.task_manager();

    let id = tasks.submit_task(1, json!({})).await.unwrap();
    let canceled = tasks.cancel_task(&id).await.unwrap();
    assert_eq!(canceled.status, TaskStatus::Canceled);
    assert!(canceled.canceled_at.is_some());

    assert!(tasks.claim_next("worker-a").await.unwrap().is_none());
    assert!(tasks.cancel_task(&id).await.is_err());
}

#[tokio::test]
async fn test_orphaned_task_found_and_requeued() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let tasks = fixture.task_manager();

    let id = tasks.submit_task(1, json!({})).await.unwrap();
    tasks.claim_next("worker-a").await.unwrap().unwrap();

    assert!(tasks
        .find_orphaned_tasks(Duration::from_secs(60))
        .await
        .unwrap()
        .is_empty());

    let stale = ago(Duration::from_secs(120));
    dal.task().backdate(&id, Some(stale), Some(stale)).await.unwrap();

    let orphans = tasks.find_orphaned_tasks(Duration::from_secs(60)).await.unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].id, id);

    let requeued = tasks.requeue_orphaned_task(&id).await.unwrap();
    assert_eq!(requeued.status, TaskStatus::Queued);
    assert_eq!(requeued.retry_count, 1);
    assert!(requeued.worker_id.is_none());
    assert!(requeued.last_heartbeat_at.is_none());
}

#[tokio::test]
async fn test_missing_heartbeat_counts_as_orphaned() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let tasks = fixture.task_manager();

    let id = tasks.submit_task(1, json!({})).await.unwrap();
    tasks.claim_next("worker-a").await.unwrap().unwrap();
    dal.task()
        .backdate(&id, Some(ago(Duration::from_secs(1))), None)
        .await
        .unwrap();

    let orphans = tasks.find_orphaned_tasks(Duration::from_secs(60)).await.unwrap();
    assert_eq!(orphans.len(), 1);
}

#[tokio::test]
async fn test_stale_claim_rejected_after_recovery() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let tasks = fixture.task_manager();

    let id = tasks.submit_task(1, json!({})).await.unwrap();
    tasks.claim_next("worker-a").await.unwrap().unwrap();
    let stale = ago(Duration::from_secs(120));
    dal.task().backdate(&id, Some(stale), Some(stale)).await.unwrap();

    assert_eq!(
        tasks
            .recover_orphaned_tasks(Duration::from_secs(60))
            .await
            .unwrap(),
        1
    );
    let reclaimed = tasks.claim_next("worker-b").await.unwrap().unwrap();
    assert_eq!(reclaimed.id, id);

    // the original worker wakes up and reports late
    assert!(!tasks.heartbeat(&id, "worker-a").await.unwrap());
    assert!(matches!(
        tasks.complete_task(&id, "worker-a", 10).await,
        Err(TaskError::ClaimLost { .. })
    ));

    let task = tasks.get_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
    assert_eq!(task.worker_id.as_deref(), Some("worker-b"));
}

#[tokio::test]
async fn test_expired_tasks_recovered() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let tasks = fixture.task_manager();

    let id = tasks.submit_task(1, json!({})).await.unwrap();
    tasks.claim_next("worker-a").await.unwrap().unwrap();
    // still heartbeating, but running far too long
    dal.task()
        .backdate(&id, Some(ago(Duration::from_secs(3600))), Some(ago(Duration::ZERO)))
        .await
        .unwrap();

    let expired = tasks
        .find_expired_processing_tasks(Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(expired.len(), 1);
    assert!(tasks
        .find_orphaned_tasks(Duration::from_secs(60))
        .await
        .unwrap()
        .is_empty());

    assert_eq!(
        tasks
            .recover_expired_tasks(Duration::from_secs(600))
            .await
            .unwrap(),
        1
    );
    assert_eq!(tasks.get_task(&id).await.unwrap().status, TaskStatus::Queued);
}

#[tokio::test]
async fn test_orphan_without_retries_left_is_failed() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let tasks = TaskManager::new(fixture.dal(), fast_config().max_retries(0).build());

    let id = tasks.submit_task(1, json!({})).await.unwrap();
    tasks.claim_next("worker-a").await.unwrap().unwrap();
    let stale = ago(Duration::from_secs(120));
    dal.task().backdate(&id, Some(stale), Some(stale)).await.unwrap();

    assert_eq!(
        tasks
            .recover_orphaned_tasks(Duration::from_secs(60))
            .await
            .unwrap(),
        1
    );
    let task = tasks.get_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.is_some());
}

#[tokio::test]
async fn test_batch_counters_follow_task_lifecycle() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let tasks = TaskManager::new(dal.clone(), fast_config().max_retries(0).build());
    let statuses = GenerationStatusService::new(dal.clone());

    let status = statuses.create_status(5, "video", None).await.unwrap();
    let ids = tasks
        .submit_batch(5, &status.id, vec![json!({ "n": 1 }), json!({ "n": 2 }), json!({ "n": 3 })])
        .await
        .unwrap();
    assert_eq!(ids.len(), 3);

    let current = statuses.get_status(&status.id).await.unwrap();
    assert_eq!(current.total_queued, 3);

    let a = tasks.claim_next("worker-a").await.unwrap().unwrap();
    let b = tasks.claim_next("worker-b").await.unwrap().unwrap();
    let current = statuses.get_status(&status.id).await.unwrap();
    assert_eq!(current.status, GenerationState::Processing);
    assert_eq!((current.total_queued, current.total_processing), (1, 2));

    tasks.complete_task(&a.id, "worker-a", 10).await.unwrap();
    tasks
        .fail_task(&b, "worker-b", &RenderError::Failed("boom".into()), 10)
        .await
        .unwrap();
    let remaining = ids
        .iter()
        .find(|id| **id != a.id && **id != b.id)
        .unwrap();
    tasks.cancel_task(remaining).await.unwrap();

    let current = statuses.get_status(&status.id).await.unwrap();
    assert_eq!(current.total_queued, 0);
    assert_eq!(current.total_processing, 0);
    assert_eq!(current.total_completed, 1);
    assert_eq!(current.total_failed, 2);
    assert_eq!(current.total_units(), 3);
    // settled after the last unit finished
    assert_eq!(current.status, GenerationState::Completed);
}

#[tokio::test]
async fn test_submit_batch_to_unknown_status_rolls_back() {
    let fixture = TestFixture::new().await;
    let tasks = fixture.task_manager();

    let result = tasks
        .submit_batch(1, "missing", vec![json!({}), json!({})])
        .await;
    assert!(matches!(result, Err(TaskError::NotFound(_))));
    assert!(tasks.get_tasks_by_account(1, 10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dead_letter_alert_does_not_block_failure() {
    let fixture = TestFixture::new().await;
    let tasks = TaskManager::new(
        fixture.dal(),
        fast_config().max_retries(0).dlq_alert_threshold(1).build(),
    );

    for _ in 0..3 {
        tasks.submit_task(1, json!({})).await.unwrap();
        let claimed = tasks.claim_next("worker-a").await.unwrap().unwrap();
        let outcome = tasks
            .fail_task(&claimed, "worker-a", &RenderError::Failed("boom".into()), 1)
            .await
            .unwrap();
        assert!(matches!(outcome, FailureOutcome::Failed));
    }

    let stats = tasks.get_stats().await.unwrap();
    assert_eq!(stats.failed_since, 3);
}

async fn wait_for_claim(tasks: &TaskManager, worker_id: &str) -> reelsmith::Task {
    for _ in 0..200 {
        if let Some(task) = tasks.claim_next(worker_id).await.unwrap() {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no task became claimable");
}
