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

use reelsmith::generation::{
    GenerationLockService, GenerationOrchestrator, GenerationStatusService,
};
use reelsmith::recovery::{reconcile_on_startup, RecoveryOptions, RecoveryReport};
use reelsmith::sync::SyncStatusService;
use reelsmith::{GenerationState, TaskError, TaskStatus};
use serde_json::json;
use std::time::Duration;

use crate::fixtures::{ago, fast_config, TestFixture};

#[tokio::test]
async fn test_reconcile_on_startup_repairs_everything() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let config = fast_config().build();
    let tasks = fixture.task_manager();
    let locks = GenerationLockService::new(dal.clone());
    let statuses = GenerationStatusService::new(dal.clone());
    let syncs = SyncStatusService::new(dal.clone());

    // a batch that stopped moving seven hours ago, still holding its lock
    let stuck_lock = locks.acquire_lock(1, "video").await.unwrap();
    let stuck = statuses
        .create_status(1, "video", Some(&stuck_lock))
        .await
        .unwrap();
    dal.generation_status()
        .touch(&stuck.id, ago(Duration::from_secs(7 * 3600)))
        .await
        .unwrap();

    // a lock with no batch at all
    locks.acquire_lock(2, "image").await.unwrap();

    // a task whose worker died
    let orphan = tasks.submit_task(3, json!({})).await.unwrap();
    tasks.claim_next("dead-worker").await.unwrap().unwrap();
    let stale = ago(Duration::from_secs(600));
    dal.task()
        .backdate(&orphan, Some(stale), Some(stale))
        .await
        .unwrap();

    // a sync that never finished
    syncs.start_sync(4).await.unwrap();
    dal.sync_status()
        .touch(4, ago(Duration::from_secs(7 * 3600)))
        .await
        .unwrap();

    let options = RecoveryOptions {
        stuck_status_threshold: Duration::from_secs(6 * 3600),
        orphan_timeout: Duration::from_secs(60),
        max_processing_time: None,
        stuck_sync_threshold: Duration::from_secs(6 * 3600),
    };
    let report = reconcile_on_startup(&dal, &config, &options).await.unwrap();
    assert_eq!(
        report,
        RecoveryReport {
            stuck_statuses: 1,
            orphaned_locks: 2,
            orphaned_tasks: 1,
            expired_tasks: 0,
            stuck_syncs: 1,
        }
    );

    assert_eq!(
        statuses.get_status(&stuck.id).await.unwrap().status,
        GenerationState::Failed
    );
    assert!(locks.list_locks().await.unwrap().is_empty());
    assert_eq!(tasks.get_task(&orphan).await.unwrap().status, TaskStatus::Queued);
    assert!(!syncs.is_active(4).await.unwrap());

    // a second pass finds nothing
    let again = reconcile_on_startup(&dal, &config, &options).await.unwrap();
    assert_eq!(again, RecoveryReport::default());
}

#[tokio::test]
async fn test_reconcile_leaves_healthy_state_alone() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let locks = GenerationLockService::new(dal.clone());
    let statuses = GenerationStatusService::new(dal.clone());
    let tasks = fixture.task_manager();

    let lock_id = locks.acquire_lock(1, "video").await.unwrap();
    statuses
        .create_status(1, "video", Some(&lock_id))
        .await
        .unwrap();
    let running = tasks.submit_task(1, json!({})).await.unwrap();
    tasks.claim_next("live-worker").await.unwrap().unwrap();

    let report = reconcile_on_startup(&dal, &fast_config().build(), &RecoveryOptions::default())
        .await
        .unwrap();
    assert_eq!(report.total(), 0);
    assert!(locks.has_lock(1, "video").await.unwrap());
    assert_eq!(
        tasks.get_task(&running).await.unwrap().status,
        TaskStatus::Processing
    );
}

#[tokio::test]
async fn test_stuck_batch_stops_its_outstanding_units() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let tasks = fixture.task_manager();
    let orchestrator = GenerationOrchestrator::new(dal.clone(), tasks.clone());
    let statuses = GenerationStatusService::new(dal.clone());

    let first = orchestrator
        .start_generation(42, "video", vec![json!({ "clip": 1 }), json!({ "clip": 2 })])
        .await
        .unwrap();
    let claimed = tasks.claim_next("dead-worker").await.unwrap().unwrap();
    let long_ago = ago(Duration::from_secs(7 * 3600));
    dal.task()
        .backdate(&claimed.id, Some(long_ago), Some(long_ago))
        .await
        .unwrap();
    dal.generation_status()
        .touch(&first.status_id, long_ago)
        .await
        .unwrap();

    let options = RecoveryOptions {
        stuck_status_threshold: Duration::from_secs(6 * 3600),
        orphan_timeout: Duration::from_secs(60),
        max_processing_time: None,
        stuck_sync_threshold: Duration::from_secs(6 * 3600),
    };
    let report = reconcile_on_startup(&dal, &fast_config().build(), &options)
        .await
        .unwrap();
    assert_eq!(report.stuck_statuses, 1);
    assert_eq!(report.orphaned_locks, 1);
    assert_eq!(report.orphaned_tasks, 0);

    let batch = statuses.get_status(&first.status_id).await.unwrap();
    assert_eq!(batch.status, GenerationState::Failed);
    assert_eq!(
        (batch.total_queued, batch.total_processing, batch.total_completed, batch.total_failed),
        (0, 0, 0, 2)
    );

    let waiting = first.task_ids.iter().find(|id| **id != claimed.id).unwrap();
    assert_eq!(tasks.get_task(waiting).await.unwrap().status, TaskStatus::Canceled);
    assert_eq!(tasks.get_task(&claimed.id).await.unwrap().status, TaskStatus::Failed);

    // nothing from the failed batch is claimable, and a late result is refused
    assert!(tasks.claim_next("worker-b").await.unwrap().is_none());
    assert!(matches!(
        tasks.complete_task(&claimed.id, "dead-worker", 5).await,
        Err(TaskError::ClaimLost { .. })
    ));

    // a new batch for the pair runs alone
    let second = orchestrator
        .start_generation(42, "video", vec![json!({ "clip": 3 })])
        .await
        .unwrap();
    let next = tasks.claim_next("worker-b").await.unwrap().unwrap();
    assert_eq!(next.id, second.task_ids[0]);
    tasks.complete_task(&next.id, "worker-b", 5).await.unwrap();
    assert!(tasks.claim_next("worker-b").await.unwrap().is_none());

    let batch = statuses.get_status(&first.status_id).await.unwrap();
    assert_eq!(batch.status, GenerationState::Failed);
    assert_eq!((batch.total_completed, batch.total_failed), (0, 2));
}
