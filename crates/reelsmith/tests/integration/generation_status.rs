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

use reelsmith::dal::generation_status::CounterTransition;
use reelsmith::generation::{GenerationStatusService, GenerationTracker};
use reelsmith::{GenerationState, StatusError, TaskStatus};
use serde_json::json;
use std::time::Duration;

use crate::fixtures::{ago, TestFixture};

#[tokio::test]
async fn test_counter_lifecycle_conserves_units() {
    let fixture = TestFixture::new().await;
    let statuses = GenerationStatusService::new(fixture.dal());

    let status = statuses.create_status(42, "video", None).await.unwrap();
    assert_eq!(status.status, GenerationState::Queuing);
    assert_eq!(status.total_units(), 0);

    for _ in 0..3 {
        statuses.increment_queued(&status.id).await.unwrap();
    }
    statuses.increment_processing(&status.id).await.unwrap();
    statuses.increment_processing(&status.id).await.unwrap();
    statuses.increment_completed(&status.id).await.unwrap();
    statuses.increment_failed(&status.id).await.unwrap();

    let current = statuses.get_status(&status.id).await.unwrap();
    assert_eq!(current.status, GenerationState::Processing);
    assert_eq!(current.total_queued, 1);
    assert_eq!(current.total_processing, 0);
    assert_eq!(current.total_completed, 1);
    assert_eq!(current.total_failed, 1);
    assert_eq!(current.total_units(), 3);
}

#[tokio::test]
async fn test_decrements_never_go_negative() {
    let fixture = TestFixture::new().await;
    let statuses = GenerationStatusService::new(fixture.dal());

    let status = statuses.create_status(42, "video", None).await.unwrap();
    statuses.increment_processing(&status.id).await.unwrap();
    statuses.increment_completed(&status.id).await.unwrap();
    statuses.increment_completed(&status.id).await.unwrap();

    // the duplicate callback finds nothing left to decrement
    let current = statuses.get_status(&status.id).await.unwrap();
    assert_eq!(current.total_queued, 0);
    assert_eq!(current.total_processing, 0);
    assert_eq!(current.total_completed, 2);
    assert_eq!(current.total_failed, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_transitions_conserve_units() {
    const UNITS: i32 = 24;

    let fixture = TestFixture::new().await;
    let statuses = GenerationStatusService::new(fixture.dal());
    let status = statuses.create_status(42, "video", None).await.unwrap();

    let handles: Vec<_> = (0..UNITS)
        .map(|unit| {
            let statuses = statuses.clone();
            let status_id = status.id.clone();
            tokio::spawn(async move {
                statuses.increment_queued(&status_id).await.unwrap();
                tokio::task::yield_now().await;
                statuses.increment_processing(&status_id).await.unwrap();
                if unit % 3 == 0 {
                    statuses.increment_failed(&status_id).await.unwrap();
                } else {
                    statuses.increment_completed(&status_id).await.unwrap();
                }

                let snapshot = statuses.get_status(&status_id).await.unwrap();
                assert!(snapshot.total_queued >= 0);
                assert!(snapshot.total_processing >= 0);
                assert!(snapshot.total_completed + snapshot.total_failed <= UNITS);
            })
        })
        .collect();
    for handle in futures::future::join_all(handles).await {
        handle.unwrap();
    }

    let current = statuses.get_status(&status.id).await.unwrap();
    assert_eq!(current.total_queued, 0);
    assert_eq!(current.total_processing, 0);
    assert_eq!(current.total_failed, 8);
    assert_eq!(current.total_completed, 16);
    assert_eq!(current.total_units(), UNITS);
}

#[tokio::test]
async fn test_mark_failed_stops_outstanding_units() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let statuses = GenerationStatusService::new(dal.clone());
    let tasks = fixture.task_manager();

    let status = statuses.create_status(42, "video", None).await.unwrap();
    let ids = tasks
        .submit_batch(42, &status.id, vec![json!({ "n": 1 }), json!({ "n": 2 })])
        .await
        .unwrap();
    let running = tasks.claim_next("worker-a").await.unwrap().unwrap();

    statuses.mark_failed(&status.id).await.unwrap();

    let current = statuses.get_status(&status.id).await.unwrap();
    assert_eq!(current.status, GenerationState::Failed);
    assert_eq!(
        (current.total_queued, current.total_processing, current.total_failed),
        (0, 0, 2)
    );
    let waiting = ids.iter().find(|id| **id != running.id).unwrap();
    assert_eq!(tasks.get_task(waiting).await.unwrap().status, TaskStatus::Canceled);
    assert_eq!(tasks.get_task(&running.id).await.unwrap().status, TaskStatus::Failed);
    assert!(tasks.claim_next("worker-b").await.unwrap().is_none());
}

#[tokio::test]
async fn test_requeue_transition_moves_unit_back() {
    let fixture = TestFixture::new().await;
    let statuses = GenerationStatusService::new(fixture.dal());

    let status = statuses.create_status(1, "video", None).await.unwrap();
    statuses.increment_queued(&status.id).await.unwrap();
    statuses.increment_processing(&status.id).await.unwrap();
    statuses
        .apply(&status.id, CounterTransition::Requeued)
        .await
        .unwrap();

    let current = statuses.get_status(&status.id).await.unwrap();
    assert_eq!(current.total_queued, 1);
    assert_eq!(current.total_processing, 0);
}

#[tokio::test]
async fn test_unknown_status_is_not_found() {
    let fixture = TestFixture::new().await;
    let statuses = GenerationStatusService::new(fixture.dal());

    assert!(matches!(
        statuses.get_status("missing").await,
        Err(StatusError::NotFound(_))
    ));
    assert!(matches!(
        statuses.increment_queued("missing").await,
        Err(StatusError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_mark_completed_sets_completed_at() {
    let fixture = TestFixture::new().await;
    let statuses = GenerationStatusService::new(fixture.dal());

    let status = statuses.create_status(1, "video", None).await.unwrap();
    statuses.mark_completed(&status.id).await.unwrap();

    let current = statuses.get_status(&status.id).await.unwrap();
    assert_eq!(current.status, GenerationState::Completed);
    assert!(current.completed_at.is_some());
}

#[tokio::test]
async fn test_reconcile_stuck_statuses() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let statuses = GenerationStatusService::new(dal.clone());

    let stuck = statuses.create_status(1, "video", None).await.unwrap();
    statuses.increment_queued(&stuck.id).await.unwrap();
    statuses.increment_processing(&stuck.id).await.unwrap();
    dal.generation_status()
        .touch(&stuck.id, ago(Duration::from_secs(7 * 3600)))
        .await
        .unwrap();

    let fresh = statuses.create_status(2, "video", None).await.unwrap();

    let fixed = statuses
        .reconcile_stuck_statuses(Duration::from_secs(6 * 3600))
        .await
        .unwrap();
    assert_eq!(fixed, 1);

    let stuck = statuses.get_status(&stuck.id).await.unwrap();
    assert_eq!(stuck.status, GenerationState::Failed);
    assert!(stuck.completed_at.is_some());
    assert!(statuses.get_status(&fresh.id).await.unwrap().status.is_active());

    // idempotent
    assert_eq!(
        statuses
            .reconcile_stuck_statuses(Duration::from_secs(6 * 3600))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_settle_requires_drained_batch() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let statuses = GenerationStatusService::new(dal.clone());
    let tracker = GenerationTracker::new(dal.clone());

    let status = statuses.create_status(1, "video", None).await.unwrap();
    statuses.increment_queued(&status.id).await.unwrap();
    assert!(tracker.settle(&status.id).await.unwrap().is_none());

    statuses.increment_processing(&status.id).await.unwrap();
    statuses.increment_failed(&status.id).await.unwrap();

    let settled = tracker.settle(&status.id).await.unwrap().unwrap();
    assert_eq!(settled.status, GenerationState::Failed);

    // only the first caller wins
    assert!(tracker.settle(&status.id).await.unwrap().is_none());
}
