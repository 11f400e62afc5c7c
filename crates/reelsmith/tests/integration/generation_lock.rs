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

use reelsmith::generation::{GenerationLockService, GenerationStatusService};
use reelsmith::LockError;
use std::sync::Arc;
use tokio::sync::Barrier;

use crate::fixtures::TestFixture;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_has_single_winner() {
    let fixture = TestFixture::new().await;
    let locks = GenerationLockService::new(fixture.dal());
    let barrier = Arc::new(Barrier::new(2));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let locks = locks.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            locks.acquire_lock(42, "video").await
        }));
    }

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let acquired = results.iter().filter(|r| r.is_ok()).count();
    let held = results
        .iter()
        .filter(|r| matches!(r, Err(LockError::LockHeld { account_id: 42, .. })))
        .count();
    assert_eq!(acquired, 1);
    assert_eq!(held, 1);
    assert_eq!(locks.list_locks().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_lock_reacquirable_after_release() {
    let fixture = TestFixture::new().await;
    let locks = GenerationLockService::new(fixture.dal());

    let first = locks.acquire_lock(7, "image").await.unwrap();
    assert!(locks.has_lock(7, "image").await.unwrap());
    assert!(locks.acquire_lock(7, "image").await.is_err());

    locks.release_lock(&first).await.unwrap();
    assert!(!locks.has_lock(7, "image").await.unwrap());

    let second = locks.acquire_lock(7, "image").await.unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_pairs_are_independent() {
    let fixture = TestFixture::new().await;
    let locks = GenerationLockService::new(fixture.dal());

    locks.acquire_lock(1, "video").await.unwrap();
    locks.acquire_lock(1, "image").await.unwrap();
    locks.acquire_lock(2, "video").await.unwrap();

    assert_eq!(locks.list_locks().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_release_unknown_lock_is_noop() {
    let fixture = TestFixture::new().await;
    let locks = GenerationLockService::new(fixture.dal());

    locks.release_lock("does-not-exist").await.unwrap();
}

#[tokio::test]
async fn test_reconcile_removes_only_orphaned_locks() {
    let fixture = TestFixture::new().await;
    let locks = GenerationLockService::new(fixture.dal());
    let statuses = GenerationStatusService::new(fixture.dal());

    // no batch behind this one
    locks.acquire_lock(1, "video").await.unwrap();

    let guarded = locks.acquire_lock(2, "video").await.unwrap();
    statuses
        .create_status(2, "video", Some(&guarded))
        .await
        .unwrap();

    let removed = locks.reconcile_locks_on_startup().await.unwrap();
    assert_eq!(removed, 1);
    assert!(!locks.has_lock(1, "video").await.unwrap());
    assert!(locks.has_lock(2, "video").await.unwrap());

    // second pass has nothing left to do
    assert_eq!(locks.reconcile_locks_on_startup().await.unwrap(), 0);
}
