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

diesel::table! {
    tasks (id) {
        id -> Text,
        account_id -> BigInt,
        generation_status_id -> Nullable<Text>,
        payload -> Text,
        status -> Text,
        worker_id -> Nullable<Text>,
        retry_count -> Integer,
        error_message -> Nullable<Text>,
        processing_time_ms -> BigInt,
        queue_time_ms -> BigInt,
        queued_at -> Nullable<Timestamp>,
        started_at -> Nullable<Timestamp>,
        completed_at -> Nullable<Timestamp>,
        failed_at -> Nullable<Timestamp>,
        canceled_at -> Nullable<Timestamp>,
        last_heartbeat_at -> Nullable<Timestamp>,
        retry_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    generation_locks (lock_id) {
        lock_id -> Text,
        account_id -> BigInt,
        content_type -> Text,
        locked_at -> Timestamp,
    }
}

diesel::table! {
    generation_statuses (id) {
        id -> Text,
        account_id -> BigInt,
        content_type -> Text,
        lock_id -> Nullable<Text>,
        status -> Text,
        total_queued -> Integer,
        total_processing -> Integer,
        total_completed -> Integer,
        total_failed -> Integer,
        started_at -> Timestamp,
        completed_at -> Nullable<Timestamp>,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    sync_statuses (account_id) {
        account_id -> BigInt,
        is_active -> Bool,
        total_processed -> Integer,
        total_synced -> Integer,
        total_failed -> Integer,
        status -> Text,
        started_at -> Nullable<Timestamp>,
        completed_at -> Nullable<Timestamp>,
        error_message -> Nullable<Text>,
        updated_at -> Timestamp,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    tasks,
    generation_locks,
    generation_statuses,
    sync_statuses,
);
