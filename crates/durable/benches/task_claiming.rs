//! Task instance lifecycle benchmark.
//!
//! There is no worker-side claim step in this design — dispatch is push-based
//! and the claiming SDK itself is out of scope (§1) — so the equivalent hot
//! path to a claim-queue benchmark is `start_transaction` → `apply`
//! (Scheduled → Completed) → workflow advancement, plus the
//! `reload_task_instance` retry path (§4.5).

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;
use uuid::Uuid;

use weave_durable::engine::state::{apply, start_transaction, TaskStatusUpdate};
use weave_durable::model::{
    FailureStrategy, TaskChildren, TaskInstance, TaskInstanceType, TaskNode, TaskStatus, WorkflowDefinition,
};
use weave_durable::store::{EventStore, InMemoryEventStore};

fn single_task_def(name: &str) -> WorkflowDefinition {
    WorkflowDefinition {
        name: name.to_string(),
        rev: "1".into(),
        tasks: vec![TaskNode::Task {
            task_reference_name: "t1".into(),
            name: "t1".into(),
        }],
        failure_strategy: FailureStrategy::Failed,
        retry: None,
        recovery_workflow: None,
        output_parameters: None,
    }
}

async fn schedule_and_complete(store: &InMemoryEventStore, tx_id: &str) {
    start_transaction(store, tx_id, single_task_def("bench"), serde_json::json!({}))
        .await
        .unwrap();
    let tx = store.get_transaction(tx_id).await.unwrap();
    let task = store
        .get_all_task_instances(tx.active_workflow_id)
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.status == TaskStatus::Scheduled)
        .unwrap();
    apply(
        store,
        TaskStatusUpdate {
            transaction_id: tx_id.to_string(),
            task_id: task.task_id,
            status: TaskStatus::Completed,
            output: Some(serde_json::json!({"ok": true})),
            logs: None,
            is_system: false,
        },
    )
    .await
    .unwrap();
}

/// Schedule → complete a single-task transaction end to end, sequentially.
fn bench_lifecycle_single(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("task_lifecycle/single");
    group.throughput(Throughput::Elements(1));

    group.bench_function("schedule_complete", |b| {
        b.to_async(&rt).iter_custom(|iters| async move {
            let store = InMemoryEventStore::new();
            let start = Instant::now();
            for i in 0..iters {
                schedule_and_complete(&store, &format!("tx-{i}")).await;
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Concurrent transactions driven through `apply` by independent tokio
/// tasks, mirroring the partition-per-transaction concurrency model (§5):
/// no lock contention across transactions, only within the in-memory
/// store's internal locking.
fn bench_lifecycle_concurrent(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("task_lifecycle/concurrent");
    group.sample_size(20);

    for workers in [2u64, 4, 8] {
        let tx_count = 2000u64;
        group.throughput(Throughput::Elements(tx_count));
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, &workers| {
            b.to_async(&rt).iter(|| async move {
                let store = Arc::new(InMemoryEventStore::new());
                let per_worker = tx_count / workers;

                let mut handles = Vec::new();
                for worker_id in 0..workers {
                    let store = store.clone();
                    handles.push(tokio::spawn(async move {
                        for i in 0..per_worker {
                            schedule_and_complete(&store, &format!("tx-{worker_id}-{i}")).await;
                        }
                    }));
                }
                for handle in handles {
                    handle.await.unwrap();
                }
            });
        });
    }

    group.finish();
}

/// `reload_task_instance` throughput: the retry path's single-slot replace
/// (§4.5), exercised directly against the store rather than through `apply`.
fn bench_reload(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("task_lifecycle/reload");
    group.throughput(Throughput::Elements(1));

    group.bench_function("reload_same_slot", |b| {
        b.to_async(&rt).iter_custom(|iters| async move {
            let store = InMemoryEventStore::new();
            let workflow_id = Uuid::now_v7();

            store
                .create_task_instance(TaskInstance {
                    task_id: Uuid::now_v7(),
                    workflow_id,
                    transaction_id: "tx-1".into(),
                    r#type: TaskInstanceType::Task,
                    task_reference_name: "t1".into(),
                    status: TaskStatus::Scheduled,
                    input: serde_json::json!({}),
                    output: None,
                    retries: 0,
                    is_retried: false,
                    retry_delay: Duration::ZERO,
                    start_time: chrono::Utc::now(),
                    end_time: None,
                    logs: None,
                    children: TaskChildren::None,
                })
                .await
                .unwrap();

            let start = Instant::now();
            for attempt in 1..=iters {
                store
                    .reload_task_instance(TaskInstance {
                        task_id: Uuid::now_v7(),
                        workflow_id,
                        transaction_id: "tx-1".into(),
                        r#type: TaskInstanceType::Task,
                        task_reference_name: "t1".into(),
                        status: TaskStatus::Scheduled,
                        input: serde_json::json!({}),
                        output: None,
                        retries: attempt as u32,
                        is_retried: true,
                        retry_delay: Duration::ZERO,
                        start_time: chrono::Utc::now(),
                        end_time: None,
                        logs: None,
                        children: TaskChildren::None,
                    })
                    .await
                    .unwrap();
            }
            start.elapsed()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_lifecycle_single, bench_lifecycle_concurrent, bench_reload);
criterion_main!(benches);
