//! Benchmark for snapshot reconciliation and poll coalescing
//!
//! Target: a 1000-volume group reconciled in well under one poll interval

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use lvm_vg_manager::domain::ports::PassthroughNames;
use lvm_vg_manager::inventory::FieldMap;
use lvm_vg_manager::reconcile::ProgressTracker;
use lvm_vg_manager::{
    DirectoryConfig, InventorySnapshot, JobTable, ObjectRegistry, PollScheduler,
    SnapshotReconciler, SysfsBlockDirectory, VolumeGroup,
};
use serde_json::json;
use std::sync::Arc;

const VOLUMES: usize = 1000;

fn snapshot(volumes: usize, size: u64) -> InventorySnapshot {
    let mut group = FieldMap::new();
    group.insert("name".into(), json!("vg0"));
    group.insert("size".into(), json!(1u64 << 40));

    let lvs = (0..volumes)
        .map(|i| {
            let mut record = FieldMap::new();
            record.insert("name".into(), json!(format!("lv{:04}", i)));
            record.insert("size".into(), json!(size));
            record.insert("uuid".into(), json!(format!("uuid-{:04}", i)));
            record
        })
        .collect();

    InventorySnapshot::new(group, lvs, vec![])
}

fn reconciler() -> SnapshotReconciler {
    let blocks = Arc::new(SysfsBlockDirectory::new(DirectoryConfig::default()));
    let jobs = JobTable::new();
    SnapshotReconciler::new(
        ObjectRegistry::new(),
        blocks.clone(),
        Arc::new(PassthroughNames),
        ProgressTracker::new(jobs, blocks),
    )
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");
    group.throughput(Throughput::Elements(VOLUMES as u64));

    group.bench_function("initial_publish_1000", |b| {
        let reconciler = reconciler();
        let snap = snapshot(VOLUMES, 1 << 30);
        b.iter_batched(
            || VolumeGroup::new("vg0", "/org/freedesktop/UDisks2/lvm"),
            |mut vg| {
                let report = reconciler.reconcile(&mut vg, black_box(&snap));
                black_box(report.created);
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("steady_state_1000", |b| {
        let reconciler = reconciler();
        let snap = snapshot(VOLUMES, 1 << 30);
        let mut vg = VolumeGroup::new("vg0", "/org/freedesktop/UDisks2/lvm");
        reconciler.reconcile(&mut vg, &snap);

        b.iter(|| {
            let report = reconciler.reconcile(&mut vg, black_box(&snap));
            black_box(report.updated);
        });
    });

    group.bench_function("alternating_sizes_1000", |b| {
        let reconciler = reconciler();
        let snaps = [snapshot(VOLUMES, 1 << 30), snapshot(VOLUMES, 2 << 30)];
        let mut vg = VolumeGroup::new("vg0", "/org/freedesktop/UDisks2/lvm");
        let mut counter = 0usize;

        b.iter(|| {
            counter += 1;
            let report = reconciler.reconcile(&mut vg, black_box(&snaps[counter % 2]));
            black_box(report.updated);
        });
    });

    group.finish();
}

fn bench_poll_requests(c: &mut Criterion) {
    let mut group = c.benchmark_group("poll_scheduler");
    group.throughput(Throughput::Elements(1));

    group.bench_function("coalesced_request", |b| {
        let mut scheduler = PollScheduler::default();
        let _ = scheduler.request_poll();

        b.iter(|| {
            black_box(scheduler.request_poll());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_reconcile, bench_poll_requests);
criterion_main!(benches);
