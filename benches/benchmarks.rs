//! Performance benchmarks for Devflow.
//!
//! This module contains benchmarks for:
//! - Commit message synthesis over change sets of varying size
//! - Release type inference from commit messages
//! - History pagination and bucketing on in-memory histories
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use devflow::storage::{bucket_history, DateRange, Frequency, HistoryEntry, HistoryQuery, ProjectSummary};
use devflow::workflow::{infer_release_type, is_test_path, parse_porcelain, synthesize_commit_message};

// ============================================================================
// Mock Data Fixtures
// ============================================================================

mod fixtures {
    use super::*;

    /// Generate a realistic set of changed paths.
    pub fn generate_paths(count: usize) -> Vec<String> {
        let dirs = ["src", "src/auth", "src/api", "tests", "docs", "lib", "__tests__", "spec"];
        let names = ["login", "session", "router", "user", "cache", "config"];
        let exts = ["rs", "ts", "js", "md", "py"];

        (0..count)
            .map(|i| {
                let dir = dirs[i % dirs.len()];
                let name = names[i % names.len()];
                let ext = exts[i % exts.len()];
                if i % 4 == 0 {
                    format!("{dir}/{name}.test.{ext}")
                } else {
                    format!("{dir}/{name}_{i}.{ext}")
                }
            })
            .collect()
    }

    /// `git status --porcelain` output for the given paths.
    pub fn porcelain(paths: &[String]) -> String {
        paths
            .iter()
            .enumerate()
            .map(|(i, p)| if i % 3 == 0 { format!("?? {p}\n") } else { format!(" M {p}\n") })
            .collect()
    }

    /// Commit messages covering every inference branch.
    pub fn commit_messages() -> Vec<(&'static str, &'static str)> {
        vec![
            ("feature", "feat(auth): add login form"),
            ("fix", "fix: handle empty session cookie"),
            ("breaking_header", "feat(api)!: drop v1 endpoints"),
            (
                "breaking_footer",
                "refactor: rename config keys\n\nLong body explaining the change.\n\nBREAKING CHANGE: keys renamed",
            ),
            ("chore", "chore: bump dependencies"),
        ]
    }

    /// A history spread over two years.
    pub fn generate_history(count: usize) -> Vec<HistoryEntry> {
        let types = ["feature", "bugfix", "refactor", "docs"];
        (0..count)
            .map(|i| {
                let mut entry = HistoryEntry::new(
                    format!("Task {i}"),
                    types[i % types.len()],
                    format!("feat: task {i}"),
                );
                entry.timestamp = format!(
                    "{}-{:02}-{:02}T{:02}:00:00.000Z",
                    2023 + (i % 2),
                    1 + (i % 12),
                    1 + (i % 28),
                    i % 24
                );
                if i % 10 == 0 {
                    entry = entry.dropped(None);
                }
                entry
            })
            .collect()
    }
}

// ============================================================================
// Heuristics Benchmarks
// ============================================================================

fn bench_commit_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_message");

    for count in [1, 3, 10, 100, 1000].iter() {
        let paths = fixtures::generate_paths(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("synthesize", count), &paths, |b, paths| {
            b.iter(|| black_box(synthesize_commit_message(black_box(paths))));
        });
    }

    group.finish();
}

fn bench_test_path_detection(c: &mut Criterion) {
    let paths = fixtures::generate_paths(1000);

    c.bench_function("is_test_path_1000", |b| {
        b.iter(|| paths.iter().filter(|p| is_test_path(black_box(p))).count());
    });
}

fn bench_release_inference(c: &mut Criterion) {
    let mut group = c.benchmark_group("release_inference");

    for (name, message) in fixtures::commit_messages() {
        group.bench_with_input(BenchmarkId::new("infer", name), &message, |b, &message| {
            b.iter(|| black_box(infer_release_type(black_box(message))));
        });
    }

    group.finish();
}

fn bench_porcelain_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("porcelain");

    for count in [10, 100, 1000].iter() {
        let output = fixtures::porcelain(&fixtures::generate_paths(*count));
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("parse", count), &output, |b, output| {
            b.iter(|| black_box(parse_porcelain(black_box(output))));
        });
    }

    group.finish();
}

// ============================================================================
// History Benchmarks
// ============================================================================

fn bench_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("history");

    for count in [100, 1000, 10000].iter() {
        let history = fixtures::generate_history(*count);
        group.throughput(Throughput::Elements(*count as u64));

        group.bench_with_input(BenchmarkId::new("page", count), &history, |b, history| {
            let query = HistoryQuery::new(3, 20);
            b.iter(|| black_box(query.apply(black_box(history))));
        });

        group.bench_with_input(BenchmarkId::new("monthly_buckets", count), &history, |b, history| {
            let range = DateRange::default();
            b.iter(|| black_box(bucket_history(black_box(history), &range, Frequency::Monthly)));
        });

        group.bench_with_input(BenchmarkId::new("summary", count), &history, |b, history| {
            b.iter(|| black_box(ProjectSummary::from_history(black_box(history))));
        });
    }

    group.finish();
}

criterion_group!(
    heuristics_benches,
    bench_commit_message,
    bench_test_path_detection,
    bench_release_inference,
    bench_porcelain_parsing,
);

criterion_group!(history_benches, bench_history,);

criterion_main!(heuristics_benches, history_benches,);
