use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::{Arc, Mutex};
use std::thread;
use tandem::{ConcurrentStack, CountedStack, HazardRegistry, HazardStack};

const THREADS: usize = 4;
const OPS: usize = 1_000;

/// Each thread alternates push and pop on the shared stack.
fn churn<S: ConcurrentStack<usize>>(stack: &S) {
    thread::scope(|s| {
        for t in 0..THREADS {
            s.spawn(move || {
                for i in 0..OPS {
                    stack.push(t * OPS + i);
                    black_box(stack.pop());
                }
            });
        }
    });
}

struct MutexStack(Mutex<Vec<usize>>);

impl ConcurrentStack<usize> for MutexStack {
    fn push(&self, value: usize) {
        self.0.lock().unwrap().push(value);
    }

    fn pop(&self) -> Option<usize> {
        self.0.lock().unwrap().pop()
    }

    fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_empty()
    }
}

fn bench_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("stack_single_thread");

    group.bench_function("hazard", |b| {
        let stack = HazardStack::with_default_registry();
        b.iter(|| {
            stack.push(black_box(1_usize));
            black_box(stack.pop());
        });
    });

    group.bench_function("counted", |b| {
        let stack = CountedStack::new();
        b.iter(|| {
            stack.push(black_box(1_usize));
            black_box(stack.pop());
        });
    });

    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("stack_contended");

    group.bench_function("std_mutex_vec", |b| {
        let stack = MutexStack(Mutex::new(Vec::new()));
        b.iter(|| churn(&stack));
    });

    group.bench_function("hazard", |b| {
        let stack = HazardStack::new(Arc::new(HazardRegistry::new(THREADS * 4)));
        b.iter(|| churn(&stack));
    });

    group.bench_function("counted", |b| {
        let stack = CountedStack::new();
        b.iter(|| churn(&stack));
    });

    group.finish();
}

criterion_group!(benches, bench_single_thread, bench_contended);
criterion_main!(benches);
