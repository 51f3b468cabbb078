use proptest::prelude::*;
use std::collections::VecDeque;
use std::time::Duration;
use tandem::queue::spsc;
use tandem::{ConcurrentQueue, ConcurrentStack, CountedStack, HazardStack, LockedQueue, MpmcQueue};

#[derive(Debug, Clone)]
enum Operation {
    Push(u16),
    Pop,
    IsEmpty,
}

fn operations() -> impl Strategy<Value = Vec<Operation>> {
    proptest::collection::vec(
        prop_oneof![
            3 => any::<u16>().prop_map(Operation::Push),
            2 => Just(Operation::Pop),
            1 => Just(Operation::IsEmpty),
        ],
        1..200,
    )
}

fn matches_vec<S: ConcurrentStack<u16>>(stack: &S, ops: &[Operation]) {
    let mut model = Vec::new();
    for op in ops {
        match op {
            Operation::Push(v) => {
                stack.push(*v);
                model.push(*v);
            }
            Operation::Pop => assert_eq!(stack.pop(), model.pop(), "pop mismatch"),
            Operation::IsEmpty => assert_eq!(stack.is_empty(), model.is_empty()),
        }
    }
    while let Some(expected) = model.pop() {
        assert_eq!(stack.pop(), Some(expected), "final drain mismatch");
    }
    assert_eq!(stack.pop(), None);
}

fn matches_vec_deque<Q: ConcurrentQueue<u16>>(queue: &Q, ops: &[Operation]) {
    let mut model = VecDeque::new();
    for op in ops {
        match op {
            Operation::Push(v) => {
                queue.push(*v);
                model.push_back(*v);
            }
            Operation::Pop => assert_eq!(queue.pop(), model.pop_front(), "pop mismatch"),
            Operation::IsEmpty => assert_eq!(queue.is_empty(), model.is_empty()),
        }
    }
    while let Some(expected) = model.pop_front() {
        assert_eq!(queue.pop(), Some(expected), "final drain mismatch");
    }
    assert_eq!(queue.pop(), None);
}

proptest! {
    #[test]
    fn hazard_stack_matches_vec(ops in operations()) {
        matches_vec(&HazardStack::with_default_registry(), &ops);
    }

    #[test]
    fn counted_stack_matches_vec(ops in operations()) {
        matches_vec(&CountedStack::new(), &ops);
    }

    #[test]
    fn mpmc_queue_matches_vec_deque(ops in operations()) {
        matches_vec_deque(&MpmcQueue::new(), &ops);
    }

    #[test]
    fn locked_queue_matches_vec_deque(ops in operations()) {
        matches_vec_deque(&LockedQueue::new(), &ops);
    }

    #[test]
    fn spsc_queue_matches_vec_deque(ops in operations()) {
        let (mut tx, mut rx) = spsc::queue();
        let mut model = VecDeque::new();
        for op in &ops {
            match op {
                Operation::Push(v) => {
                    tx.push(*v);
                    model.push_back(*v);
                }
                Operation::Pop => prop_assert_eq!(rx.pop(), model.pop_front()),
                Operation::IsEmpty => prop_assert_eq!(rx.is_empty(), model.is_empty()),
            }
        }
    }

    #[test]
    fn locked_queue_timeout_pop_sees_pushed_values(values in proptest::collection::vec(any::<u8>(), 0..20)) {
        let queue = LockedQueue::new();
        for v in &values {
            queue.push(*v);
        }
        for v in &values {
            prop_assert_eq!(queue.wait_and_pop_timeout(Duration::ZERO), Some(*v));
        }
        prop_assert_eq!(queue.wait_and_pop_timeout(Duration::from_millis(1)), None);
    }
}
