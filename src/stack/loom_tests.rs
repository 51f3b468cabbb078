//! Loom model of the split reference count protocol.
//!
//! Run with: `RUSTFLAGS="--cfg loom" cargo test --lib stack::loom_tests --release`
//!
//! Loom cannot drive the 128-bit head of [`CountedStack`](super::CountedStack),
//! so this model replays the same claim/unlink/release steps over a small
//! arena of nodes addressed by index, with the head packed into 64 bits.
//! A "free" only marks the node, which lets the model assert that no thread
//! touches a node after it was freed and that each node is freed once.

use loom::sync::atomic::{fence, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use loom::sync::Arc;
use loom::thread;

const NIL: u32 = u32::MAX;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Counted {
    external: u32,
    index: u32,
}

impl Counted {
    fn pack(self) -> u64 {
        (u64::from(self.external) << 32) | u64::from(self.index)
    }

    fn unpack(raw: u64) -> Self {
        Self {
            external: (raw >> 32) as u32,
            index: raw as u32,
        }
    }
}

struct Node {
    value: usize,
    next: AtomicU64,
    internal: AtomicI64,
    frees: AtomicUsize,
}

struct ModelStack {
    head: AtomicU64,
    nodes: Vec<Node>,
}

impl ModelStack {
    /// Builds a stack holding `values`, the last one on top.
    fn with_values(values: &[usize], spare: usize) -> Self {
        let nodes: Vec<Node> = values
            .iter()
            .copied()
            .chain(core::iter::repeat(0).take(spare))
            .map(|value| Node {
                value,
                next: AtomicU64::new(Counted { external: 0, index: NIL }.pack()),
                internal: AtomicI64::new(0),
                frees: AtomicUsize::new(0),
            })
            .collect();
        let mut head = Counted { external: 0, index: NIL };
        for i in 0..values.len() {
            nodes[i].next.store(head.pack(), Ordering::Relaxed);
            head = Counted {
                external: 1,
                index: i as u32,
            };
        }
        Self {
            head: AtomicU64::new(head.pack()),
            nodes,
        }
    }

    fn node(&self, index: u32) -> &Node {
        let node = &self.nodes[index as usize];
        assert_eq!(node.frees.load(Ordering::Relaxed), 0, "node {index} used after free");
        node
    }

    fn free(&self, index: u32) {
        let prior = self.nodes[index as usize].frees.fetch_add(1, Ordering::Relaxed);
        assert_eq!(prior, 0, "node {index} freed twice");
    }

    fn push(&self, index: u32) {
        let fresh = Counted { external: 1, index };
        let mut expected = self.head.load(Ordering::Relaxed);
        loop {
            self.nodes[index as usize].next.store(expected, Ordering::Relaxed);
            match self
                .head
                .compare_exchange(expected, fresh.pack(), Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => expected = current,
            }
        }
    }

    fn pop(&self) -> Option<usize> {
        let mut old = Counted::unpack(self.head.load(Ordering::Relaxed));
        loop {
            loop {
                let claimed = Counted {
                    external: old.external + 1,
                    index: old.index,
                };
                match self.head.compare_exchange(
                    old.pack(),
                    claimed.pack(),
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        old = claimed;
                        break;
                    }
                    Err(current) => old = Counted::unpack(current),
                }
            }
            if old.index == NIL {
                return None;
            }

            let node = self.node(old.index);
            let next = node.next.load(Ordering::Relaxed);
            match self
                .head
                .compare_exchange(old.pack(), next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => {
                    let value = node.value;
                    let delta = i64::from(old.external) - 2;
                    if node.internal.fetch_add(delta, Ordering::Release) == -delta {
                        fence(Ordering::Acquire);
                        self.free(old.index);
                    }
                    return Some(value);
                }
                Err(current) => {
                    if node.internal.fetch_sub(1, Ordering::Release) == 1 {
                        fence(Ordering::Acquire);
                        self.free(old.index);
                    }
                    old = Counted::unpack(current);
                }
            }
        }
    }
}

#[test]
fn concurrent_pops_free_each_node_once() {
    loom::model(|| {
        let stack = Arc::new(ModelStack::with_values(&[10, 20], 0));

        let s = Arc::clone(&stack);
        let t = thread::spawn(move || s.pop());
        let mine = stack.pop();
        let theirs = t.join().unwrap();

        let mut got = vec![mine.unwrap(), theirs.unwrap()];
        got.sort_unstable();
        assert_eq!(got, vec![10, 20]);
        assert_eq!(stack.pop(), None);
        for node in &stack.nodes {
            assert_eq!(node.frees.load(Ordering::Relaxed), 1);
        }
    });
}

#[test]
fn push_racing_pop_loses_nothing() {
    loom::model(|| {
        // Node 0 holds 1 and is on the stack; node 1 is pushed concurrently.
        let stack = Arc::new(ModelStack::with_values(&[1], 1));

        let s = Arc::clone(&stack);
        let pusher = thread::spawn(move || s.push(1));
        let first = stack.pop();
        pusher.join().unwrap();

        let mut seen = Vec::new();
        seen.extend(first);
        while let Some(v) = stack.pop() {
            seen.push(v);
        }
        seen.sort_unstable();
        // Node 1 carries value 0.
        assert_eq!(seen, vec![0, 1]);
    });
}
