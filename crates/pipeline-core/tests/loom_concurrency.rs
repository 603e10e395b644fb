//! Loom model checks for §8 properties 3 (single terminal transition) and 6 (mutation
//! safety under fire).
//!
//! Grounded in the teacher workspace's `spark-core/tests/loom_concurrency.rs`: `#![cfg(loom)]`
//! at the file level, `loom::{model, sync::Arc, thread}`, plain `#[test]` functions each
//! wrapping one `loom::model(|| { ... })` body. Also grounded in
//! `spark-core/tests/state_machine_properties.rs`'s `loom_scenarios` module, which models a
//! production state machine's concurrency contract with a small loom-native shadow rather
//! than instrumenting the production type itself with `#[cfg(loom)]` swaps — the approach
//! this file follows for property 3, since `Shared<T>`'s real implementation layers a
//! `Condvar`-based blocking wait on top of the terminal `OnceLock` that loom has no direct
//! analog for.
#![cfg(loom)]

use loom::sync::atomic::{AtomicUsize, Ordering};
use loom::sync::{Arc, Mutex};
use loom::{model, thread};

const PENDING: usize = 0;
const SUCCEEDED: usize = 1;
const FAILED: usize = 2;
const CANCELLED: usize = 3;

/// Shadows `Shared::try_complete`'s compare-and-set-once contract: `state` starts `PENDING`
/// and exactly one `try_*` call may move it to a terminal value, mirroring
/// `future::Shared::terminal`'s `OnceLock::set` race.
struct ShadowPromise {
    state: AtomicUsize,
    winner: Mutex<Option<&'static str>>,
}

impl ShadowPromise {
    fn new() -> Self {
        Self {
            state: AtomicUsize::new(PENDING),
            winner: Mutex::new(None),
        }
    }

    fn try_complete(&self, terminal: usize, label: &'static str) -> bool {
        let won = self
            .state
            .compare_exchange(PENDING, terminal, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            *self.winner.lock().unwrap() = Some(label);
        }
        won
    }
}

#[test]
fn exactly_one_terminal_transition_wins_under_concurrent_attempts() {
    model(|| {
        let promise = Arc::new(ShadowPromise::new());

        let success = {
            let promise = Arc::clone(&promise);
            thread::spawn(move || promise.try_complete(SUCCEEDED, "success"))
        };
        let failure = {
            let promise = Arc::clone(&promise);
            thread::spawn(move || promise.try_complete(FAILED, "failure"))
        };
        let cancel = {
            let promise = Arc::clone(&promise);
            thread::spawn(move || promise.try_complete(CANCELLED, "cancel"))
        };

        let results = [
            success.join().unwrap(),
            failure.join().unwrap(),
            cancel.join().unwrap(),
        ];

        let wins = results.iter().filter(|won| **won).count();
        assert_eq!(wins, 1, "exactly one of try_success/try_failure/try_cancel must win");

        let final_state = promise.state.load(Ordering::Acquire);
        assert_ne!(final_state, PENDING);
    });
}

/// Shadows the pipeline's `mutation_lock`-guarded RCU swap: every mutation acquires the lock,
/// reads the current length, and stores a strictly larger one — modeling `splice`/`remove`'s
/// "read current snapshot, build the next one, store it" sequence from `pipeline.rs`.
/// Property 6 ("mutation safety under fire") requires that concurrent structural mutation
/// never loses or duplicates an update; this checks that invariant holds under every
/// interleaving loom can produce for two concurrent mutators.
struct ShadowChain {
    lock: Mutex<()>,
    names: Mutex<Vec<u32>>,
}

impl ShadowChain {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            names: Mutex::new(Vec::new()),
        }
    }

    fn insert_last(&self, id: u32) {
        let _guard = self.lock.lock().unwrap();
        let mut names = self.names.lock().unwrap();
        names.push(id);
    }
}

#[test]
fn concurrent_splices_never_lose_or_duplicate_an_insertion() {
    model(|| {
        let chain = Arc::new(ShadowChain::new());

        let a = {
            let chain = Arc::clone(&chain);
            thread::spawn(move || chain.insert_last(1))
        };
        let b = {
            let chain = Arc::clone(&chain);
            thread::spawn(move || chain.insert_last(2))
        };

        a.join().unwrap();
        b.join().unwrap();

        let names = chain.names.lock().unwrap();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(*sorted, vec![1, 2], "both insertions must survive exactly once");
    });
}
