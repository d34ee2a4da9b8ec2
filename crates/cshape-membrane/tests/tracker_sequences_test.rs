use cshape_membrane::{
    Handle, Lifecycle, MembraneConfig, OwnershipError, OwnershipTracker, ResourceClass,
};
use serde_json::json;
use std::sync::Arc;
use std::thread;

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Empty,
    Live,
    Released,
}

const CLASSES: [ResourceClass; 3] = [
    ResourceClass::HeapBlock,
    ResourceClass::FileStream,
    ResourceClass::TempName,
];

#[test]
fn deterministic_sequences_hold_lifecycle_invariants() {
    const SEEDS: [u64; 4] = [1, 2, 3, 4];
    const STEPS: usize = 2_000;
    const SLOTS: usize = 16;

    for seed in SEEDS {
        let tracker = OwnershipTracker::new();
        let mut rng = XorShift64::new(seed);

        let mut handles: [Option<Handle>; SLOTS] = [None; SLOTS];
        let mut states = [SlotState::Empty; SLOTS];
        let mut expected_double_releases = 0_u64;
        let mut expected_uses_after_release = 0_u64;

        for step in 0..STEPS {
            let slot = rng.gen_range(0, SLOTS - 1);
            // Addresses are drawn from a small pool so recycling is frequent.
            let addr = 0x1000 + slot * 0x10;

            match (states[slot], rng.gen_range(0, 2)) {
                (SlotState::Empty | SlotState::Released, 0) => {
                    let class = CLASSES[rng.gen_range(0, CLASSES.len() - 1)];
                    let h = tracker
                        .register(addr, class, Some(slot + 1))
                        .unwrap_or_else(|e| panic!("seed={seed} step={step}: {e}"));
                    if let Some(old) = handles[slot] {
                        assert!(h.id > old.id, "identities must be monotonic");
                    }
                    handles[slot] = Some(h);
                    states[slot] = SlotState::Live;
                }
                (SlotState::Live, 0) => {
                    let h = handles[slot].unwrap();
                    let err = tracker.register(addr, h.class, None).unwrap_err();
                    assert_eq!(err.kind(), "DuplicateRegistration");
                }
                (SlotState::Live, 1) => {
                    let h = handles[slot].unwrap();
                    let record = tracker.release(h).unwrap();
                    assert_eq!(record.state, Lifecycle::Released);
                    states[slot] = SlotState::Released;
                }
                (SlotState::Released, 1) => {
                    let h = handles[slot].unwrap();
                    let err = tracker.release(h).unwrap_err();
                    assert!(matches!(err, OwnershipError::DoubleRelease { .. }));
                    expected_double_releases += 1;
                }
                (SlotState::Live, _) => {
                    let h = handles[slot].unwrap();
                    assert!(tracker.check_live(h).is_ok());
                }
                (SlotState::Released, _) => {
                    let h = handles[slot].unwrap();
                    let err = tracker.check_live(h).unwrap_err();
                    assert!(matches!(err, OwnershipError::UseAfterRelease { .. }));
                    expected_uses_after_release += 1;
                }
                (SlotState::Empty, _) => {}
            }

            let live_expected = states.iter().filter(|s| **s == SlotState::Live).count();
            assert_eq!(tracker.live_count(), live_expected, "seed={seed} step={step}");
        }

        let snap = tracker.metrics().snapshot();
        assert_eq!(snap.double_releases, expected_double_releases);
        assert_eq!(snap.uses_after_release, expected_uses_after_release);
        assert_eq!(snap.unknown_handles, 0);

        let report = tracker.leak_checkpoint();
        let live_expected = states.iter().filter(|s| **s == SlotState::Live).count();
        assert_eq!(report.leaks.len(), live_expected);

        let summary = json!({
            "seed": seed,
            "registrations": snap.registrations,
            "releases": snap.releases,
            "refusals": tracker.metrics().refusals(),
            "leaks": report.leaks.len(),
        });
        assert_eq!(summary["seed"], seed);
    }
}

#[test]
fn release_on_one_thread_is_seen_by_checks_on_another() {
    let tracker = Arc::new(OwnershipTracker::new());
    let handles: Vec<Handle> = (0..64)
        .map(|i| {
            tracker
                .register(0x8000 + i * 8, ResourceClass::HeapBlock, Some(8))
                .unwrap()
        })
        .collect();

    let releaser = {
        let tracker = Arc::clone(&tracker);
        let handles = handles.clone();
        thread::spawn(move || {
            for h in handles {
                tracker.release(h).unwrap();
            }
        })
    };
    releaser.join().unwrap();

    let checkers: Vec<_> = (0..4)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            let handles = handles.clone();
            thread::spawn(move || {
                for h in handles {
                    let err = tracker.check_live(h).unwrap_err();
                    assert_eq!(err.kind(), "UseAfterRelease");
                }
            })
        })
        .collect();
    for c in checkers {
        c.join().unwrap();
    }
    assert_eq!(tracker.live_count(), 0);
    assert_eq!(tracker.metrics().snapshot().uses_after_release, 256);
}

#[test]
fn concurrent_double_release_is_refused_exactly_once() {
    let tracker = Arc::new(OwnershipTracker::new());
    let h = tracker
        .register(0xA000, ResourceClass::FileStream, None)
        .unwrap();

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || tracker.release(h).is_ok())
        })
        .collect();
    let successes = workers
        .into_iter()
        .map(|w| w.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(successes, 1, "exactly one release may win");
    assert_eq!(tracker.metrics().snapshot().double_releases, 7);
}

#[test]
fn concurrent_registrations_mint_distinct_identities() {
    let tracker = Arc::new(OwnershipTracker::with_config(MembraneConfig::default()));
    let workers: Vec<_> = (0..4_usize)
        .map(|t| {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                (0..250_usize)
                    .map(|i| {
                        tracker
                            .register(t * 0x10_0000 + i * 16, ResourceClass::HeapBlock, Some(16))
                            .unwrap()
                            .id
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids: Vec<_> = workers
        .into_iter()
        .flat_map(|w| w.join().unwrap())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 1_000);
    assert_eq!(tracker.live_snapshot().len(), 1_000);
}
