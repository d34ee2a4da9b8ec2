#![no_main]
use std::collections::HashMap;

use cshape_membrane::{Handle, OwnershipTracker, ResourceClass};
use libfuzzer_sys::fuzz_target;

const CLASSES: [ResourceClass; 3] = [
    ResourceClass::HeapBlock,
    ResourceClass::FileStream,
    ResourceClass::TempName,
];

fuzz_target!(|data: &[u8]| {
    let tracker = OwnershipTracker::new();
    let mut issued: Vec<Handle> = Vec::new();
    // addr -> handle currently owning it
    let mut model: HashMap<usize, Handle> = HashMap::new();

    for chunk in data.chunks_exact(3) {
        let op = chunk[0] % 4;
        let slot = usize::from(chunk[1] % 32);
        let addr = 0x1000 + slot * 8;
        match op {
            0 => {
                let class = CLASSES[usize::from(chunk[2]) % CLASSES.len()];
                match tracker.register(addr, class, Some(usize::from(chunk[2]))) {
                    Ok(h) => {
                        assert!(!model.contains_key(&addr));
                        assert!(issued.iter().all(|old| old.id != h.id));
                        model.insert(addr, h);
                        issued.push(h);
                    }
                    Err(err) => {
                        assert_eq!(err.kind(), "DuplicateRegistration");
                        assert!(model.contains_key(&addr));
                    }
                }
            }
            1 | 2 => {
                let Some(&h) = issued.get(usize::from(chunk[2]) % issued.len().max(1)) else {
                    continue;
                };
                let live = model.get(&h.addr).is_some_and(|owner| owner.id == h.id);
                let result = if op == 1 {
                    tracker.release(h).map(|_| ())
                } else {
                    tracker.check_live(h).map(|_| ())
                };
                match (live, result) {
                    (true, Ok(())) => {
                        if op == 1 {
                            model.remove(&h.addr);
                        }
                    }
                    (false, Err(err)) => {
                        let expected = if op == 1 { "DoubleRelease" } else { "UseAfterRelease" };
                        assert_eq!(err.kind(), expected);
                    }
                    (live, result) => panic!("live={live} but tracker said {result:?}"),
                }
            }
            _ => {
                let report = tracker.leak_checkpoint();
                assert_eq!(report.leaks.len(), model.len());
            }
        }
        assert_eq!(tracker.live_count(), model.len());
    }
});
