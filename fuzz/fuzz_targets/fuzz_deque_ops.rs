#![no_main]

use libfuzzer_sys::fuzz_target;

use std::collections::VecDeque;

use pilfer::deque::Worker;

// Interprets a byte stream as an operation sequence against the
// work-stealing deque, checking every result against a `VecDeque`
// ground-truth model. Single-threaded, so the owner end must behave as an
// exact LIFO stack and the thief end as an exact FIFO queue, across any
// interleaving of operations and ring growths.
//
// Byte layout:
// - Byte 0 → initial capacity `2^(b % 8)` (1..=128; small capacities force
//   frequent growth)
// - Remaining bytes as opcodes:
//   - 0 → `push` (value = running counter)
//   - 1 → `pop`, compare against the model's back
//   - 2 → `steal`, compare against the model's front
//   - 3 → `len` / `is_empty`, compare against the model
fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let capacity = 1usize << (data[0] % 8);
    let worker = Worker::new(capacity);
    let stealer = worker.stealer();
    let mut model: VecDeque<u64> = VecDeque::new();
    let mut next = 0u64;

    for &op in &data[1..] {
        match op % 4 {
            // push
            0 => {
                worker.push(next);
                model.push_back(next);
                next += 1;
            }
            // pop
            1 => {
                assert_eq!(worker.pop(), model.pop_back(), "pop mismatch");
            }
            // steal
            2 => {
                assert_eq!(stealer.steal(), model.pop_front(), "steal mismatch");
            }
            // len / is_empty
            _ => {
                assert_eq!(worker.len(), model.len(), "len mismatch");
                assert_eq!(stealer.len(), model.len(), "stealer len mismatch");
                assert_eq!(worker.is_empty(), model.is_empty(), "is_empty mismatch");
            }
        }
    }

    // Drain: nothing lost, nothing duplicated.
    while let Some(v) = worker.pop() {
        assert_eq!(Some(v), model.pop_back(), "drain mismatch");
    }
    assert!(model.is_empty(), "deque lost {} items", model.len());
});
