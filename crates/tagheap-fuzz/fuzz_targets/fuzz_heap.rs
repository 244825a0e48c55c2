#![no_main]
use libfuzzer_sys::fuzz_target;
use tagheap_core::HeapState;
use tagheap_membrane::{ArenaConfig, FatalPolicy, HeapConfig, PageArena, PageProvider};

// Each 4-byte chunk is one operation: opcode, little-endian size, slot.
fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let Ok(arena) = PageArena::new(ArenaConfig::default().with_max_pages(32)) else {
        return;
    };
    let config = HeapConfig::default()
        .with_fatal_policy(FatalPolicy::Panic)
        .with_quick_lists(10, usize::from(data[0] % 8))
        .with_lifecycle_logging(false);
    let mut heap = HeapState::new(arena, config);
    let mut live: Vec<(usize, usize)> = Vec::new();

    for chunk in data[1..].chunks_exact(4) {
        let size = usize::from(u16::from_le_bytes([chunk[1], chunk[2]]));
        let slot = usize::from(chunk[3]);
        match chunk[0] % 4 {
            0 => {
                if let Some(ptr) = heap.allocate(size) {
                    live.push((ptr, size));
                }
            }
            1 if !live.is_empty() => {
                let (ptr, _) = live.swap_remove(slot % live.len());
                heap.deallocate(ptr);
            }
            2 if !live.is_empty() => {
                let idx = slot % live.len();
                let (ptr, old) = live[idx];
                match heap.resize(ptr, size) {
                    Some(moved) => live[idx] = (moved, size),
                    None if size == 0 => {
                        live.swap_remove(idx);
                    }
                    None => assert_eq!(heap.usable_size(ptr), Ok(old)),
                }
            }
            _ => {
                // Misaligned or past-the-end addresses must be rejected
                // without touching the heap.
                let offset = usize::from(u16::from_le_bytes([chunk[1], chunk[2]]));
                let bogus = match live.get(slot) {
                    Some(&(ptr, _)) if offset % 16 != 0 => ptr + offset % 16,
                    _ => heap.pages().heap_end() + (offset << 4),
                };
                assert!(heap.try_deallocate(bogus).is_err());
            }
        }

        if let Err(err) = heap.check_invariants() {
            panic!("heap invariants violated: {err}");
        }
    }

    for (ptr, size) in live {
        assert_eq!(heap.usable_size(ptr), Ok(size));
        heap.deallocate(ptr);
    }
    assert_eq!(heap.active_count(), 0);
});
