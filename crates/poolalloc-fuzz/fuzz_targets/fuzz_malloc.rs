#![no_main]
use libfuzzer_sys::fuzz_target;
use poolalloc_core::Allocator;

// Parses `data` as a sequence of (op, size) pairs and drives allocate/free/
// reallocate against a single allocator instance, checking only that no
// live pointer is ever handed out twice.
fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let alloc = Allocator::new();
    let mut live: Vec<std::ptr::NonNull<u8>> = Vec::new();

    for chunk in data.chunks(4) {
        if chunk.len() < 4 {
            break;
        }
        let op = chunk[0] % 3;
        let size = (u16::from_le_bytes([chunk[1], chunk[2]]) as usize).max(1);

        match op {
            0 => {
                if let Some(ptr) = alloc.allocate(size) {
                    assert!(!live.contains(&ptr), "allocator handed out a live address twice");
                    live.push(ptr);
                }
            }
            1 => {
                if !live.is_empty() {
                    let idx = chunk[3] as usize % live.len();
                    alloc.free(Some(live.swap_remove(idx)));
                }
            }
            _ => {
                if !live.is_empty() {
                    let idx = chunk[3] as usize % live.len();
                    if let Some(grown) = alloc.reallocate(Some(live[idx]), size) {
                        live[idx] = grown;
                    }
                }
            }
        }
    }

    for ptr in live {
        alloc.free(Some(ptr));
    }
});
