//! Mutex-serialized heap for callers that share one heap across threads.
//!
//! The allocator itself is single-context; this wrapper only puts one
//! `parking_lot::Mutex` around the whole [`HeapState`]. Error numbers are
//! thread-local, so they land on the calling thread.

use parking_lot::Mutex;
use tagheap_membrane::{PageArena, PageProvider};

use super::allocator::HeapState;
use super::error::HeapError;

pub struct SharedHeap<P: PageProvider = PageArena> {
    inner: Mutex<HeapState<P>>,
}

impl<P: PageProvider> SharedHeap<P> {
    pub fn new(state: HeapState<P>) -> Self {
        Self {
            inner: Mutex::new(state),
        }
    }

    pub fn allocate(&self, size: usize) -> Option<usize> {
        self.inner.lock().allocate(size)
    }

    pub fn deallocate(&self, address: usize) {
        self.inner.lock().deallocate(address);
    }

    pub fn resize(&self, address: usize, new_size: usize) -> Option<usize> {
        self.inner.lock().resize(address, new_size)
    }

    pub fn try_allocate(&self, size: usize) -> Result<usize, HeapError> {
        self.inner.lock().try_allocate(size)
    }

    pub fn try_deallocate(&self, address: usize) -> Result<(), HeapError> {
        self.inner.lock().try_deallocate(address)
    }

    pub fn try_resize(&self, address: usize, new_size: usize) -> Result<Option<usize>, HeapError> {
        self.inner.lock().try_resize(address, new_size)
    }

    /// Runs `f` with the heap locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut HeapState<P>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn into_inner(self) -> HeapState<P> {
        self.inner.into_inner()
    }
}

impl Default for SharedHeap<PageArena> {
    fn default() -> Self {
        Self::new(HeapState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn threads_share_one_heap() {
        let heap = Arc::new(SharedHeap::default());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let heap = Arc::clone(&heap);
                std::thread::spawn(move || {
                    let mut live = Vec::new();
                    for i in 0..200 {
                        let size = 1 + (t * 37 + i * 13) % 300;
                        let ptr = heap.allocate(size).unwrap();
                        heap.with(|state| state.payload_mut(ptr).unwrap().fill(t as u8));
                        live.push(ptr);
                        if i % 3 == 0 {
                            heap.deallocate(live.swap_remove(0));
                        }
                    }
                    for ptr in &live {
                        heap.with(|state| {
                            assert!(state.payload(*ptr).unwrap().iter().all(|&b| b == t as u8));
                        });
                    }
                    for ptr in live {
                        heap.deallocate(ptr);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let state = Arc::try_unwrap(heap).ok().unwrap().into_inner();
        assert_eq!(state.active_count(), 0);
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn try_variants_pass_errors_through() {
        let heap = SharedHeap::default();
        assert_eq!(heap.try_allocate(0), Err(HeapError::ZeroSize));
        let ptr = heap.try_allocate(64).unwrap();
        assert_eq!(heap.try_resize(ptr, 32), Ok(Some(ptr)));
        assert!(heap.try_deallocate(ptr).is_ok());
        assert!(heap.try_deallocate(ptr).is_err());
        assert!(heap.resize(0, 8).is_none());
    }
}
