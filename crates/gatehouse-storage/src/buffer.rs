//! Stripe-unit buffer pool.
//!
//! Buffers are exactly one stripe unit long and are handed from the
//! pipeline's reader task to its writer task, which returns them here.
//! Losing a buffer only costs an allocation on the next take.

use std::sync::Mutex;

pub struct BufferPool {
    unit: usize,
    slots: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new(unit: usize) -> Self {
        Self {
            unit,
            slots: Mutex::new(Vec::new()),
        }
    }

    pub fn unit(&self) -> usize {
        self.unit
    }

    pub fn take(&self) -> Vec<u8> {
        self.slots
            .lock()
            .expect("buffer pool poisoned")
            .pop()
            .unwrap_or_else(|| vec![0u8; self.unit])
    }

    pub fn put(&self, buf: Vec<u8>) {
        if buf.len() == self.unit {
            self.slots.lock().expect("buffer pool poisoned").push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_reused() {
        let pool = BufferPool::new(8);
        let mut a = pool.take();
        assert_eq!(a.len(), 8);
        a[0] = 42;
        let ptr = a.as_ptr();
        pool.put(a);
        let b = pool.take();
        assert_eq!(b.as_ptr(), ptr);
    }

    #[test]
    fn wrong_size_buffers_are_dropped() {
        let pool = BufferPool::new(8);
        pool.put(vec![0u8; 4]);
        assert_eq!(pool.take().len(), 8);
    }
}
