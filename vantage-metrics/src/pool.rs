use crossbeam_queue::ArrayQueue;

const DEFAULT_POOL_CAPACITY: usize = 128;
const INITIAL_BUFFER_CAPACITY: usize = 256;

/// A bounded pool of reusable byte buffers.
///
/// The hot emission path encodes every event into a scratch buffer; pooling
/// those buffers keeps that path allocation-free in the steady state.  The
/// pool is purely an optimization: a miss on [`get`](BufferPool::get) simply
/// allocates, and a [`put`](BufferPool::put) into a full pool drops the
/// buffer.  Correctness never depends on reuse.
pub struct BufferPool {
    buffers: ArrayQueue<Vec<u8>>,
}

impl BufferPool {
    pub fn new() -> BufferPool {
        BufferPool::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> BufferPool {
        BufferPool { buffers: ArrayQueue::new(capacity) }
    }

    /// Returns a pooled, empty buffer, or a freshly allocated one when the
    /// pool is empty.
    pub fn get(&self) -> Vec<u8> {
        self.buffers
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(INITIAL_BUFFER_CAPACITY))
    }

    /// Clears the buffer and returns it to the pool, dropping it silently
    /// when the pool is already full.
    pub fn put(&self, mut buf: Vec<u8>) {
        buf.clear();
        let _ = self.buffers.push(buf);
    }
}

impl Default for BufferPool {
    fn default() -> BufferPool {
        BufferPool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returned_buffers_are_reused() {
        let pool = BufferPool::new();

        let mut buf = pool.get();
        buf.extend_from_slice(b"payload");
        let capacity = buf.capacity();
        pool.put(buf);

        let reused = pool.get();
        assert!(reused.is_empty());
        assert_eq!(reused.capacity(), capacity);
    }

    #[test]
    fn miss_allocates_a_fresh_buffer() {
        let pool = BufferPool::with_capacity(1);
        let buf = pool.get();
        assert!(buf.is_empty());
    }

    #[test]
    fn put_into_a_full_pool_drops_the_buffer() {
        let pool = BufferPool::with_capacity(1);
        pool.put(Vec::with_capacity(64));
        // Does not block or error; the second buffer is simply discarded.
        pool.put(Vec::with_capacity(64));
        assert_eq!(pool.get().capacity(), 64);
    }
}
