//! Recycling of connection read and write buffers
use std::sync::Mutex;

use bytes::BytesMut;

/// Initial capacity of freshly allocated buffers
const INITIAL_CAPACITY: usize = 1234;

/// The read and write buffer of a connection
///
/// Handed back by [crate::connection::Connection::end] when a connection is closed
#[derive(Default)]
pub struct Buffers {
    /// Buffer holding received bytes
    pub(crate) read: BytesMut,
    /// Buffer holding packages waiting to be sent
    pub(crate) write: BytesMut,
}

impl Buffers {
    /// Allocate new buffers
    pub fn new() -> Self {
        Buffers {
            read: BytesMut::with_capacity(INITIAL_CAPACITY),
            write: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Total capacity held by the buffers
    pub fn capacity(&self) -> usize {
        self.read.capacity() + self.write.capacity()
    }
}

/// A pool of [Buffers] shared between connections
///
/// Connections take their buffers from the pool on connect and
/// the buffers can be given back once the connection is closed
pub struct BufferPool {
    /// Buffers ready for reuse
    free: Mutex<Vec<Buffers>>,
    /// Never keep more than this many buffers around
    max_buffers: usize,
    /// Buffers larger than this are dropped instead of kept
    max_capacity: usize,
}

impl BufferPool {
    /// Construct a new pool keeping at most `max_buffers` buffers
    pub fn new(max_buffers: usize) -> Self {
        BufferPool {
            free: Mutex::new(Vec::new()),
            max_buffers,
            max_capacity: 1 << 20,
        }
    }

    /// Drop buffers that have grown beyond this capacity instead of keeping them
    pub fn max_capacity(self, max_capacity: usize) -> Self {
        BufferPool {
            max_capacity,
            ..self
        }
    }

    /// Take buffers from the pool, or allocate new ones if the pool is empty
    pub fn take(&self) -> Buffers {
        match self.free.lock() {
            Ok(mut free) => free.pop().unwrap_or_default(),
            Err(_) => Buffers::new(),
        }
    }

    /// Hand buffers back to the pool
    pub fn give(&self, mut buffers: Buffers) {
        if buffers.capacity() > self.max_capacity {
            return;
        }
        buffers.read.clear();
        buffers.write.clear();
        if let Ok(mut free) = self.free.lock()
            && free.len() < self.max_buffers
        {
            free.push(buffers);
        }
    }

    /// Number of buffers ready for reuse
    pub fn len(&self) -> usize {
        self.free.lock().map(|v| v.len()).unwrap_or(0)
    }

    /// True if no buffers are ready for reuse
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn give_and_take() {
        let pool = BufferPool::new(1);
        assert!(pool.is_empty());
        let mut b = pool.take();
        b.read.extend_from_slice(b"garbage");
        pool.give(b);
        pool.give(Buffers::new());
        assert_eq!(pool.len(), 1);
        let b = pool.take();
        assert!(b.read.is_empty());
        assert!(pool.is_empty());
    }

    #[test]
    fn large_buffers_are_dropped() {
        let pool = BufferPool::new(4).max_capacity(16);
        let mut b = Buffers::new();
        b.read.reserve(1024);
        pool.give(b);
        assert!(pool.is_empty());
    }
}
