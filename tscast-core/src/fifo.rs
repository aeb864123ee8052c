//! Bounded single-producer/single-consumer queue.
//!
//! The ring itself is lock-free: while the queue is neither full nor empty,
//! push and pop complete without taking a lock. The blocking paths (`push`
//! on a full queue, `wait_read_available` on an empty one) park on a
//! mutex/condvar pair, and either side can be released permanently with the
//! sticky unblock flags so worker threads can be shut down deterministically.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

/// Lock-free SPSC ring storage. One slot is kept empty to distinguish the
/// full and empty states.
struct Ring<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Next slot the consumer will read.
    head: AtomicUsize,
    /// Next slot the producer will write.
    tail: AtomicUsize,
}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Self {
        let slots = (0..capacity + 1)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn next(&self, index: usize) -> usize {
        let next = index + 1;
        if next == self.slots.len() {
            0
        } else {
            next
        }
    }

    /// Producer side. Returns the element back if the ring is full.
    fn push(&self, element: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let next = self.next(tail);

        if next == self.head.load(Ordering::Acquire) {
            return Err(element);
        }

        unsafe {
            (*self.slots[tail].get()).write(element);
        }
        self.tail.store(next, Ordering::Release);

        Ok(())
    }

    /// Consumer side.
    fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);

        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }

        let element = unsafe { (*self.slots[head].get()).assume_init_read() };
        self.head.store(self.next(head), Ordering::Release);

        Some(element)
    }

    /// Consumer side. The reference stays valid until the consumer pops.
    fn front(&self) -> Option<&T> {
        let head = self.head.load(Ordering::Relaxed);

        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }

        Some(unsafe { (*self.slots[head].get()).assume_init_ref() })
    }

    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);

        if tail >= head {
            tail - head
        } else {
            tail + self.slots.len() - head
        }
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

/// Wait state of one side of the queue.
#[derive(Default)]
struct SideState {
    waiting: bool,
    unblock: bool,
}

/// Waitable single-producer/single-consumer FIFO.
///
/// Exactly one thread may call the producer operations ([`Fifo::push`],
/// [`Fifo::try_push`], [`Fifo::write_available`]) and exactly one thread the
/// consumer operations ([`Fifo::front`], [`Fifo::pop`],
/// [`Fifo::wait_read_available`], [`Fifo::read_available`]). The unblock
/// operations may be called from any thread.
pub struct Fifo<T> {
    ring: Ring<T>,
    capacity: usize,
    /// Producer wait state, paired with `cond_full`.
    full: Mutex<SideState>,
    cond_full: Condvar,
    /// Consumer wait state, paired with `cond_empty`.
    empty: Mutex<SideState>,
    cond_empty: Condvar,
}

unsafe impl<T: Send> Send for Fifo<T> {}
unsafe impl<T: Send> Sync for Fifo<T> {}

impl<T> Fifo<T> {
    /// Creates a queue holding at most `capacity` elements.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "fifo capacity must be > 0");

        Self {
            ring: Ring::new(capacity),
            capacity,
            full: Mutex::new(SideState::default()),
            cond_full: Condvar::new(),
            empty: Mutex::new(SideState::default()),
            cond_empty: Condvar::new(),
        }
    }

    /// Non-blocking push. Returns the element back if the queue is full.
    pub fn try_push(&self, element: T) -> Result<(), T> {
        match self.ring.push(element) {
            Ok(()) => {
                self.wake_consumer();
                Ok(())
            }
            Err(element) => Err(element),
        }
    }

    /// Pushes an element, blocking while the queue is full.
    ///
    /// If [`Fifo::unblock_producer`] has been called the wait is skipped and
    /// the element is handed back instead of being enqueued.
    pub fn push(&self, element: T) -> Result<(), T> {
        let mut element = match self.ring.push(element) {
            Ok(()) => {
                self.wake_consumer();
                return Ok(());
            }
            Err(element) => element,
        };

        {
            let mut state = self.full.lock();
            loop {
                if state.unblock {
                    return Err(element);
                }
                match self.ring.push(element) {
                    Ok(()) => break,
                    Err(back) => element = back,
                }
                state.waiting = true;
                self.cond_full.wait(&mut state);
            }
        }

        self.wake_consumer();
        Ok(())
    }

    /// Returns a reference to the front element without removing it.
    pub fn front(&self) -> Option<&T> {
        self.ring.front()
    }

    /// Pops the front element.
    pub fn pop(&self) -> Option<T> {
        let element = self.ring.pop();

        if element.is_some() {
            self.wake_producer();
        }

        element
    }

    /// Blocks until at least one element can be popped, returning the number
    /// of readable elements. Returns 0 only after
    /// [`Fifo::unblock_consumer`].
    pub fn wait_read_available(&self) -> usize {
        let available = self.ring.len();
        if available > 0 {
            return available;
        }

        let mut state = self.empty.lock();
        loop {
            let available = self.ring.len();
            if available > 0 || state.unblock {
                return available;
            }
            state.waiting = true;
            self.cond_empty.wait(&mut state);
        }
    }

    /// Number of elements available to the consumer.
    pub fn read_available(&self) -> usize {
        self.ring.len()
    }

    /// Number of free slots available to the producer.
    pub fn write_available(&self) -> usize {
        self.capacity - self.ring.len()
    }

    /// Maximum number of elements the queue can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Releases the producer if it is blocked in [`Fifo::push`]. Sticky: the
    /// producer will not block again until [`Fifo::clear`].
    pub fn unblock_producer(&self) {
        let mut state = self.full.lock();
        state.unblock = true;
        self.cond_full.notify_one();
    }

    /// Releases the consumer if it is blocked in
    /// [`Fifo::wait_read_available`]. Sticky: the consumer will not block
    /// again until [`Fifo::clear`].
    pub fn unblock_consumer(&self) {
        let mut state = self.empty.lock();
        state.unblock = true;
        self.cond_empty.notify_one();
    }

    /// Empties the queue and re-arms both blocking sides.
    ///
    /// Both worker threads must be quiescent while this is called.
    pub fn clear(&self) {
        while self.ring.pop().is_some() {}
        self.full.lock().unblock = false;
        self.empty.lock().unblock = false;
    }

    fn wake_consumer(&self) {
        let mut state = self.empty.lock();
        if state.waiting {
            state.waiting = false;
            self.cond_empty.notify_one();
        }
    }

    fn wake_producer(&self) {
        let mut state = self.full.lock();
        if state.waiting {
            state.waiting = false;
            self.cond_full.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_push_pop_order() {
        let fifo = Fifo::new(8);

        for i in 0..8 {
            fifo.try_push(i).unwrap();
        }
        assert_eq!(fifo.read_available(), 8);
        assert_eq!(fifo.write_available(), 0);

        for i in 0..8 {
            assert_eq!(*fifo.front().unwrap(), i);
            assert_eq!(fifo.pop(), Some(i));
        }
        assert_eq!(fifo.pop(), None);
    }

    #[test]
    fn test_try_push_full() {
        let fifo = Fifo::new(2);
        fifo.try_push(1).unwrap();
        fifo.try_push(2).unwrap();
        assert_eq!(fifo.try_push(3), Err(3));

        fifo.pop();
        fifo.try_push(3).unwrap();
        assert_eq!(fifo.pop(), Some(2));
        assert_eq!(fifo.pop(), Some(3));
    }

    #[test]
    fn test_unblock_producer() {
        let fifo = Arc::new(Fifo::new(1));
        fifo.try_push(0u32).unwrap();

        let producer = {
            let fifo = Arc::clone(&fifo);
            thread::spawn(move || fifo.push(1))
        };

        thread::sleep(Duration::from_millis(50));
        fifo.unblock_producer();

        assert_eq!(producer.join().unwrap(), Err(1));
        // Sticky: the producer never blocks again.
        assert_eq!(fifo.push(2), Err(2));
    }

    #[test]
    fn test_unblock_consumer() {
        let fifo: Arc<Fifo<u32>> = Arc::new(Fifo::new(4));

        let consumer = {
            let fifo = Arc::clone(&fifo);
            thread::spawn(move || fifo.wait_read_available())
        };

        thread::sleep(Duration::from_millis(50));
        fifo.unblock_consumer();

        assert_eq!(consumer.join().unwrap(), 0);
    }

    #[test]
    fn test_clear_rearms_blocking() {
        let fifo: Fifo<u32> = Fifo::new(2);
        fifo.unblock_producer();
        fifo.unblock_consumer();
        fifo.try_push(7).unwrap();

        fifo.clear();

        assert_eq!(fifo.read_available(), 0);
        fifo.push(1).unwrap();
        assert_eq!(fifo.wait_read_available(), 1);
    }

    #[test]
    fn test_spsc_stress() {
        const COUNT: u64 = 1_000_000;

        let fifo = Arc::new(Fifo::new(100));

        let producer = {
            let fifo = Arc::clone(&fifo);
            thread::spawn(move || {
                for i in 0..COUNT {
                    fifo.push(i).unwrap();
                }
            })
        };

        let consumer = {
            let fifo = Arc::clone(&fifo);
            thread::spawn(move || {
                for expected in 0..COUNT {
                    fifo.wait_read_available();
                    assert_eq!(fifo.pop(), Some(expected));
                }
            })
        };

        producer.join().unwrap();
        consumer.join().unwrap();
        assert_eq!(fifo.read_available(), 0);
    }
}
