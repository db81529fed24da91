//! Refcounted packet buffer with head/tail room.
//!
//! ```text
//! |<- head (headroom, live) ->|<- len (payload) ->|<- tailroom ->|
//! 0                         head              head+len        alloc
//! ```
//!
//! `PacketBuffer::alloc` returns a buffer with `refs == 1`; `r#ref` bumps
//! the count and hands back a second owner, `unref` drops one owner and
//! frees the backing storage at the last reference. Layers `push` headers
//! onto the front and `put` payload onto the back; both may transparently
//! grow the allocation, copying live bytes into the new one.

extern crate alloc;

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::error::{NetStackError, Result};

struct Inner {
    data: Vec<u8>,
    head: usize,
    len: usize,
}

impl Inner {
    fn alloc_len(&self) -> usize {
        self.data.len()
    }

    fn tailroom(&self) -> usize {
        self.alloc_len() - self.head - self.len
    }
}

/// A shared handle to a packet's backing bytes.
///
/// Cloning via [`PacketBuffer::r#ref`] increments the reference count;
/// dropping the last handle (via [`PacketBuffer::unref`], or `Drop`) frees
/// the allocation. Ordinary [`Clone`] is intentionally not implemented —
/// callers must go through `r#ref` so the refcount stays visible at call
/// sites that hand a buffer to a second owner (e.g. enqueueing into a ring
/// while the producer still holds it).
pub struct PacketBuffer {
    inner: Rc<RefCell<Inner>>,
}

impl PacketBuffer {
    /// Allocate a new buffer with `capacity` total bytes, `headroom` bytes
    /// reserved at the front and `tailroom` bytes reserved at the back (the
    /// live region starts empty, centered between the two).
    pub fn alloc(capacity: usize, headroom: usize, tailroom: usize) -> Result<Self> {
        if headroom + tailroom > capacity {
            return Err(NetStackError::InvalidArgument);
        }
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| NetStackError::OutOfMemory)?;
        data.resize(capacity, 0);
        Ok(Self {
            inner: Rc::new(RefCell::new(Inner {
                data,
                head: headroom,
                len: capacity - headroom - tailroom,
            })),
        })
    }

    /// Wrap caller-provided bytes as the initial (and only) live region,
    /// with no reserved headroom or tailroom. Used on the RX path when a
    /// driver hands over a byte region that must be treated as already
    /// full to capacity.
    pub fn wrap(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            inner: Rc::new(RefCell::new(Inner { data, head: 0, len })),
        }
    }

    /// Increment the refcount and hand back a second owning handle.
    #[allow(clippy::should_implement_trait)]
    pub fn r#ref(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Drop this handle. Equivalent to letting it go out of scope; kept as
    /// an explicit method because call sites that enqueue-then-unref read
    /// more clearly with it spelled out.
    pub fn unref(self) {
        drop(self);
    }

    pub fn refs(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn headroom(&self) -> usize {
        self.inner.borrow().head
    }

    pub fn tailroom(&self) -> usize {
        self.inner.borrow().tailroom()
    }

    pub fn capacity(&self) -> usize {
        self.inner.borrow().alloc_len()
    }

    /// Copy of the live payload bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        let inner = self.inner.borrow();
        inner.data[inner.head..inner.head + inner.len].to_vec()
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let inner = self.inner.borrow();
        f(&inner.data[inner.head..inner.head + inner.len])
    }

    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut inner = self.inner.borrow_mut();
        let (head, len) = (inner.head, inner.len);
        f(&mut inner.data[head..head + len])
    }

    /// Reserve `n` bytes at the front, reallocating if headroom is
    /// insufficient, and return the new live region's length (unchanged —
    /// `push` only moves `head`/grows storage, it does not touch `len`).
    /// Callers write the new header into `data()[0..n]` afterward.
    pub fn push(&self, n: usize) -> Result<()> {
        self.ensure_headroom(n)?;
        let mut inner = self.inner.borrow_mut();
        inner.head -= n;
        inner.len += n;
        Ok(())
    }

    /// Remove `n` bytes from the front of the live region (header
    /// consumption on receive).
    pub fn pull(&self, n: usize) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if n > inner.len {
            return Err(NetStackError::InvalidArgument);
        }
        inner.head += n;
        inner.len -= n;
        Ok(())
    }

    /// Append `n` bytes at the back, reallocating if tailroom is
    /// insufficient.
    pub fn put(&self, n: usize) -> Result<()> {
        self.ensure_tailroom(n)?;
        let mut inner = self.inner.borrow_mut();
        inner.len += n;
        Ok(())
    }

    /// Shrink the live region by `n` bytes from the back.
    pub fn trim(&self, n: usize) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if n > inner.len {
            return Err(NetStackError::InvalidArgument);
        }
        inner.len -= n;
        Ok(())
    }

    /// Guarantee at least `n` bytes of headroom, reallocating (doubling
    /// the new headroom contribution) and copying the live region forward
    /// if the current allocation falls short.
    pub fn ensure_headroom(&self, n: usize) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.head >= n {
            return Ok(());
        }
        let deficit = n - inner.head;
        grow(&mut inner, deficit, 0)
    }

    /// Guarantee at least `n` bytes of tailroom, reallocating if needed.
    pub fn ensure_tailroom(&self, n: usize) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.tailroom() >= n {
            return Ok(());
        }
        let deficit = n - inner.tailroom();
        grow(&mut inner, 0, deficit)
    }

    /// Append raw bytes at the tail, growing storage as needed. Convenience
    /// built from `put` + a direct copy.
    pub fn append(&self, bytes: &[u8]) -> Result<()> {
        let at = self.len();
        self.put(bytes.len())?;
        self.with_data_mut(|d| d[at..at + bytes.len()].copy_from_slice(bytes));
        Ok(())
    }

    /// Prepend raw bytes at the front, growing storage as needed.
    pub fn prepend(&self, bytes: &[u8]) -> Result<()> {
        self.push(bytes.len())?;
        self.with_data_mut(|d| d[..bytes.len()].copy_from_slice(bytes));
        Ok(())
    }
}

fn grow(inner: &mut Inner, extra_head: usize, extra_tail: usize) -> Result<()> {
    let new_cap = inner
        .alloc_len()
        .checked_add(extra_head)
        .and_then(|v| v.checked_add(extra_tail))
        .ok_or(NetStackError::OutOfMemory)?;
    let new_head = inner.head + extra_head;
    let mut data = Vec::new();
    data.try_reserve_exact(new_cap)
        .map_err(|_| NetStackError::OutOfMemory)?;
    data.resize(new_cap, 0);
    data[new_head..new_head + inner.len].copy_from_slice(&inner.data[inner.head..inner.head + inner.len]);
    inner.data = data;
    inner.head = new_head;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_head_plus_len_le_alloc() {
        let p = PacketBuffer::alloc(64, 16, 8).unwrap();
        assert!(p.headroom() + p.len() <= p.capacity());
        assert_eq!(p.refs(), 1);
    }

    #[test]
    fn ref_bumps_count_unref_drops() {
        let p = PacketBuffer::alloc(32, 8, 8).unwrap();
        let p2 = p.r#ref();
        assert_eq!(p.refs(), 2);
        p2.unref();
        assert_eq!(p.refs(), 1);
    }

    #[test]
    fn push_reserves_front_without_touching_payload() {
        let p = PacketBuffer::alloc(64, 20, 8).unwrap();
        let before = p.len();
        p.push(14).unwrap();
        assert_eq!(p.len(), before + 14);
        assert_eq!(p.headroom(), 6);
    }

    #[test]
    fn push_reallocates_when_headroom_insufficient() {
        let p = PacketBuffer::alloc(16, 2, 0).unwrap();
        p.put(14).unwrap();
        assert!(p.push(20).is_ok());
        assert!(p.headroom() >= 20);
    }

    #[test]
    fn pull_more_than_len_is_invalid_argument() {
        let p = PacketBuffer::alloc(16, 4, 4).unwrap();
        assert_eq!(p.pull(100), Err(NetStackError::InvalidArgument));
    }

    #[test]
    fn trim_more_than_len_is_invalid_argument() {
        let p = PacketBuffer::alloc(16, 4, 4).unwrap();
        assert_eq!(p.trim(100), Err(NetStackError::InvalidArgument));
    }

    #[test]
    fn append_then_prepend_roundtrip() {
        let p = PacketBuffer::alloc(64, 16, 16).unwrap();
        p.append(b"world").unwrap();
        p.prepend(b"hello ").unwrap();
        assert_eq!(p.to_vec(), b"hello world");
    }

    proptest::proptest! {
        #[test]
        fn head_plus_len_never_exceeds_alloc(
            cap in 16usize..256,
            head in 0usize..16,
            tail in 0usize..16,
            push_amt in 0usize..64,
            put_amt in 0usize..64,
        ) {
            let head = head.min(cap / 2);
            let tail = tail.min(cap - head);
            if let Ok(p) = PacketBuffer::alloc(cap, head, tail) {
                let _ = p.push(push_amt);
                let _ = p.put(put_amt);
                proptest::prop_assert!(p.headroom() + p.len() <= p.capacity());
                proptest::prop_assert!(p.refs() >= 1);
            }
        }
    }
}
