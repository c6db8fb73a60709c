//! Intrusive recency list.
//!
//! A doubly linked list with sentinel head and tail nodes. Caches keep raw
//! pointers to the nodes in their lookup tables so that "move to most recently
//! used" and "unlink" are O(1). The front of the list is the most recently
//! used end, the back the least recently used end.

use core::fmt;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::{self, NonNull};

/// A node of the list. Sentinels never have an initialized value.
pub(crate) struct Node<T> {
    val: MaybeUninit<T>,
    prev: *mut Node<T>,
    next: *mut Node<T>,
}

impl<T> Node<T> {
    fn new(val: T) -> Self {
        Node {
            val: MaybeUninit::new(val),
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }
    }

    fn sentinel() -> Self {
        Node {
            val: MaybeUninit::uninit(),
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }
    }
}

/// Recency-ordered list of values.
pub(crate) struct RecencyList<T> {
    len: usize,
    head: *mut Node<T>,
    tail: *mut Node<T>,
    _owns: PhantomData<Box<Node<T>>>,
}

impl<T> RecencyList<T> {
    pub(crate) fn new() -> Self {
        let head = Box::into_raw(Box::new(Node::sentinel()));
        let tail = Box::into_raw(Box::new(Node::sentinel()));
        // SAFETY: both sentinels were just allocated and are exclusively ours.
        unsafe {
            (*head).next = tail;
            (*tail).prev = head;
        }
        RecencyList {
            len: 0,
            head,
            tail,
            _owns: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `val` at the most recently used end.
    pub(crate) fn push_front(&mut self, val: T) -> NonNull<Node<T>> {
        let node = Box::into_raw(Box::new(Node::new(val)));
        // SAFETY: `node` is a fresh allocation that is not linked anywhere.
        unsafe { self.attach_front(node) };
        self.len += 1;
        // SAFETY: Box::into_raw never returns null.
        unsafe { NonNull::new_unchecked(node) }
    }

    /// Moves a linked node to the most recently used end.
    ///
    /// # Safety
    ///
    /// `node` must be a live, non-sentinel node of this list.
    pub(crate) unsafe fn move_to_front(&mut self, node: NonNull<Node<T>>) {
        let node = node.as_ptr();
        // SAFETY: caller guarantees `node` is linked into this list.
        unsafe {
            if (*self.head).next == node {
                return;
            }
            self.detach(node);
            self.attach_front(node);
        }
    }

    /// Unlinks a node and returns its value.
    ///
    /// # Safety
    ///
    /// `node` must be a live, non-sentinel node of this list. The pointer is
    /// dangling afterwards.
    pub(crate) unsafe fn unlink(&mut self, node: NonNull<Node<T>>) -> T {
        let node = node.as_ptr();
        // SAFETY: caller guarantees `node` is linked into this list and was
        // allocated by `push_front`.
        unsafe {
            self.detach(node);
            self.len -= 1;
            Box::from_raw(node).val.assume_init()
        }
    }

    /// Removes the least recently used value.
    pub(crate) fn pop_back(&mut self) -> Option<T> {
        // SAFETY: sentinels are valid for the lifetime of the list.
        let last = unsafe { (*self.tail).prev };
        if last == self.head {
            return None;
        }
        // SAFETY: `last` is a linked, non-sentinel node.
        Some(unsafe { self.unlink(NonNull::new_unchecked(last)) })
    }

    /// Returns the value stored in `node`.
    ///
    /// # Safety
    ///
    /// `node` must be a live, non-sentinel node of this list.
    #[inline]
    pub(crate) unsafe fn get<'a>(&'a self, node: NonNull<Node<T>>) -> &'a T {
        // SAFETY: caller guarantees the node is initialized and owned by us.
        unsafe { (*node.as_ptr()).val.assume_init_ref() }
    }

    /// Returns the value stored in `node` mutably.
    ///
    /// # Safety
    ///
    /// `node` must be a live, non-sentinel node of this list.
    #[inline]
    pub(crate) unsafe fn get_mut<'a>(&'a mut self, node: NonNull<Node<T>>) -> &'a mut T {
        // SAFETY: caller guarantees the node is initialized and owned by us.
        unsafe { (*node.as_ptr()).val.assume_init_mut() }
    }

    /// Finds the least recently used node whose value satisfies `pred`.
    pub(crate) fn find_from_back<F>(&self, mut pred: F) -> Option<NonNull<Node<T>>>
    where
        F: FnMut(&T) -> bool,
    {
        // SAFETY: every node between the sentinels is initialized and linked.
        unsafe {
            let mut cur = (*self.tail).prev;
            while cur != self.head {
                if pred((*cur).val.assume_init_ref()) {
                    return Some(NonNull::new_unchecked(cur));
                }
                cur = (*cur).prev;
            }
        }
        None
    }

    /// Unlinks every value for which `remove` returns `true` and returns them.
    pub(crate) fn drain_where<F>(&mut self, mut remove: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let mut removed = Vec::new();
        // SAFETY: the successor is read before the current node is unlinked.
        unsafe {
            let mut cur = (*self.head).next;
            while cur != self.tail {
                let next = (*cur).next;
                if remove((*cur).val.assume_init_ref()) {
                    removed.push(self.unlink(NonNull::new_unchecked(cur)));
                }
                cur = next;
            }
        }
        removed
    }

    /// Iterates from most to least recently used.
    pub(crate) fn iter(&self) -> Iter<'_, T> {
        Iter {
            // SAFETY: the head sentinel is valid for the lifetime of the list.
            cur: unsafe { (*self.head).next },
            tail: self.tail,
            _marker: PhantomData,
        }
    }

    pub(crate) fn clear(&mut self) {
        while self.pop_back().is_some() {}
    }

    /// # Safety
    ///
    /// `node` must be linked into this list.
    unsafe fn detach(&mut self, node: *mut Node<T>) {
        // SAFETY: a linked node always has valid neighbours.
        unsafe {
            (*(*node).prev).next = (*node).next;
            (*(*node).next).prev = (*node).prev;
        }
    }

    /// # Safety
    ///
    /// `node` must be valid and not linked into any list.
    unsafe fn attach_front(&mut self, node: *mut Node<T>) {
        // SAFETY: head is valid; caller guarantees `node` is unlinked.
        unsafe {
            (*node).next = (*self.head).next;
            (*node).prev = self.head;
            (*self.head).next = node;
            (*(*node).next).prev = node;
        }
    }
}

impl<T> Drop for RecencyList<T> {
    fn drop(&mut self) {
        self.clear();
        // SAFETY: sentinels were allocated in `new` and are freed exactly once.
        unsafe {
            drop(Box::from_raw(self.head));
            drop(Box::from_raw(self.tail));
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for RecencyList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Front-to-back iterator over a [`RecencyList`].
pub(crate) struct Iter<'a, T> {
    cur: *mut Node<T>,
    tail: *mut Node<T>,
    _marker: PhantomData<&'a T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if self.cur == self.tail {
            return None;
        }
        // SAFETY: `cur` is a linked, non-sentinel node borrowed for 'a.
        unsafe {
            let val = (*self.cur).val.assume_init_ref();
            self.cur = (*self.cur).next;
            Some(val)
        }
    }
}
