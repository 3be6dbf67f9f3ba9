//! Queue engine over the circular chain.
//!
//! Every element costs two logical grants from the injector: one for the
//! link node and one for the payload copy (`len + 1`, the copy is
//! NUL-budgeted like a C string). The two grants share one lifetime and
//! are released together. The sentinel is a third grant owned by the queue
//! itself.
//!
//! Failure policy: an allocation denial leaves the queue exactly as it
//! was; linking happens only after every grant for the operation has
//! succeeded. Traps from the execution guard unwind through `Result`
//! before any partial relinking becomes observable to the next operation,
//! except `free`, where a trap abandons the remaining elements as
//! outstanding grants for the harness to count.

use std::collections::HashMap;
use std::mem;

use rand::Rng;

use crate::alloc::{AllocId, FaultAllocator};
use crate::guard::{ExecGuard, Trap};
use crate::list::{Chain, NodeId};

/// Grant size charged for one link node: the two links it stores.
const NODE_GRANT: usize = 2 * mem::size_of::<AllocId>();

#[derive(Debug)]
struct Element {
    text: String,
    payload: AllocId,
}

/// A queue of string payloads on a circular doubly-linked chain.
#[derive(Debug)]
pub struct Queue {
    sentinel: NodeId,
    chain: Chain,
    elements: HashMap<NodeId, Element>,
}

/// An element removed from a queue. Removal transfers ownership: the
/// grants stay outstanding until [`Removed::release`] is called, so a
/// dropped handle shows up in the injector's leak count. That is the
/// contract, not an accident — a harness may hold a removed element for
/// later comparison and release it then.
#[derive(Debug)]
pub struct Removed {
    node: NodeId,
    payload: AllocId,
    text: String,
}

impl Removed {
    /// The payload carried by the removed element.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Releases both grants of the element.
    pub fn release(self, alloc: &mut FaultAllocator) {
        alloc.release(self.payload);
        alloc.release(self.node);
    }
}

impl Queue {
    /// Allocates an empty queue. `None` when the sentinel grant is denied;
    /// a queue is never partially constructed.
    #[must_use]
    pub fn new(alloc: &mut FaultAllocator) -> Option<Self> {
        let sentinel = alloc.alloc(NODE_GRANT)?;
        let mut chain = Chain::new();
        chain.init(sentinel);
        Some(Self {
            sentinel,
            chain,
            elements: HashMap::new(),
        })
    }

    /// Releases every element, then the sentinel. A trap mid-release
    /// abandons the remainder; the injector's outstanding count shows
    /// exactly what was left behind.
    pub fn free(mut self, alloc: &mut FaultAllocator, guard: &ExecGuard) -> Result<(), Trap> {
        let s = self.sentinel;
        let mut cur = self.chain.next(s);
        while cur != s {
            guard.tick()?;
            let next = self.chain.next(cur);
            self.chain.unlink(cur);
            if let Some(elem) = self.elements.remove(&cur) {
                alloc.release(elem.payload);
            }
            alloc.release(cur);
            cur = next;
        }
        alloc.release(s);
        Ok(())
    }

    /// Inserts a copy of `text` at the head. `false` on a denied grant;
    /// the queue is left unmodified and nothing stays half-linked.
    pub fn insert_head(&mut self, alloc: &mut FaultAllocator, text: &str) -> bool {
        self.insert(alloc, text, true)
    }

    /// Inserts a copy of `text` at the tail.
    pub fn insert_tail(&mut self, alloc: &mut FaultAllocator, text: &str) -> bool {
        self.insert(alloc, text, false)
    }

    fn insert(&mut self, alloc: &mut FaultAllocator, text: &str, at_head: bool) -> bool {
        let Some(node) = alloc.alloc(NODE_GRANT) else {
            return false;
        };
        let Some(payload) = alloc.alloc(text.len() + 1) else {
            alloc.release(node);
            return false;
        };
        if at_head {
            self.chain.link_after(self.sentinel, node);
        } else {
            self.chain.link_before(self.sentinel, node);
        }
        self.elements.insert(
            node,
            Element {
                text: text.to_string(),
                payload,
            },
        );
        true
    }

    /// Unlinks the head element and transfers its ownership to the caller.
    /// When `out` is given, copies up to `out.len() - 1` payload bytes plus
    /// a NUL terminator into it, truncating, never overflowing. `None` on
    /// an empty queue.
    pub fn remove_head(&mut self, out: Option<&mut [u8]>) -> Option<Removed> {
        let node = self.chain.next(self.sentinel);
        self.remove_at(node, out)
    }

    /// Unlinks the tail element. Otherwise as [`Queue::remove_head`].
    pub fn remove_tail(&mut self, out: Option<&mut [u8]>) -> Option<Removed> {
        let node = self.chain.prev(self.sentinel);
        self.remove_at(node, out)
    }

    fn remove_at(&mut self, node: NodeId, out: Option<&mut [u8]>) -> Option<Removed> {
        if node == self.sentinel {
            return None;
        }
        self.chain.unlink(node);
        let elem = self.elements.remove(&node)?;
        if let Some(buf) = out {
            copy_payload(&elem.text, buf);
        }
        Some(Removed {
            node,
            payload: elem.payload,
            text: elem.text,
        })
    }

    /// Counts reachable elements by full traversal. Size is derived, never
    /// cached.
    pub fn size(&self, guard: &ExecGuard) -> Result<usize, Trap> {
        let s = self.sentinel;
        let mut count = 0;
        let mut cur = self.chain.next(s);
        while cur != s {
            guard.tick()?;
            count += 1;
            cur = self.chain.next(cur);
        }
        Ok(count)
    }

    /// Whether the queue holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.next(self.sentinel) == self.sentinel
    }

    /// Payloads in head-to-tail order.
    pub fn texts(&self) -> impl Iterator<Item = &str> + '_ {
        self.chain
            .iter(self.sentinel)
            .filter_map(|node| self.elements.get(&node).map(|e| e.text.as_str()))
    }

    /// Head payload, if any.
    #[must_use]
    pub fn front(&self) -> Option<&str> {
        let node = self.chain.next(self.sentinel);
        self.elements.get(&node).map(|e| e.text.as_str())
    }

    /// Tail payload, if any.
    #[must_use]
    pub fn back(&self) -> Option<&str> {
        let node = self.chain.prev(self.sentinel);
        self.elements.get(&node).map(|e| e.text.as_str())
    }

    /// Deletes and releases the lower-middle element: index `(n - 1) / 2`
    /// from the head, 0-indexed, found with a fast/slow walker pair (slow
    /// from the first element, fast from the second). `false` on an empty
    /// queue.
    pub fn delete_middle(
        &mut self,
        alloc: &mut FaultAllocator,
        guard: &ExecGuard,
    ) -> Result<bool, Trap> {
        let s = self.sentinel;
        let first = self.chain.next(s);
        if first == s {
            return Ok(false);
        }
        let mut slow = first;
        let mut fast = self.chain.next(first);
        while fast != s && self.chain.next(fast) != s {
            guard.tick()?;
            slow = self.chain.next(slow);
            fast = self.chain.next(self.chain.next(fast));
        }
        self.delete(alloc, slow);
        Ok(true)
    }

    /// Deletes every element that shares its payload with an adjacent one,
    /// keeping only elements whose value appears exactly once.
    ///
    /// PRECONDITION: the queue is sorted ascending. On unsorted input only
    /// adjacent runs are considered and the result is unspecified; the
    /// precondition is documented, not checked.
    pub fn delete_duplicates(
        &mut self,
        alloc: &mut FaultAllocator,
        guard: &ExecGuard,
    ) -> Result<(), Trap> {
        let s = self.sentinel;
        let mut in_run = false;
        let mut cur = self.chain.next(s);
        while cur != s {
            guard.tick()?;
            let next = self.chain.next(cur);
            let equal_next = next != s && self.text(cur) == self.text(next);
            if equal_next {
                self.delete(alloc, cur);
                in_run = true;
            } else if in_run {
                // Last member of an equal run.
                self.delete(alloc, cur);
                in_run = false;
            }
            cur = next;
        }
        Ok(())
    }

    /// Exchanges each adjacent pair of elements in place. The final
    /// element of an odd-length queue stays put.
    pub fn swap_pairs(&mut self, guard: &ExecGuard) -> Result<(), Trap> {
        let s = self.sentinel;
        let mut a = self.chain.next(s);
        while a != s {
            guard.tick()?;
            let b = self.chain.next(a);
            if b == s {
                break;
            }
            self.chain.unlink(a);
            self.chain.link_after(b, a);
            a = self.chain.next(a);
        }
        Ok(())
    }

    /// Reverses element order in place by exchanging the links of every
    /// node, sentinel included. No element is allocated or released.
    pub fn reverse(&mut self, guard: &ExecGuard) -> Result<(), Trap> {
        let s = self.sentinel;
        let mut cur = s;
        loop {
            guard.tick()?;
            let next = self.chain.next(cur);
            self.chain.swap_links(cur);
            cur = next;
            if cur == s {
                break;
            }
        }
        Ok(())
    }

    /// Bottom-up merge sort, ascending by byte-wise payload comparison.
    /// The merge takes the left run on equal keys, so the original order
    /// among equal payloads is preserved. Merge passes build
    /// sentinel-terminated singly-linked runs; backward links are rebuilt
    /// in one pass at the end.
    pub fn sort(&mut self, guard: &ExecGuard) -> Result<(), Trap> {
        let len = self.size(guard)?;
        if len <= 1 {
            return Ok(());
        }
        let s = self.sentinel;
        let mut width = 1;
        while width < len {
            let mut merged_tail = s;
            let mut cur = self.chain.next(s);
            while cur != s {
                guard.tick()?;
                let left = cur;
                let right = self.cut_run(left, width, guard)?;
                let next_pair = if right == s {
                    s
                } else {
                    self.cut_run(right, width, guard)?
                };
                let (head, tail) = self.merge_runs(left, right, guard)?;
                if merged_tail == s {
                    self.chain.set_next(s, head);
                } else {
                    self.chain.set_next(merged_tail, head);
                }
                merged_tail = tail;
                cur = next_pair;
            }
            self.chain.set_next(merged_tail, s);
            width = width.saturating_mul(2);
        }
        // Backward links are stale after the merge passes; rebuild them.
        let mut prev = s;
        let mut cur = self.chain.next(s);
        while cur != s {
            guard.tick()?;
            self.chain.set_prev(cur, prev);
            prev = cur;
            cur = self.chain.next(cur);
        }
        self.chain.set_prev(s, prev);
        Ok(())
    }

    /// Detaches a run of at most `width` nodes starting at `head` by
    /// terminating it with the sentinel; returns the head of what follows.
    fn cut_run(&mut self, head: NodeId, width: usize, guard: &ExecGuard) -> Result<NodeId, Trap> {
        let s = self.sentinel;
        let mut tail = head;
        for _ in 1..width {
            guard.tick()?;
            let next = self.chain.next(tail);
            if next == s {
                break;
            }
            tail = next;
        }
        let rest = self.chain.next(tail);
        self.chain.set_next(tail, s);
        Ok(rest)
    }

    /// Merges two sentinel-terminated runs into one; returns its head and
    /// tail. Left run wins ties.
    fn merge_runs(
        &mut self,
        mut left: NodeId,
        mut right: NodeId,
        guard: &ExecGuard,
    ) -> Result<(NodeId, NodeId), Trap> {
        let s = self.sentinel;
        let mut head = s;
        let mut tail = s;
        while left != s && right != s {
            guard.tick()?;
            let take = if self.text(left) <= self.text(right) {
                let next = self.chain.next(left);
                let node = left;
                left = next;
                node
            } else {
                let next = self.chain.next(right);
                let node = right;
                right = next;
                node
            };
            if head == s {
                head = take;
            } else {
                self.chain.set_next(tail, take);
            }
            tail = take;
        }
        // Exactly one run can remain; splice it on whole.
        let rest = if left != s { left } else { right };
        if rest != s {
            if head == s {
                head = rest;
            } else {
                self.chain.set_next(tail, rest);
            }
            let mut t = rest;
            loop {
                guard.tick()?;
                let next = self.chain.next(t);
                if next == s {
                    break;
                }
                t = next;
            }
            tail = t;
        }
        Ok((head, tail))
    }

    /// In-place Fisher–Yates shuffle of the payloads. For each remaining
    /// length, draws a uniform index from the head and exchanges that
    /// payload with the one at the fill position walking inward from the
    /// tail. Links never move; only payloads do.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R, guard: &ExecGuard) -> Result<(), Trap> {
        let total = self.size(guard)?;
        if total <= 1 {
            return Ok(());
        }
        let s = self.sentinel;
        let mut anchor = s;
        let mut len = total;
        while len > 0 {
            guard.tick()?;
            let pick = rng.gen_range(0..len);
            let mut node = self.chain.next(s);
            for _ in 0..pick {
                guard.tick()?;
                node = self.chain.next(node);
            }
            anchor = self.chain.prev(anchor);
            self.swap_elements(node, anchor);
            len -= 1;
        }
        Ok(())
    }

    /// Floyd tortoise/hare from the sentinel, with a per-step
    /// `next(n).prev == n` consistency check. True iff the hare returns to
    /// the sentinel; a damaged link or a cycle that bypasses the sentinel
    /// reports false, never panics.
    pub fn is_circular(&self, guard: &ExecGuard) -> Result<bool, Trap> {
        let s = self.sentinel;
        let mut slow = s;
        let mut fast = s;
        loop {
            guard.tick()?;
            slow = match self.step(slow) {
                Some(n) => n,
                None => return Ok(false),
            };
            fast = match self.step(fast) {
                Some(n) => n,
                None => return Ok(false),
            };
            if fast == s {
                return Ok(true);
            }
            fast = match self.step(fast) {
                Some(n) => n,
                None => return Ok(false),
            };
            if fast == s {
                return Ok(true);
            }
            if slow == fast {
                return Ok(false);
            }
        }
    }

    fn step(&self, node: NodeId) -> Option<NodeId> {
        let next = self.chain.try_next(node)?;
        if self.chain.try_prev(next)? != node {
            return None;
        }
        Some(next)
    }

    fn text(&self, node: NodeId) -> &str {
        self.elements.get(&node).map_or("", |e| e.text.as_str())
    }

    fn delete(&mut self, alloc: &mut FaultAllocator, node: NodeId) {
        self.chain.unlink(node);
        if let Some(elem) = self.elements.remove(&node) {
            alloc.release(elem.payload);
        }
        alloc.release(node);
    }

    fn swap_elements(&mut self, a: NodeId, b: NodeId) {
        if a == b {
            return;
        }
        let ea = self.elements.remove(&a);
        let eb = self.elements.remove(&b);
        if let Some(e) = eb {
            self.elements.insert(a, e);
        }
        if let Some(e) = ea {
            self.elements.insert(b, e);
        }
    }
}

/// Truncating NUL-terminated copy into a caller buffer: at most
/// `buf.len() - 1` payload bytes, always terminated, never overflowing.
fn copy_payload(text: &str, buf: &mut [u8]) {
    if buf.is_empty() {
        return;
    }
    let n = text.len().min(buf.len() - 1);
    buf[..n].copy_from_slice(&text.as_bytes()[..n]);
    buf[n] = 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> (FaultAllocator, ExecGuard) {
        (FaultAllocator::new(11), ExecGuard::new())
    }

    fn build(alloc: &mut FaultAllocator, texts: &[&str]) -> Queue {
        let mut q = Queue::new(alloc).expect("sentinel grant");
        for t in texts {
            assert!(q.insert_tail(alloc, t));
        }
        q
    }

    fn snapshot(q: &Queue) -> Vec<String> {
        q.texts().map(str::to_string).collect()
    }

    #[test]
    fn insert_head_prepends_and_insert_tail_appends() {
        let (mut alloc, _guard) = ctx();
        let mut q = Queue::new(&mut alloc).unwrap();
        assert!(q.insert_tail(&mut alloc, "b"));
        assert!(q.insert_head(&mut alloc, "a"));
        assert!(q.insert_tail(&mut alloc, "c"));
        assert_eq!(snapshot(&q), ["a", "b", "c"]);
        assert_eq!(q.front(), Some("a"));
        assert_eq!(q.back(), Some("c"));
    }

    #[test]
    fn new_fails_cleanly_when_sentinel_grant_is_denied() {
        let mut alloc = FaultAllocator::new(11);
        alloc.fail_after(1);
        assert!(Queue::new(&mut alloc).is_none());
        assert_eq!(alloc.outstanding_count(), 0);
    }

    #[test]
    fn insert_failure_on_node_grant_leaves_queue_unmodified() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["keep"]);
        let before = alloc.outstanding_count();
        alloc.fail_after(1);
        assert!(!q.insert_head(&mut alloc, "lost"));
        assert_eq!(snapshot(&q), ["keep"]);
        assert_eq!(alloc.outstanding_count(), before);
        assert!(q.is_circular(&guard).unwrap());
    }

    #[test]
    fn insert_failure_on_payload_grant_rolls_back_the_node() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["keep"]);
        let before = alloc.outstanding_count();
        alloc.fail_after(2);
        assert!(!q.insert_tail(&mut alloc, "lost"));
        assert_eq!(snapshot(&q), ["keep"]);
        assert_eq!(alloc.outstanding_count(), before);
        assert!(q.is_circular(&guard).unwrap());
        assert_eq!(alloc.violation_count(), 0);
    }

    #[test]
    fn remove_head_transfers_ownership() {
        let (mut alloc, _guard) = ctx();
        let mut q = build(&mut alloc, &["x", "y"]);
        let removed = q.remove_head(None).unwrap();
        assert_eq!(removed.text(), "x");
        assert_eq!(snapshot(&q), ["y"]);
        // Still outstanding until released.
        let before = alloc.outstanding_count();
        removed.release(&mut alloc);
        assert_eq!(alloc.outstanding_count(), before - 2);
    }

    #[test]
    fn remove_tail_takes_the_other_end() {
        let (mut alloc, _guard) = ctx();
        let mut q = build(&mut alloc, &["x", "y"]);
        let removed = q.remove_tail(None).unwrap();
        assert_eq!(removed.text(), "y");
        removed.release(&mut alloc);
    }

    #[test]
    fn remove_from_empty_queue_is_none() {
        let (mut alloc, _guard) = ctx();
        let mut q = build(&mut alloc, &[]);
        assert!(q.remove_head(None).is_none());
        assert!(q.remove_tail(None).is_none());
    }

    #[test]
    fn remove_copies_payload_truncated_and_terminated() {
        let (mut alloc, _guard) = ctx();
        let mut q = build(&mut alloc, &["longvalue"]);
        let mut buf = [0xAAu8; 5];
        let removed = q.remove_head(Some(&mut buf)).unwrap();
        assert_eq!(&buf, b"long\0");
        removed.release(&mut alloc);
    }

    #[test]
    fn remove_copy_into_roomy_buffer_keeps_whole_payload() {
        let (mut alloc, _guard) = ctx();
        let mut q = build(&mut alloc, &["ab"]);
        let mut buf = [0xAAu8; 8];
        let removed = q.remove_head(Some(&mut buf)).unwrap();
        assert_eq!(&buf[..3], b"ab\0");
        removed.release(&mut alloc);
    }

    #[test]
    fn size_counts_by_traversal() {
        let (mut alloc, guard) = ctx();
        let q = build(&mut alloc, &["a", "b", "c"]);
        assert_eq!(q.size(&guard).unwrap(), 3);
        assert!(!q.is_empty());
    }

    #[test]
    fn free_releases_every_grant() {
        let (mut alloc, guard) = ctx();
        let q = build(&mut alloc, &["a", "b", "c"]);
        assert!(alloc.outstanding_count() > 0);
        q.free(&mut alloc, &guard).unwrap();
        assert_eq!(alloc.outstanding_count(), 0);
        assert_eq!(alloc.violation_count(), 0);
    }

    #[test]
    fn delete_middle_size_six_removes_index_two() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["a", "b", "c", "d", "e", "f"]);
        assert!(q.delete_middle(&mut alloc, &guard).unwrap());
        assert_eq!(snapshot(&q), ["a", "b", "d", "e", "f"]);
    }

    #[test]
    fn delete_middle_size_three_removes_index_one() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["a", "b", "c"]);
        assert!(q.delete_middle(&mut alloc, &guard).unwrap());
        assert_eq!(snapshot(&q), ["a", "c"]);
    }

    #[test]
    fn delete_middle_singleton_empties_the_queue() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["only"]);
        assert!(q.delete_middle(&mut alloc, &guard).unwrap());
        assert!(q.is_empty());
    }

    #[test]
    fn delete_middle_on_empty_queue_is_false() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &[]);
        assert!(!q.delete_middle(&mut alloc, &guard).unwrap());
    }

    #[test]
    fn delete_duplicates_keeps_only_unique_values() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["1", "1", "2", "2", "2", "3"]);
        q.delete_duplicates(&mut alloc, &guard).unwrap();
        assert_eq!(snapshot(&q), ["3"]);
    }

    #[test]
    fn delete_duplicates_without_duplicates_is_identity() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["a", "b", "c"]);
        q.delete_duplicates(&mut alloc, &guard).unwrap();
        assert_eq!(snapshot(&q), ["a", "b", "c"]);
    }

    #[test]
    fn delete_duplicates_releases_what_it_deletes() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["x", "x"]);
        q.delete_duplicates(&mut alloc, &guard).unwrap();
        assert!(q.is_empty());
        q.free(&mut alloc, &guard).unwrap();
        assert_eq!(alloc.outstanding_count(), 0);
    }

    #[test]
    fn swap_pairs_leaves_odd_tail_in_place() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["a", "b", "c", "d", "e"]);
        q.swap_pairs(&guard).unwrap();
        assert_eq!(snapshot(&q), ["b", "a", "d", "c", "e"]);
        assert!(q.is_circular(&guard).unwrap());
    }

    #[test]
    fn swap_pairs_even_length_swaps_everything() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["a", "b", "c", "d"]);
        q.swap_pairs(&guard).unwrap();
        assert_eq!(snapshot(&q), ["b", "a", "d", "c"]);
    }

    #[test]
    fn reverse_exchanges_head_and_tail() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["a", "b", "c", "d"]);
        q.reverse(&guard).unwrap();
        assert_eq!(snapshot(&q), ["d", "c", "b", "a"]);
        assert_eq!(q.front(), Some("d"));
        assert_eq!(q.back(), Some("a"));
        assert!(q.is_circular(&guard).unwrap());
    }

    #[test]
    fn reverse_twice_is_identity() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["a", "b", "c"]);
        q.reverse(&guard).unwrap();
        q.reverse(&guard).unwrap();
        assert_eq!(snapshot(&q), ["a", "b", "c"]);
    }

    #[test]
    fn reverse_of_trivial_queues_is_a_noop() {
        let (mut alloc, guard) = ctx();
        let mut empty = build(&mut alloc, &[]);
        empty.reverse(&guard).unwrap();
        assert!(empty.is_empty());
        let mut one = build(&mut alloc, &["solo"]);
        one.reverse(&guard).unwrap();
        assert_eq!(snapshot(&one), ["solo"]);
    }

    #[test]
    fn sort_orders_bytewise_ascending() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["pear", "apple", "fig", "banana", "date"]);
        q.sort(&guard).unwrap();
        assert_eq!(snapshot(&q), ["apple", "banana", "date", "fig", "pear"]);
        assert!(q.is_circular(&guard).unwrap());
    }

    #[test]
    fn sort_is_idempotent() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["c", "a", "b"]);
        q.sort(&guard).unwrap();
        let once = snapshot(&q);
        q.sort(&guard).unwrap();
        assert_eq!(snapshot(&q), once);
    }

    #[test]
    fn sort_preserves_relative_order_of_equal_keys() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["b", "a", "b"]);
        let ids: Vec<NodeId> = q.chain.iter(q.sentinel).collect();
        // ids[0] and ids[2] both carry "b"; after sorting, their relative
        // order must be unchanged.
        q.sort(&guard).unwrap();
        let sorted_ids: Vec<NodeId> = q.chain.iter(q.sentinel).collect();
        assert_eq!(snapshot(&q), ["a", "b", "b"]);
        assert_eq!(sorted_ids, vec![ids[1], ids[0], ids[2]]);
    }

    #[test]
    fn sort_handles_sizes_around_the_run_width() {
        let (mut alloc, guard) = ctx();
        for n in 0..9usize {
            let texts: Vec<String> = (0..n).rev().map(|i| format!("k{i}")).collect();
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let mut q = build(&mut alloc, &refs);
            q.sort(&guard).unwrap();
            let mut expect = texts.clone();
            expect.sort();
            assert_eq!(snapshot(&q), expect);
            assert!(q.is_circular(&guard).unwrap());
            assert_eq!(q.size(&guard).unwrap(), n);
            q.free(&mut alloc, &guard).unwrap();
        }
        assert_eq!(alloc.outstanding_count(), 0);
    }

    #[test]
    fn shuffle_is_a_payload_permutation() {
        use rand::SeedableRng;
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["a", "b", "c", "d", "e"]);
        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(9);
        q.shuffle(&mut rng, &guard).unwrap();
        let mut after = snapshot(&q);
        after.sort();
        assert_eq!(after, ["a", "b", "c", "d", "e"]);
        assert_eq!(q.size(&guard).unwrap(), 5);
        assert!(q.is_circular(&guard).unwrap());
    }

    #[test]
    fn shuffle_with_same_seed_is_reproducible() {
        use rand::SeedableRng;
        let (mut alloc, guard) = ctx();
        let mut a = build(&mut alloc, &["a", "b", "c", "d", "e", "f"]);
        let mut b = build(&mut alloc, &["a", "b", "c", "d", "e", "f"]);
        let mut rng_a = rand_chacha::ChaCha20Rng::seed_from_u64(42);
        let mut rng_b = rand_chacha::ChaCha20Rng::seed_from_u64(42);
        a.shuffle(&mut rng_a, &guard).unwrap();
        b.shuffle(&mut rng_b, &guard).unwrap();
        assert_eq!(snapshot(&a), snapshot(&b));
    }

    #[test]
    fn is_circular_holds_for_engine_built_queues() {
        let (mut alloc, guard) = ctx();
        let q = build(&mut alloc, &[]);
        assert!(q.is_circular(&guard).unwrap());
        let q2 = build(&mut alloc, &["a", "b", "c"]);
        assert!(q2.is_circular(&guard).unwrap());
    }

    #[test]
    fn is_circular_reports_a_severed_forward_link() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["a", "b", "c"]);
        let second = q.chain.next(q.chain.next(q.sentinel));
        // Sever the ring: the second node now points at itself.
        q.chain.set_next(second, second);
        assert!(!q.is_circular(&guard).unwrap());
    }

    #[test]
    fn is_circular_reports_a_backward_link_mismatch() {
        let (mut alloc, guard) = ctx();
        let mut q = build(&mut alloc, &["a", "b", "c"]);
        let first = q.chain.next(q.sentinel);
        q.chain.set_prev(first, first);
        assert!(!q.is_circular(&guard).unwrap());
    }

    #[test]
    fn guarded_operation_unwinds_on_interrupt() {
        let (mut alloc, mut guard) = ctx();
        let mut q = build(&mut alloc, &["a", "b", "c", "d"]);
        guard.arm(std::time::Duration::from_secs(30)).unwrap();
        guard.interrupt("stop the walk").unwrap();
        let err = q.sort(&guard).unwrap_err();
        assert_eq!(err, Trap::Interrupted("stop the walk".to_string()));
        guard.disarm();
        // The queue survives for a retry once the checkpoint is cleared.
        q.sort(&guard).unwrap();
        assert_eq!(snapshot(&q), ["a", "b", "c", "d"]);
    }

    #[test]
    fn copy_payload_handles_empty_buffer() {
        let mut buf: [u8; 0] = [];
        copy_payload("anything", &mut buf);
    }
}
