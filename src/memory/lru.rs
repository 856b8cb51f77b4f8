/*!
 * LRU Lists
 *
 * Per-zone active/inactive lists as doubly linked lists threaded through an
 * arena indexed by frame number within the zone. No page holds a pointer into
 * a list: each arena slot records which list (if any) the frame is on, and
 * list operations are index splices.
 *
 * Orientation: new pages enter at the head; scanning takes from the tail, so
 * the tail is always the oldest page (FIFO aging).
 *
 * All mutation happens under the owning zone's lock.
 */

use super::page::Page;
use crate::core::limits::PAGEVEC_SIZE;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const NIL: u32 = u32::MAX;

/// Which LRU list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LruList {
    Inactive,
    Active,
}

impl LruList {
    #[inline]
    const fn index(self) -> usize {
        match self {
            LruList::Inactive => 0,
            LruList::Active => 1,
        }
    }
}

/// Where a frame currently sits with respect to the LRU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    /// Not tracked by reclaim (free, or never handed over)
    Off,
    /// Linked on a list
    Listed(LruList),
    /// Privately held by a scan batch
    Isolated,
    /// Parked until writeback completes
    Writeback,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: u32,
    next: u32,
    membership: Membership,
}

impl Link {
    const fn off() -> Self {
        Self {
            prev: NIL,
            next: NIL,
            membership: Membership::Off,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ListHead {
    head: u32,
    tail: u32,
    len: usize,
}

impl ListHead {
    const fn empty() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }
}

/// Active and inactive lists of one zone
#[derive(Debug)]
pub struct LruLists {
    links: Vec<Link>,
    heads: [ListHead; 2],
}

impl LruLists {
    pub fn new(frames: usize) -> Self {
        assert!(frames < NIL as usize, "zone too large for u32 frame indices");
        Self {
            links: vec![Link::off(); frames],
            heads: [ListHead::empty(); 2],
        }
    }

    pub fn frames(&self) -> usize {
        self.links.len()
    }

    #[inline]
    pub fn len(&self, list: LruList) -> usize {
        self.heads[list.index()].len
    }

    pub fn is_empty(&self, list: LruList) -> bool {
        self.len(list) == 0
    }

    #[inline]
    pub fn membership(&self, idx: usize) -> Membership {
        self.links[idx].membership
    }

    /// Change the state of a frame that is not linked on a list
    pub fn set_membership(&mut self, idx: usize, membership: Membership) {
        let link = &mut self.links[idx];
        assert!(
            !matches!(link.membership, Membership::Listed(_)),
            "frame {} is still linked on {:?}",
            idx,
            link.membership
        );
        assert!(
            !matches!(membership, Membership::Listed(_)),
            "use push_head/push_tail to link frame {}",
            idx
        );
        link.membership = membership;
    }

    /// Link a frame at the head (most recent end) of `list`
    pub fn push_head(&mut self, list: LruList, idx: usize) {
        self.assert_unlinked(idx);
        let i = idx as u32;
        let head = &mut self.heads[list.index()];
        let old_head = head.head;

        self.links[idx] = Link {
            prev: NIL,
            next: old_head,
            membership: Membership::Listed(list),
        };
        if old_head == NIL {
            head.tail = i;
        } else {
            self.links[old_head as usize].prev = i;
        }
        head.head = i;
        head.len += 1;
    }

    /// Link a frame at the tail (next to be scanned) of `list`
    pub fn push_tail(&mut self, list: LruList, idx: usize) {
        self.assert_unlinked(idx);
        let i = idx as u32;
        let head = &mut self.heads[list.index()];
        let old_tail = head.tail;

        self.links[idx] = Link {
            prev: old_tail,
            next: NIL,
            membership: Membership::Listed(list),
        };
        if old_tail == NIL {
            head.head = i;
        } else {
            self.links[old_tail as usize].next = i;
        }
        head.tail = i;
        head.len += 1;
    }

    /// Unlink a frame from whichever list it is on; it becomes `Off`
    pub fn unlink(&mut self, idx: usize) -> Option<LruList> {
        let link = self.links[idx];
        let list = match link.membership {
            Membership::Listed(list) => list,
            _ => return None,
        };

        let head = &mut self.heads[list.index()];
        if link.prev == NIL {
            head.head = link.next;
        } else {
            self.links[link.prev as usize].next = link.next;
        }
        if link.next == NIL {
            head.tail = link.prev;
        } else {
            self.links[link.next as usize].prev = link.prev;
        }
        head.len = head
            .len
            .checked_sub(1)
            .unwrap_or_else(|| panic!("{:?} list count underflow", list));

        self.links[idx] = Link::off();
        Some(list)
    }

    /// Detach up to `n` frames from the tail of `list`, oldest first.
    /// The frames are marked `Isolated`.
    pub fn isolate_tail(&mut self, list: LruList, n: usize) -> Vec<usize> {
        let mut taken = Vec::with_capacity(n.min(self.len(list)));
        while taken.len() < n {
            let tail = self.heads[list.index()].tail;
            if tail == NIL {
                break;
            }
            let idx = tail as usize;
            self.unlink(idx);
            self.links[idx].membership = Membership::Isolated;
            taken.push(idx);
        }
        taken
    }

    /// Frames of `list` from head (newest) to tail (oldest)
    pub fn iter(&self, list: LruList) -> LruIter<'_> {
        LruIter {
            lists: self,
            cursor: self.heads[list.index()].head,
        }
    }

    /// Walk both lists and check links, membership and counts
    pub fn verify(&self) -> Result<(), String> {
        for list in [LruList::Inactive, LruList::Active] {
            let mut count = 0usize;
            let mut prev = NIL;
            let mut cursor = self.heads[list.index()].head;
            while cursor != NIL {
                let link = &self.links[cursor as usize];
                if link.membership != Membership::Listed(list) {
                    return Err(format!(
                        "frame {} on {:?} list has membership {:?}",
                        cursor, list, link.membership
                    ));
                }
                if link.prev != prev {
                    return Err(format!("frame {} has a broken prev link", cursor));
                }
                count += 1;
                if count > self.links.len() {
                    return Err(format!("cycle in {:?} list", list));
                }
                prev = cursor;
                cursor = link.next;
            }
            if prev != self.heads[list.index()].tail {
                return Err(format!("{:?} tail does not match last frame", list));
            }
            if count != self.len(list) {
                return Err(format!(
                    "{:?} count {} but {} frames linked",
                    list,
                    self.len(list),
                    count
                ));
            }
        }

        let listed = self
            .links
            .iter()
            .filter(|l| matches!(l.membership, Membership::Listed(_)))
            .count();
        if listed != self.len(LruList::Inactive) + self.len(LruList::Active) {
            return Err("frames marked listed but not reachable from a list head".into());
        }
        Ok(())
    }

    /// Frames in a given non-listed state
    pub fn count_membership(&self, membership: Membership) -> usize {
        self.links
            .iter()
            .filter(|l| l.membership == membership)
            .count()
    }

    fn assert_unlinked(&self, idx: usize) {
        let membership = self.links[idx].membership;
        assert!(
            !matches!(membership, Membership::Listed(_)),
            "frame {} is already on the {:?} list",
            idx,
            membership
        );
    }
}

/// Iterator over one LRU list, head to tail
pub struct LruIter<'a> {
    lists: &'a LruLists,
    cursor: u32,
}

impl Iterator for LruIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.cursor == NIL {
            return None;
        }
        let idx = self.cursor as usize;
        self.cursor = self.lists.links[idx].next;
        Some(idx)
    }
}

/// Small batch of pages moved under a single lock acquisition
#[derive(Debug, Default)]
pub struct PageVec {
    pages: Vec<Arc<Page>>,
}

impl PageVec {
    pub fn new() -> Self {
        Self {
            pages: Vec::with_capacity(PAGEVEC_SIZE),
        }
    }

    /// Add a page; returns `true` when the vector is now full and should be flushed
    pub fn push(&mut self, page: Arc<Page>) -> bool {
        debug_assert!(!self.is_full(), "pagevec overflow");
        self.pages.push(page);
        self.is_full()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.pages.len() >= PAGEVEC_SIZE
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Page>> {
        self.pages.iter()
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, Arc<Page>> {
        self.pages.drain(..)
    }
}
