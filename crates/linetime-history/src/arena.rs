//! Arena storage and the doubly-linked sequence built on top of it.
//!
//! Nodes live in an [`Arena`] and are addressed by small copyable keys.
//! A [`List`] threads a chain through arena nodes via their [`Links`], so
//! the same primitive orders the document's lines and each line's versions.
//! Insert/remove next to a known key is O(1).

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// Key type addressing one arena slot.
pub trait ArenaKey: Copy + Eq + Hash + fmt::Debug {
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

macro_rules! arena_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $crate::arena::ArenaKey for $name {
            fn from_index(index: usize) -> Self {
                Self(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}
pub(crate) use arena_key;

/// Slot storage. Removed slots are never reused, so a stale key can only
/// miss, never alias a newer node.
pub struct Arena<K, T> {
    slots: Vec<Option<T>>,
    _key: PhantomData<K>,
}

impl<K: ArenaKey, T> Arena<K, T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            _key: PhantomData,
        }
    }

    pub fn insert(&mut self, value: T) -> K {
        let key = K::from_index(self.slots.len());
        self.slots.push(Some(value));
        key
    }

    pub fn get(&self, key: K) -> Option<&T> {
        self.slots.get(key.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.slots.get_mut(key.index()).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, key: K) -> Option<T> {
        self.slots.get_mut(key.index()).and_then(Option::take)
    }
}

impl<K: ArenaKey, T> Default for Arena<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ArenaKey, T> Index<K> for Arena<K, T> {
    type Output = T;

    fn index(&self, key: K) -> &T {
        match self.get(key) {
            Some(value) => value,
            None => panic!("dangling arena key {key:?}"),
        }
    }
}

impl<K: ArenaKey, T> IndexMut<K> for Arena<K, T> {
    fn index_mut(&mut self, key: K) -> &mut T {
        match self.get_mut(key) {
            Some(value) => value,
            None => panic!("dangling arena key {key:?}"),
        }
    }
}

/// Neighbour pointers embedded in every listed node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Links<K> {
    pub prev: Option<K>,
    pub next: Option<K>,
}

impl<K> Default for Links<K> {
    fn default() -> Self {
        Self {
            prev: None,
            next: None,
        }
    }
}

/// A node that can be threaded into a [`List`].
pub trait Linked<K> {
    fn links(&self) -> &Links<K>;
    fn links_mut(&mut self) -> &mut Links<K>;
}

/// Ends and length of one chain through an arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct List<K> {
    head: Option<K>,
    tail: Option<K>,
    len: usize,
}

impl<K> Default for List<K> {
    fn default() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }
}

impl<K: ArenaKey> List<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first(&self) -> Option<K> {
        self.head
    }

    pub fn last(&self) -> Option<K> {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Splice `key` after `after`; `None` pushes to the front.
    pub fn insert_after<T: Linked<K>>(&mut self, arena: &mut Arena<K, T>, after: Option<K>, key: K) {
        let next = match after {
            Some(after) => arena[after].links().next,
            None => self.head,
        };
        {
            let links = arena[key].links_mut();
            links.prev = after;
            links.next = next;
        }
        match after {
            Some(after) => arena[after].links_mut().next = Some(key),
            None => self.head = Some(key),
        }
        match next {
            Some(next) => arena[next].links_mut().prev = Some(key),
            None => self.tail = Some(key),
        }
        self.len += 1;
    }

    /// Splice `key` before `before`; `None` pushes to the back.
    pub fn insert_before<T: Linked<K>>(&mut self, arena: &mut Arena<K, T>, before: Option<K>, key: K) {
        let after = match before {
            Some(before) => arena[before].links().prev,
            None => self.tail,
        };
        self.insert_after(arena, after, key);
    }

    pub fn push_back<T: Linked<K>>(&mut self, arena: &mut Arena<K, T>, key: K) {
        self.insert_after(arena, self.tail, key);
    }

    /// Detach `key` from the chain. The node itself stays in the arena.
    pub fn unlink<T: Linked<K>>(&mut self, arena: &mut Arena<K, T>, key: K) {
        let Links { prev, next } = *arena[key].links();
        match prev {
            Some(prev) => arena[prev].links_mut().next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => arena[next].links_mut().prev = prev,
            None => self.tail = prev,
        }
        *arena[key].links_mut() = Links::default();
        self.len -= 1;
    }

    pub fn iter<'a, T: Linked<K>>(&self, arena: &'a Arena<K, T>) -> Iter<'a, K, T> {
        Iter {
            arena,
            cursor: self.head,
            forward: true,
        }
    }

    pub fn iter_rev<'a, T: Linked<K>>(&self, arena: &'a Arena<K, T>) -> Iter<'a, K, T> {
        Iter {
            arena,
            cursor: self.tail,
            forward: false,
        }
    }
}

/// Walks a chain from one end, yielding keys.
pub struct Iter<'a, K, T> {
    arena: &'a Arena<K, T>,
    cursor: Option<K>,
    forward: bool,
}

impl<K: ArenaKey, T: Linked<K>> Iterator for Iter<'_, K, T> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        let key = self.cursor?;
        let links = self.arena.get(key)?.links();
        self.cursor = if self.forward { links.next } else { links.prev };
        Some(key)
    }
}
