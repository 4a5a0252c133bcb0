//! A map of dense integer key to value, used as the arena for graph nodes
//! and edges.

use std::marker::PhantomData;

pub trait Index: From<usize> {
    fn index(&self) -> usize;
}

/// Declare a `Copy` id type usable as a DenseMap key.
macro_rules! dense_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(u32);
        impl $crate::densemap::Index for $name {
            fn index(&self) -> usize {
                self.0 as usize
            }
        }
        impl From<usize> for $name {
            fn from(u: usize) -> $name {
                $name(u as u32)
            }
        }
    };
}
pub(crate) use dense_id;

/// A map of a dense integer key to value, implemented as a vector.
/// Keys are handed out by push() and never invalidated.
pub struct DenseMap<K, V> {
    vec: Vec<V>,
    key_type: PhantomData<K>,
}

impl<K, V> Default for DenseMap<K, V> {
    fn default() -> Self {
        DenseMap {
            vec: Vec::default(),
            key_type: PhantomData,
        }
    }
}

impl<K: Index, V> std::ops::Index<K> for DenseMap<K, V> {
    type Output = V;

    fn index(&self, k: K) -> &Self::Output {
        &self.vec[k.index()]
    }
}

impl<K: Index, V> std::ops::IndexMut<K> for DenseMap<K, V> {
    fn index_mut(&mut self, k: K) -> &mut Self::Output {
        &mut self.vec[k.index()]
    }
}

impl<K: Index, V> DenseMap<K, V> {
    pub fn next_id(&self) -> K {
        K::from(self.vec.len())
    }

    pub fn push(&mut self, val: V) -> K {
        let id = self.next_id();
        self.vec.push(val);
        id
    }

    pub fn len(&self) -> usize {
        self.vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vec.is_empty()
    }

    pub fn all_ids(&self) -> impl Iterator<Item = K> {
        (0..self.vec.len()).map(K::from)
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.vec.iter().enumerate().map(|(i, v)| (K::from(i), v))
    }

    pub fn values_mut(&mut self) -> std::slice::IterMut<V> {
        self.vec.iter_mut()
    }
}
