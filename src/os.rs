//! Thin aliases over the concurrency and collection primitives used throughout the crate.
//!
//! Centralizing these here (rather than spelling out `spin::Mutex` / `hashbrown::HashMap`
//! everywhere) keeps the rest of the crate free of a hard dependency on any one backend.

pub use spin::{Mutex, RwLock};
pub use std::collections::BTreeMap;
pub use std::sync::{Condvar, Mutex as CvarMutex};

pub type HashMap<K, V> = hashbrown::HashMap<K, V, ahash::RandomState>;
