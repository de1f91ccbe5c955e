//! Key and value policies.
//!
//! A policy decides how keys are hashed and compared, and how keys and values
//! are copied in, released, and displayed. The same [`Map`](super::Map) is a
//! pointer-identity table with [`PtrKey`] and a string table with [`StrKey`].

use std::fmt;
use std::marker::PhantomData;

use super::hash::{sip_hash, MapSeed};

/// Policy for map keys.
pub trait KeyOps {
    /// The borrowed form callers look keys up with.
    type Key: ?Sized;
    /// The owned form stored in a slot.
    type Stored;

    fn hash(key: &Self::Key, seed: MapSeed) -> u64;

    fn eq(stored: &Self::Stored, key: &Self::Key) -> bool;

    /// Make the owned copy kept by the map.
    fn copy(key: &Self::Key) -> Self::Stored;

    fn borrow(stored: &Self::Stored) -> &Self::Key;

    /// Dispose of a key the map no longer holds.
    fn release(stored: Self::Stored) {
        drop(stored);
    }

    fn display(key: &Self::Key, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

/// Policy for map values.
pub trait ValueOps {
    type Value: ?Sized;
    type Stored;

    fn copy(value: &Self::Value) -> Self::Stored;

    fn borrow(stored: &Self::Stored) -> &Self::Value;

    fn release(stored: Self::Stored) {
        drop(stored);
    }

    fn display(value: &Self::Value, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

/// Pointer-identity keys: compares addresses, hashes the address bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PtrKey;

impl KeyOps for PtrKey {
    type Key = usize;
    type Stored = usize;

    fn hash(key: &usize, seed: MapSeed) -> u64 {
        sip_hash(&key.to_ne_bytes(), seed)
    }

    fn eq(stored: &usize, key: &usize) -> bool {
        stored == key
    }

    fn copy(key: &usize) -> usize {
        *key
    }

    fn borrow(stored: &usize) -> &usize {
        stored
    }

    fn display(key: &usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", key)
    }
}

/// String keys: compares and hashes content, stores a duplicate.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrKey;

impl KeyOps for StrKey {
    type Key = str;
    type Stored = Box<str>;

    fn hash(key: &str, seed: MapSeed) -> u64 {
        sip_hash(key.as_bytes(), seed)
    }

    fn eq(stored: &Box<str>, key: &str) -> bool {
        &**stored == key
    }

    fn copy(key: &str) -> Box<str> {
        key.into()
    }

    fn borrow(stored: &Box<str>) -> &str {
        stored
    }

    fn display(key: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(key)
    }
}

/// Values copied in with `Clone` and shown with `Debug`.
pub struct CloneValue<T>(PhantomData<fn() -> T>);

impl<T: Clone + fmt::Debug> ValueOps for CloneValue<T> {
    type Value = T;
    type Stored = T;

    fn copy(value: &T) -> T {
        value.clone()
    }

    fn borrow(stored: &T) -> &T {
        stored
    }

    fn display(value: &T, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", value)
    }
}

/// String values stored as a duplicate.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrValue;

impl ValueOps for StrValue {
    type Value = str;
    type Stored = Box<str>;

    fn copy(value: &str) -> Box<str> {
        value.into()
    }

    fn borrow(stored: &Box<str>) -> &str {
        stored
    }

    fn display(value: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(value)
    }
}

/// Formats a key through its policy's `display`.
pub struct KeyDisplay<'a, K: KeyOps + ?Sized>(pub &'a K::Key);

impl<K: KeyOps + ?Sized> fmt::Display for KeyDisplay<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        K::display(self.0, f)
    }
}

/// Formats a value through its policy's `display`.
pub struct ValueDisplay<'a, V: ValueOps + ?Sized>(pub &'a V::Value);

impl<V: ValueOps + ?Sized> fmt::Display for ValueDisplay<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        V::display(self.0, f)
    }
}
