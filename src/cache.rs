//! Explicit caches for generated helpers.
//!
//! Code generators that build the same helper repeatedly (an adapter trampoline for a given
//! callable shape, a boxing stub for a given type) keep the results in a [`HelperCache`]
//! handed to each builder session, rather than in process-wide state. The cache is a
//! concurrent map, so independent sessions on different threads can share one instance
//! while every session keeps its own assembler.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use cilemit::prelude::*;
//!
//! let int32 = TypeHandle::new(Token::new(0x0100_0001), "System.Int32");
//! let shape = CallableShape::new(Some(int32.clone()))
//!     .with_parameter(int32.clone())
//!     .with_parameter(int32);
//!
//! let cache: HelperCache<CallableShape, Arc<InstructionStream>> = HelperCache::new();
//! let body = cache.get_or_try_insert_with(shape.clone(), || {
//!     let mut asm = RecordingAssembler::new();
//!     asm.ldarg(0)?.ldarg(1)?.emit(OpCode::Add)?.ret()?;
//!     Ok(Arc::new(asm.finish()?))
//! })?;
//!
//! assert_eq!(body.end_offset(), 4);
//! assert!(Arc::ptr_eq(&body, &cache.get(&shape).unwrap()));
//! # Ok::<(), cilemit::Error>(())
//! ```

use std::{fmt, hash::Hash};

use dashmap::DashMap;
use log::debug;

use crate::{metadata::handles::TypeHandle, Result};

/// Structural description of a callable: receiver, parameter types and return type.
///
/// Two shapes are equal when they agree on all three, which makes this the natural key
/// for caching helpers that only depend on a signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CallableShape {
    has_this: bool,
    parameters: Vec<TypeHandle>,
    return_type: Option<TypeHandle>,
}

impl CallableShape {
    /// A static shape with no parameters returning `return_type` (`None` for `void`).
    #[must_use]
    pub fn new(return_type: Option<TypeHandle>) -> Self {
        CallableShape {
            has_this: false,
            parameters: Vec::new(),
            return_type,
        }
    }

    /// Appends a parameter.
    #[must_use]
    pub fn with_parameter(mut self, ty: TypeHandle) -> Self {
        self.parameters.push(ty);
        self
    }

    /// Marks the shape as taking an implicit `this` argument.
    #[must_use]
    pub fn with_this(mut self) -> Self {
        self.has_this = true;
        self
    }

    /// Whether argument 0 is the receiver.
    #[must_use]
    pub fn has_this(&self) -> bool {
        self.has_this
    }

    /// Declared parameters, excluding `this`.
    #[must_use]
    pub fn parameters(&self) -> &[TypeHandle] {
        &self.parameters
    }

    /// Return type, `None` for `void`.
    #[must_use]
    pub fn return_type(&self) -> Option<&TypeHandle> {
        self.return_type.as_ref()
    }

    /// Number of argument slots, including `this`.
    #[must_use]
    pub fn argument_count(&self) -> usize {
        self.parameters.len() + usize::from(self.has_this)
    }
}

impl fmt::Display for CallableShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_this {
            f.write_str("instance ")?;
        }
        match &self.return_type {
            Some(ty) => write!(f, "{ty}")?,
            None => f.write_str("void")?,
        }
        f.write_str(" (")?;
        for (i, parameter) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{parameter}")?;
        }
        f.write_str(")")
    }
}

/// A concurrent map from a structural key to a generated helper.
///
/// Values are cloned out on lookup, so `V` is usually an `Arc` around the real artifact.
/// All methods take `&self`; wrap the cache in an `Arc` to share it between threads.
#[derive(Debug)]
pub struct HelperCache<K: Eq + Hash, V> {
    entries: DashMap<K, V>,
}

impl<K: Eq + Hash, V: Clone> Default for HelperCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V: Clone> HelperCache<K, V> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        HelperCache {
            entries: DashMap::new(),
        }
    }

    /// Returns a clone of the cached value for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Stores `value`, returning the value previously cached under `key`.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    /// Returns the cached value for `key`, building and storing it on a miss.
    ///
    /// `build` runs without any lock held, so it may itself use the cache. When two
    /// sessions miss on the same key at once both build, and the first value stored is
    /// the one every caller gets back.
    ///
    /// # Errors
    ///
    /// Returns whatever `build` returns; nothing is cached in that case.
    pub fn get_or_try_insert_with<F>(&self, key: K, build: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = build()?;
        let stored = self.entries.entry(key).or_insert(value).value().clone();
        debug!("helper cache miss, {} entries", self.entries.len());
        Ok(stored)
    }

    /// Removes and returns the value cached under `key`.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    /// True if `key` has a cached value.
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of cached helpers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every cached helper.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::{metadata::token::Token, Error};

    fn ty(row: u32, name: &str) -> TypeHandle {
        TypeHandle::new(Token::from_parts(Token::TABLE_TYPE_REF, row), name)
    }

    #[test]
    fn test_shape_identity_and_display() {
        let a = CallableShape::new(None)
            .with_this()
            .with_parameter(ty(1, "System.Int32"))
            .with_parameter(ty(2, "System.String"));
        let b = CallableShape::new(None)
            .with_this()
            .with_parameter(ty(1, "int"))
            .with_parameter(ty(2, "string"));
        let c = CallableShape::new(None).with_parameter(ty(1, "System.Int32"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.argument_count(), 3);
        assert_eq!(c.argument_count(), 1);
        assert_eq!(a.to_string(), "instance void (System.Int32, System.String)");
        assert_eq!(
            CallableShape::new(Some(ty(3, "System.Object"))).to_string(),
            "System.Object ()"
        );
    }

    #[test]
    fn test_builds_once() -> Result<()> {
        let cache: HelperCache<CallableShape, u32> = HelperCache::new();
        let builds = Cell::new(0);
        let shape = CallableShape::new(None);

        for _ in 0..3 {
            let value = cache.get_or_try_insert_with(shape.clone(), || {
                builds.set(builds.get() + 1);
                Ok(7)
            })?;
            assert_eq!(value, 7);
        }

        assert_eq!(builds.get(), 1);
        assert_eq!(cache.len(), 1);
        Ok(())
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let cache: HelperCache<&'static str, u32> = HelperCache::new();
        let result =
            cache.get_or_try_insert_with("shape", || Err(Error::Error("no sink".to_string())));

        assert!(result.is_err());
        assert!(cache.is_empty());
        assert!(!cache.contains_key(&"shape"));
    }

    #[test]
    fn test_insert_remove_clear() {
        let cache = HelperCache::new();
        assert_eq!(cache.insert(1, "a"), None);
        assert_eq!(cache.insert(1, "b"), Some("a"));
        cache.insert(2, "c");

        assert_eq!(cache.remove(&1), Some("b"));
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
