//! Symbolic labels and locals.
//!
//! A symbolic handle is a placeholder that only means something to the assembler that
//! minted it. It records its owner, its roster index and the roster revision it was minted
//! in; a rewind bumps the revision, so handles allocated after a discarded checkpoint can
//! be told apart from handles that later reuse the same index.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use crate::metadata::handles::TypeHandle;

static NEXT_ASSEMBLER_ID: AtomicU32 = AtomicU32::new(1);

/// Identity of one assembler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssemblerId(u32);

impl AssemblerId {
    /// Mints an identity that no other assembler in this process has.
    pub(crate) fn next() -> Self {
        AssemblerId(NEXT_ASSEMBLER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw identity value.
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for AssemblerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A not-yet-resolved branch target.
///
/// Labels are allocated by an assembler, referenced by any number of branch instructions
/// and marked exactly once. Equality and hashing ignore the debug name.
#[derive(Debug, Clone)]
pub struct Label {
    owner: AssemblerId,
    revision: u32,
    index: u32,
    name: Option<Arc<str>>,
}

impl Label {
    pub(crate) fn new(owner: AssemblerId, revision: u32, index: u32, name: Option<&str>) -> Self {
        Label {
            owner,
            revision,
            index,
            name: name.map(Arc::from),
        }
    }

    /// The assembler that allocated this label.
    #[must_use]
    pub fn owner(&self) -> AssemblerId {
        self.owner
    }

    /// Position of the label in its assembler's roster.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Optional debug name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.revision == other.revision && self.index == other.index
    }
}

impl Eq for Label {}

impl Hash for Label {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner.hash(state);
        self.revision.hash(state);
        self.index.hash(state);
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => f.write_str(name),
            None => write!(f, "label_{}", self.index),
        }
    }
}

/// A storage slot in the method body being assembled.
///
/// The index is the declaration order and never changes. Two locals are equal only if
/// they share owner, index, type and pinned flag.
#[derive(Debug, Clone)]
pub struct Local {
    owner: AssemblerId,
    revision: u32,
    index: u32,
    ty: TypeHandle,
    pinned: bool,
    name: Option<Arc<str>>,
}

impl Local {
    pub(crate) fn new(
        owner: AssemblerId,
        revision: u32,
        index: u32,
        ty: TypeHandle,
        pinned: bool,
        name: Option<&str>,
    ) -> Self {
        Local {
            owner,
            revision,
            index,
            ty,
            pinned,
            name: name.map(Arc::from),
        }
    }

    /// The assembler that declared this local.
    #[must_use]
    pub fn owner(&self) -> AssemblerId {
        self.owner
    }

    /// Declaration index (0-based).
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The value type stored in the slot.
    #[must_use]
    pub fn ty(&self) -> &TypeHandle {
        &self.ty
    }

    /// Whether the slot pins its referent for the garbage collector.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Optional debug name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Same slot identity, ignoring type and pinned flag.
    pub(crate) fn same_slot(&self, other: &Local) -> bool {
        self.owner == other.owner && self.revision == other.revision && self.index == other.index
    }
}

impl PartialEq for Local {
    fn eq(&self, other: &Self) -> bool {
        self.same_slot(other) && self.ty == other.ty && self.pinned == other.pinned
    }
}

impl Eq for Local {}

impl Hash for Local {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner.hash(state);
        self.revision.hash(state);
        self.index.hash(state);
        self.ty.hash(state);
        self.pinned.hash(state);
    }
}

impl fmt::Display for Local {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => f.write_str(name),
            None => write!(f, "V_{}", self.index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::token::Token;

    #[test]
    fn test_ids_are_unique() {
        let a = AssemblerId::next();
        let b = AssemblerId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_label_identity_ignores_name() {
        let owner = AssemblerId::next();
        let a = Label::new(owner, 0, 3, Some("loop"));
        let b = Label::new(owner, 0, 3, None);
        let c = Label::new(owner, 1, 3, None);

        assert_eq!(a, b);
        assert_ne!(b, c);
        assert_eq!(a.to_string(), "loop");
        assert_eq!(b.to_string(), "label_3");
    }

    #[test]
    fn test_local_identity_includes_shape() {
        let owner = AssemblerId::next();
        let int32 = TypeHandle::new(Token::new(0x0100_0001), "int32");
        let string = TypeHandle::new(Token::new(0x0100_0002), "string");

        let a = Local::new(owner, 0, 0, int32.clone(), false, None);
        let b = Local::new(owner, 0, 0, int32.clone(), true, None);
        let c = Local::new(owner, 0, 0, string, false, Some("text"));

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(a.same_slot(&c));
        assert_eq!(a, Local::new(owner, 0, 0, int32, false, Some("named")));
        assert_eq!(a.to_string(), "V_0");
        assert_eq!(c.to_string(), "text");
    }
}
