//! Opaque member descriptors accepted as instruction operands.
//!
//! Handles are produced by whatever member-search layer sits above the assembler.
//! The assembler never resolves or checks them; it stores them in the instruction
//! stream and hands them to the sink. Identity is the metadata [`Token`], the name is
//! only used when rendering a disassembly.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::metadata::token::Token;

macro_rules! member_handle {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            token: Token,
            name: Arc<str>,
        }

        impl $name {
            #[doc = concat!("Creates a ", $what, " handle from its token and display name.")]
            #[must_use]
            pub fn new(token: Token, name: impl Into<Arc<str>>) -> Self {
                Self {
                    token,
                    name: name.into(),
                }
            }

            #[doc = concat!("Returns the metadata token of the ", $what, ".")]
            #[must_use]
            pub fn token(&self) -> Token {
                self.token
            }

            #[doc = concat!("Returns the display name of the ", $what, ".")]
            #[must_use]
            pub fn name(&self) -> &str {
                &self.name
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.token == other.token
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.token.hash(state);
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}, {})", stringify!($name), self.name, self.token)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.name)
            }
        }
    };
}

member_handle!(
    /// A resolved field (`ldfld`, `stsfld`, `ldflda`, ...).
    FieldHandle,
    "field"
);

member_handle!(
    /// A resolved method (`call`, `callvirt`, `ldftn`, ...).
    MethodHandle,
    "method"
);

member_handle!(
    /// A resolved instance constructor (`newobj`, or `call` for base constructor chaining).
    ConstructorHandle,
    "constructor"
);

member_handle!(
    /// A resolved type (`box`, `castclass`, `newarr`, local variable types, catch clauses).
    TypeHandle,
    "type"
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_is_token() {
        let a = TypeHandle::new(Token::new(0x0100_0001), "System.Object");
        let b = TypeHandle::new(Token::new(0x0100_0001), "object");
        let c = TypeHandle::new(Token::new(0x0100_0002), "System.Object");

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_display_uses_name() {
        let method = MethodHandle::new(Token::new(0x0A00_0003), "System.Console::WriteLine");
        assert_eq!(method.to_string(), "System.Console::WriteLine");
        assert_eq!(method.token().table(), Token::TABLE_MEMBER_REF);
        assert!(format!("{method:?}").contains("0x0a000003"));
    }
}
