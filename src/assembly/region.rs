//! Exception region and lexical scope tracking.
//!
//! Regions nest, and handler bodies may open further regions, so the protocol state is a
//! stack of frames rather than a single current state. Each exception frame follows:
//!
//! ```text
//! (outside) --begin--> InTry --catch/filter/finally/fault--> handler --end--> (outside)
//!
//! InTry    -> InCatch, InFilter, InFinally, InFault
//! InCatch  -> InCatch, InFilter, InFinally, InFault, end
//! InFilter -> InCatch (untyped catch: the filter's handler), end
//! InFinally, InFault -> end
//! ```
//!
//! A catch without an exception type opens a catch-all handler, except directly after a
//! filter, where it starts the filter's own handler. A filter ended without one gets an
//! empty handler.
//!
//! [`RegionStack::check`] validates a transition without touching the stack, so callers
//! can validate, perform side effects, and only then [`RegionStack::apply`].

use std::fmt;

use crate::{assembly::Label, Error, Result};

/// Where the innermost exception region currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionState {
    /// Inside the protected block
    InTry,
    /// Inside a catch handler
    InCatch,
    /// Inside a filter expression, waiting for its handler
    InFilter,
    /// Inside a finally handler
    InFinally,
    /// Inside a fault handler
    InFault,
}

impl fmt::Display for RegionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RegionState::InTry => "try block",
            RegionState::InCatch => "catch block",
            RegionState::InFilter => "filter block",
            RegionState::InFinally => "finally block",
            RegionState::InFault => "fault block",
        };
        f.write_str(text)
    }
}

/// A region transition that can fail.
///
/// Opening a try block or a scope always succeeds and goes through
/// [`RegionStack::push_try`] and [`RegionStack::push_scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionCall {
    /// Begin a catch handler; `typed` is false for a catch-all or the handler of a filter
    Catch {
        /// Whether an exception type was supplied
        typed: bool,
    },
    /// Begin a filter block
    Filter,
    /// Begin a finally handler
    Finally,
    /// Begin a fault handler
    Fault,
    /// End the innermost exception region
    End,
    /// End the innermost lexical scope
    EndScope,
}

impl RegionCall {
    /// Name of the emitter operation performing this transition.
    #[must_use]
    pub fn operation(self) -> &'static str {
        match self {
            RegionCall::Catch { .. } => "begin_catch_block",
            RegionCall::Filter => "begin_except_filter_block",
            RegionCall::Finally => "begin_finally_block",
            RegionCall::Fault => "begin_fault_block",
            RegionCall::End => "end_exception_block",
            RegionCall::EndScope => "end_scope",
        }
    }
}

/// One open region.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionFrame {
    /// An exception region and its exit label
    Exception {
        /// Label resolved when the region ends
        exit: Label,
        /// Current protocol state
        state: RegionState,
        /// Number of handler blocks opened so far
        handlers: u32,
    },
    /// A lexical scope
    Scope,
}

/// Stack of open exception regions and scopes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionStack {
    frames: Vec<RegionFrame>,
}

impl RegionStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when every opened region and scope has been closed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Number of open frames.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Open frames, outermost first.
    #[must_use]
    pub fn frames(&self) -> &[RegionFrame] {
        &self.frames
    }

    /// State of the innermost frame if it is an exception region.
    #[must_use]
    pub fn current_state(&self) -> Option<RegionState> {
        match self.frames.last() {
            Some(RegionFrame::Exception { state, .. }) => Some(*state),
            _ => None,
        }
    }

    /// Exit label of the innermost frame if it is an exception region.
    #[must_use]
    pub fn innermost_exit(&self) -> Option<&Label> {
        match self.frames.last() {
            Some(RegionFrame::Exception { exit, .. }) => Some(exit),
            _ => None,
        }
    }

    /// Opens an exception region whose exit is `exit`.
    pub fn push_try(&mut self, exit: Label) {
        self.frames.push(RegionFrame::Exception {
            exit,
            state: RegionState::InTry,
            handlers: 0,
        });
    }

    /// Opens a lexical scope.
    pub fn push_scope(&mut self) {
        self.frames.push(RegionFrame::Scope);
    }

    /// Validates `call` against the innermost frame without changing anything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegionViolation`] if the transition is not allowed.
    pub fn check(&self, call: RegionCall) -> Result<()> {
        let operation = call.operation();
        let violation = |message: String| Error::RegionViolation { operation, message };

        let state = match (call, self.frames.last()) {
            (RegionCall::EndScope, Some(RegionFrame::Scope)) => return Ok(()),
            (RegionCall::EndScope, Some(RegionFrame::Exception { state, .. })) => {
                return Err(violation(format!(
                    "innermost region is an open {state}, not a scope"
                )))
            }
            (_, None) => return Err(violation("no region is open".to_string())),
            (_, Some(RegionFrame::Scope)) => {
                return Err(violation(
                    "innermost region is a lexical scope that must end first".to_string(),
                ))
            }
            (_, Some(RegionFrame::Exception { state, .. })) => *state,
        };

        let allowed = match call {
            RegionCall::Catch { typed: false } => {
                !matches!(state, RegionState::InFinally | RegionState::InFault)
            }
            RegionCall::Catch { typed: true }
            | RegionCall::Filter
            | RegionCall::Finally
            | RegionCall::Fault => matches!(state, RegionState::InTry | RegionState::InCatch),
            RegionCall::End => state != RegionState::InTry,
            RegionCall::EndScope => false,
        };

        if allowed {
            return Ok(());
        }

        let message = match (call, state) {
            (RegionCall::Catch { typed: true }, RegionState::InFilter) => {
                "the handler of a filter block must not name an exception type".to_string()
            }
            (RegionCall::End, RegionState::InTry) => {
                "the region has no handler, finally or fault block".to_string()
            }
            _ => format!("not allowed in a {state}"),
        };
        Err(violation(message))
    }

    /// Validates and performs `call`.
    ///
    /// Returns the exit label when `call` closes an exception region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegionViolation`] if the transition is not allowed; the stack is
    /// unchanged in that case.
    pub fn apply(&mut self, call: RegionCall) -> Result<Option<Label>> {
        self.check(call)?;

        match call {
            RegionCall::End | RegionCall::EndScope => {
                Ok(match self.frames.pop() {
                    Some(RegionFrame::Exception { exit, .. }) => Some(exit),
                    _ => None,
                })
            }
            _ => {
                if let Some(RegionFrame::Exception {
                    state, handlers, ..
                }) = self.frames.last_mut()
                {
                    // the filter and its handler count as one clause
                    let filter_handler = *state == RegionState::InFilter;
                    *state = match call {
                        RegionCall::Filter => RegionState::InFilter,
                        RegionCall::Finally => RegionState::InFinally,
                        RegionCall::Fault => RegionState::InFault,
                        _ => RegionState::InCatch,
                    };
                    if !filter_handler {
                        *handlers += 1;
                    }
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::RecordingAssembler;

    fn stack_with_try() -> RegionStack {
        let mut asm = RecordingAssembler::new();
        let mut stack = RegionStack::new();
        stack.push_try(asm.define_label());
        stack
    }

    #[test]
    fn test_try_finally_end() -> Result<()> {
        let mut stack = stack_with_try();
        stack.apply(RegionCall::Finally)?;
        assert_eq!(stack.current_state(), Some(RegionState::InFinally));
        assert!(stack.apply(RegionCall::End)?.is_some());
        assert!(stack.is_empty());
        Ok(())
    }

    #[test]
    fn test_end_without_handler_fails() {
        let mut stack = stack_with_try();
        let result = stack.apply(RegionCall::End);
        assert!(matches!(
            result,
            Err(Error::RegionViolation {
                operation: "end_exception_block",
                ..
            })
        ));
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_end_on_empty_stack_fails() {
        let mut stack = RegionStack::new();
        assert!(stack.apply(RegionCall::End).is_err());
        assert!(stack.apply(RegionCall::EndScope).is_err());
    }

    #[test]
    fn test_filter_handler_is_untyped() -> Result<()> {
        let mut stack = stack_with_try();
        stack.apply(RegionCall::Filter)?;
        assert!(stack.check(RegionCall::Catch { typed: true }).is_err());
        assert!(stack.check(RegionCall::Finally).is_err());

        stack.apply(RegionCall::Catch { typed: false })?;
        assert_eq!(stack.current_state(), Some(RegionState::InCatch));
        assert!(matches!(
            stack.frames().last(),
            Some(RegionFrame::Exception { handlers: 1, .. })
        ));
        stack.apply(RegionCall::End)?;
        Ok(())
    }

    #[test]
    fn test_filter_can_end_region() -> Result<()> {
        let mut stack = stack_with_try();
        stack.apply(RegionCall::Filter)?;
        assert!(stack.apply(RegionCall::End)?.is_some());
        assert!(stack.is_empty());
        Ok(())
    }

    #[test]
    fn test_untyped_catch_from_try() -> Result<()> {
        let mut stack = stack_with_try();
        stack.apply(RegionCall::Catch { typed: false })?;
        stack.apply(RegionCall::Catch { typed: false })?;
        assert!(matches!(
            stack.frames().last(),
            Some(RegionFrame::Exception { handlers: 2, .. })
        ));
        stack.apply(RegionCall::Finally)?;
        assert!(stack.check(RegionCall::Catch { typed: false }).is_err());
        stack.apply(RegionCall::End)?;
        Ok(())
    }

    #[test]
    fn test_catch_then_finally() -> Result<()> {
        let mut stack = stack_with_try();
        stack.apply(RegionCall::Catch { typed: true })?;
        stack.apply(RegionCall::Catch { typed: true })?;
        stack.apply(RegionCall::Finally)?;
        assert!(matches!(
            stack.frames().last(),
            Some(RegionFrame::Exception { handlers: 3, .. })
        ));
        assert!(stack.check(RegionCall::Catch { typed: true }).is_err());
        stack.apply(RegionCall::End)?;
        Ok(())
    }

    #[test]
    fn test_scope_must_close_first() -> Result<()> {
        let mut stack = stack_with_try();
        stack.push_scope();
        assert!(stack.check(RegionCall::Finally).is_err());
        stack.apply(RegionCall::EndScope)?;
        assert!(stack.check(RegionCall::EndScope).is_err());
        stack.apply(RegionCall::Fault)?;
        stack.apply(RegionCall::End)?;
        assert!(stack.is_empty());
        Ok(())
    }

    #[test]
    fn test_nested_regions() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        let mut stack = RegionStack::new();
        let outer = asm.define_label();
        let inner = asm.define_label();

        stack.push_try(outer.clone());
        stack.apply(RegionCall::Catch { typed: true })?;
        stack.push_try(inner.clone());
        stack.apply(RegionCall::Finally)?;

        assert_eq!(stack.apply(RegionCall::End)?, Some(inner));
        assert!(!stack.is_empty());
        assert_eq!(stack.apply(RegionCall::End)?, Some(outer));
        assert!(stack.is_empty());
        Ok(())
    }
}
