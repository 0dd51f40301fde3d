use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Key a value is stored under in a [Context].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Key {
    Type(TypeId),
    Overrides(u64),
}

struct Node {
    parent: Context,
    key: Key,
    value: Arc<dyn Any + Send + Sync>,
}

/// Context is the request-scoped value carrier passed to flag evaluations, strategies, tracers
/// and branch functions.
///
/// A Context is immutable. Deriving a child with [Context::with_value] never changes the parent,
/// so a single parent can be shared by any number of concurrent requests, each attaching its own
/// values (including flag overrides, see [crate::Registry::with_values]). Cloning is cheap.
///
/// Lookups walk from the most recently attached value towards the root, so a child shadows any
/// value of the same type attached by an ancestor.
#[derive(Clone, Default)]
pub struct Context {
    node: Option<Arc<Node>>,
}

impl Context {
    /// Returns an empty context.
    pub fn background() -> Self {
        Self::default()
    }

    /// Returns a new context derived from this one that carries `value`.
    ///
    /// Values are keyed by their type; use a newtype to store several values of the same
    /// underlying type.
    pub fn with_value<T>(&self, value: T) -> Context
    where
        T: Any + Send + Sync,
    {
        self.derive(Key::Type(TypeId::of::<T>()), Arc::new(value))
    }

    /// Returns the closest value of type `T` attached to this context or any of its ancestors.
    pub fn value<T>(&self) -> Option<&T>
    where
        T: Any + Send + Sync,
    {
        self.lookup(Key::Type(TypeId::of::<T>()))
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub(crate) fn derive(&self, key: Key, value: Arc<dyn Any + Send + Sync>) -> Context {
        Context {
            node: Some(Arc::new(Node {
                parent: self.clone(),
                key,
                value,
            })),
        }
    }

    pub(crate) fn lookup(&self, key: Key) -> Option<&(dyn Any + Send + Sync)> {
        let mut current = self.node.as_deref();
        while let Some(node) = current {
            if node.key == key {
                return Some(node.value.as_ref());
            }
            current = node.parent.node.as_deref();
        }
        None
    }

    /// Returns true if no values are attached to this context.
    pub fn is_background(&self) -> bool {
        self.node.is_none()
    }

    fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.node.as_deref();
        while let Some(node) = current {
            depth += 1;
            current = node.parent.node.as_deref();
        }
        depth
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("values", &self.depth())
            .finish()
    }
}

impl Drop for Node {
    // Unlink long chains iteratively so dropping a deep context cannot overflow the stack.
    fn drop(&mut self) {
        let mut next = self.parent.node.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut node) => next = node.parent.node.take(),
                Err(_) => break,
            }
        }
    }
}
