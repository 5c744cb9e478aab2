//! Immutable, copy-on-write evaluation contexts.
//!
//! A [`Context`] is a stack of small overlay frames, each mapping names to
//! values. Extending a context never touches the parent: [`Context::with_variable`]
//! allocates one new frame that points at the existing chain, so overlays are
//! cheap and the caller's context stays valid.
//!
//! Two contexts are equal iff their flattened variable sets are equal. The
//! [`Context::hash`] fingerprint is a function of that flattened set only, so
//! the order in which variables were layered does not matter.
//!
//! # Current context
//!
//! Each thread has a current context, managed by [`ContextScope`] guards that
//! are entered and dropped in strict LIFO order:
//!
//! ```
//! use plexus_core::context::{Context, ContextScope};
//!
//! let base = Context::new().with_variable("frame", 10);
//! {
//!     let _scope = ContextScope::enter(base.clone());
//!     let _inner = ContextScope::with_variable("frame", 20);
//!     assert_eq!(Context::current().frame(), Some(20.0));
//! }
//! assert!(Context::current().is_empty());
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use smallvec::SmallVec;

use crate::hash::{Fingerprint, FingerprintHasher};
use crate::value::Value;

/// Name of the variable conventionally holding the current frame number.
pub const FRAME: &str = "frame";

/// One overlay frame. `None` masks the name in everything below.
#[derive(Debug)]
struct Frame {
    parent: Option<Arc<Frame>>,
    entries: SmallVec<[(Arc<str>, Option<Value>); 2]>,
    hash: OnceLock<Fingerprint>,
}

/// An immutable named-variable environment parameterizing one evaluation.
#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Frame>>,
}

static EMPTY_HASH: OnceLock<Fingerprint> = OnceLock::new();

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Context { head: None }
    }

    /// Returns a new context with `name` bound to `value`, shadowing any
    /// binding of the same name in `self`.
    pub fn with_variable(&self, name: &str, value: impl Into<Value>) -> Context {
        self.push_frame(SmallVec::from_elem((Arc::from(name), Some(value.into())), 1))
    }

    /// Returns a new context with several bindings layered in one frame.
    pub fn with_variables<I, N, V>(&self, vars: I) -> Context
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<Value>,
    {
        let entries: SmallVec<[(Arc<str>, Option<Value>); 2]> = vars
            .into_iter()
            .map(|(n, v)| (Arc::from(n.as_ref()), Some(v.into())))
            .collect();
        if entries.is_empty() {
            return self.clone();
        }
        self.push_frame(entries)
    }

    /// Returns a new context in which `name` is absent.
    pub fn without_variable(&self, name: &str) -> Context {
        if !self.contains(name) {
            return self.clone();
        }
        self.push_frame(SmallVec::from_elem((Arc::from(name), None), 1))
    }

    fn push_frame(&self, entries: SmallVec<[(Arc<str>, Option<Value>); 2]>) -> Context {
        Context {
            head: Some(Arc::new(Frame {
                parent: self.head.clone(),
                entries,
                hash: OnceLock::new(),
            })),
        }
    }

    /// Looks up a variable. Undeclared names are `None`, never an error.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let mut frame = self.head.as_deref();
        while let Some(f) = frame {
            // Later entries in a frame win over earlier ones.
            if let Some((_, v)) = f.entries.iter().rev().find(|(n, _)| &**n == name) {
                return v.as_ref();
            }
            frame = f.parent.as_deref();
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// The `"frame"` variable as a float, if bound to a number.
    pub fn frame(&self) -> Option<f64> {
        self.get(FRAME).and_then(Value::as_float)
    }

    /// Flattened view of all visible variables, sorted by name.
    pub fn variables(&self) -> BTreeMap<Arc<str>, Value> {
        let mut seen: BTreeMap<Arc<str>, Option<Value>> = BTreeMap::new();
        let mut frame = self.head.as_deref();
        while let Some(f) = frame {
            for (name, value) in f.entries.iter().rev() {
                seen.entry(name.clone()).or_insert_with(|| value.clone());
            }
            frame = f.parent.as_deref();
        }
        seen.into_iter()
            .filter_map(|(n, v)| v.map(|v| (n, v)))
            .collect()
    }

    /// Names of all visible variables, sorted.
    pub fn names(&self) -> Vec<Arc<str>> {
        self.variables().into_keys().collect()
    }

    pub fn len(&self) -> usize {
        self.variables().len()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none() || self.len() == 0
    }

    /// Fingerprint of the flattened variable set.
    ///
    /// Memoized on the head frame, so repeated calls on the same context (or
    /// clones of it) hash once.
    pub fn hash(&self) -> Fingerprint {
        match &self.head {
            None => *EMPTY_HASH.get_or_init(|| hash_variables(&BTreeMap::new())),
            Some(frame) => *frame.hash.get_or_init(|| hash_variables(&self.variables())),
        }
    }

    /// Returns the thread's current context (empty if no scope is active).
    pub fn current() -> Context {
        CURRENT.with(|stack| stack.borrow().last().cloned().unwrap_or_default())
    }
}

fn hash_variables(vars: &BTreeMap<Arc<str>, Value>) -> Fingerprint {
    let mut hasher = FingerprintHasher::seeded("plexus::Context");
    hasher.append_u64(vars.len() as u64);
    for (name, value) in vars {
        hasher.append_str(name);
        value.hash_into(&mut hasher);
    }
    hasher.finish()
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        match (&self.head, &other.head) {
            (Some(a), Some(b)) if Arc::ptr_eq(a, b) => return true,
            (None, None) => return true,
            _ => {}
        }
        // Unequal fingerprints prove unequal sets; equal ones still compare
        // the sets so a collision can't make two contexts equal.
        self.hash() == other.hash() && self.variables() == other.variables()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.variables()).finish()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.variables().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}

// ---------------------------------------------------------------------------
// Scoped current context
// ---------------------------------------------------------------------------

thread_local! {
    static CURRENT: RefCell<Vec<Context>> = const { RefCell::new(Vec::new()) };
}

/// RAII guard making a context the thread's current one until dropped.
///
/// Guards are `!Send` and must be dropped in the reverse order they were
/// entered.
#[must_use = "the context is popped as soon as the scope is dropped"]
pub struct ContextScope {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl ContextScope {
    /// Pushes `context` as the thread's current context.
    pub fn enter(context: Context) -> ContextScope {
        let depth = CURRENT.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(context);
            stack.len() - 1
        });
        ContextScope {
            depth,
            _not_send: PhantomData,
        }
    }

    /// Overlays `name = value` on the current context and enters the result.
    pub fn with_variable(name: &str, value: impl Into<Value>) -> ContextScope {
        ContextScope::enter(Context::current().with_variable(name, value))
    }

    /// The context this scope made current.
    pub fn context(&self) -> Context {
        CURRENT.with(|stack| stack.borrow().get(self.depth).cloned().unwrap_or_default())
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(
                stack.len(),
                self.depth + 1,
                "context scopes dropped out of LIFO order"
            );
            stack.truncate(self.depth);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn lookup_of_undeclared_variable_is_absent() {
        let ctx = Context::new().with_variable("frame", 1);
        assert_eq!(ctx.get("missing"), None);
        assert!(!ctx.contains("missing"));
    }

    #[test]
    fn overlay_does_not_mutate_parent() {
        let parent = Context::new().with_variable("frame", 10);
        let child = parent.with_variable("frame", 20);
        assert_eq!(parent.frame(), Some(10.0));
        assert_eq!(child.frame(), Some(20.0));
        assert_ne!(parent.hash(), child.hash());
    }

    #[test]
    fn masking_removes_a_name() {
        let ctx = Context::new().with_variable("a", 1).with_variable("b", 2);
        let masked = ctx.without_variable("a");
        assert_eq!(masked.get("a"), None);
        assert_eq!(masked.get("b"), Some(&Value::Int(2)));
        assert_eq!(masked, Context::new().with_variable("b", 2));
    }

    #[test]
    fn equality_ignores_layering() {
        let a = Context::new().with_variable("x", 1).with_variable("y", 2);
        let b = Context::new().with_variables([("y", 2), ("x", 1)]);
        let c = Context::new().with_variable("x", 5).with_variable("y", 2).with_variable("x", 1);
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash(), c.hash());
    }

    #[test]
    fn equality_agrees_with_hash_for_signed_zero_and_nan() {
        let pos = Context::new().with_variable("x", 0.0);
        let neg = Context::new().with_variable("x", -0.0);
        assert_ne!(pos, neg);
        assert_ne!(pos.hash(), neg.hash());

        let a = Context::new().with_variable("x", f64::NAN);
        let b = Context::new().with_variable("x", f64::NAN);
        assert_eq!(a, a.clone());
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.variables(), b.variables());
    }

    #[test]
    fn empty_contexts_are_equal() {
        let masked = Context::new().with_variable("x", 1).without_variable("x");
        assert_eq!(masked, Context::new());
        assert_eq!(masked.hash(), Context::new().hash());
        assert!(masked.is_empty());
    }

    #[test]
    fn display_lists_sorted_variables() {
        let ctx = Context::new().with_variable("frame", 3).with_variable("name", "a");
        insta::assert_snapshot!(ctx.to_string(), @r#"{frame=3, name="a"}"#);
    }

    #[test]
    fn scopes_are_lifo() {
        assert!(Context::current().is_empty());
        {
            let outer = ContextScope::enter(Context::new().with_variable("frame", 1));
            assert_eq!(Context::current().frame(), Some(1.0));
            {
                let _inner = ContextScope::with_variable("frame", 2);
                assert_eq!(Context::current().frame(), Some(2.0));
            }
            assert_eq!(Context::current().frame(), Some(1.0));
            assert_eq!(outer.context().frame(), Some(1.0));
        }
        assert!(Context::current().is_empty());
    }

    proptest! {
        #[test]
        fn hash_is_independent_of_insertion_order(
            vars in proptest::collection::btree_map("[a-e]", any::<i64>(), 0..5)
        ) {
            let forward = vars
                .iter()
                .fold(Context::new(), |ctx, (k, v)| ctx.with_variable(k, *v));
            let backward = vars
                .iter()
                .rev()
                .fold(Context::new(), |ctx, (k, v)| ctx.with_variable(k, *v));
            prop_assert_eq!(forward.hash(), backward.hash());
            prop_assert_eq!(forward, backward);
        }

        #[test]
        fn differing_values_differ(a in any::<i64>(), b in any::<i64>()) {
            prop_assume!(a != b);
            let x = Context::new().with_variable("frame", a);
            let y = Context::new().with_variable("frame", b);
            prop_assert_ne!(x.hash(), y.hash());
            prop_assert_ne!(x, y);
        }
    }
}
