use std::alloc::Layout;
use std::ptr::NonNull;

use crate::{AllocPolicy, AllocRequest, DeallocRequest, PolicyChain, Propagation, Result};

/// One policy followed by the rest of a policy chain.
///
/// Requests reach `policy` first; the policy decides how much of the request it hands on to
/// `rest`. Build chains with [`policy_chain!`][crate::policy_chain] rather than nesting links by
/// hand.
///
/// # Teardown
///
/// When a link is dropped, its policy's [`release()`][AllocPolicy::release] hook runs first, with
/// the rest of the chain still alive, and only then are the policy and the rest dropped. This lets
/// a policy return memory it borrowed from further down the chain.
#[derive(Clone, Debug)]
pub struct Link<P: AllocPolicy, R: PolicyChain> {
    policy: P,
    rest: R,
}

impl<P: AllocPolicy, R: PolicyChain> Link<P, R> {
    /// Puts `policy` in front of `rest`.
    #[must_use]
    pub fn new(policy: P, rest: R) -> Self {
        Self { policy, rest }
    }

    /// The policy at the head of this link.
    #[must_use]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// The policy at the head of this link.
    #[must_use]
    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    /// The rest of the chain behind the head policy.
    #[must_use]
    pub fn rest(&self) -> &R {
        &self.rest
    }

    /// The rest of the chain behind the head policy.
    #[must_use]
    pub fn rest_mut(&mut self) -> &mut R {
        &mut self.rest
    }

    /// Borrows the head policy and the rest of the chain at the same time, for calling policy
    /// methods that take the rest of the chain as a parameter.
    #[must_use]
    pub fn split_mut(&mut self) -> (&mut P, &mut R) {
        (&mut self.policy, &mut self.rest)
    }
}

// SAFETY: The link adds no pointers of its own; it only routes requests to the policy, which is
// itself bound by the pointer contract.
unsafe impl<P: AllocPolicy, R: PolicyChain> PolicyChain for Link<P, R> {
    const PROPAGATION: Propagation = P::PROPAGATION.union(R::PROPAGATION);

    #[inline]
    fn allocate(
        &mut self,
        request: &AllocRequest,
        existing: Option<NonNull<u8>>,
    ) -> Result<Option<NonNull<u8>>> {
        self.policy.allocate(request, existing, &mut self.rest)
    }

    #[inline]
    unsafe fn deallocate(&mut self, request: &DeallocRequest) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            self.policy.deallocate(request, &mut self.rest);
        }
    }

    fn rebind(&self, element: Layout) -> Self {
        Self {
            policy: self.policy.rebind(element),
            rest: self.rest.rebind(element),
        }
    }

    fn chain_eq(&self, other: &Self) -> bool {
        (!P::COMPARABLE || self.policy.policy_eq(&other.policy)) && self.rest.chain_eq(&other.rest)
    }
}

impl<P: AllocPolicy + Default, R: PolicyChain + Default> Default for Link<P, R> {
    fn default() -> Self {
        Self::new(P::default(), R::default())
    }
}

impl<P: AllocPolicy, R: PolicyChain> Drop for Link<P, R> {
    fn drop(&mut self) {
        self.policy.release(&mut self.rest);
    }
}

/// The end of every policy chain.
///
/// Returns whatever pointer the chain produced so far and ignores deallocations. All terminals
/// are equal.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[expect(clippy::exhaustive_structs, reason = "intentionally an empty struct")]
pub struct Terminal;

// SAFETY: The terminal never produces a pointer of its own.
unsafe impl PolicyChain for Terminal {
    const PROPAGATION: Propagation = Propagation::NONE;

    #[inline]
    fn allocate(
        &mut self,
        _request: &AllocRequest,
        existing: Option<NonNull<u8>>,
    ) -> Result<Option<NonNull<u8>>> {
        Ok(existing)
    }

    #[inline]
    unsafe fn deallocate(&mut self, _request: &DeallocRequest) {}

    fn rebind(&self, _element: Layout) -> Self {
        Self
    }

    fn chain_eq(&self, _other: &Self) -> bool {
        true
    }
}

/// Builds a policy chain from a list of policies, in the order requests visit them.
///
/// `policy_chain![a, b, c]` is `Link::new(a, Link::new(b, Link::new(c, Terminal)))`, and
/// `policy_chain![]` is a bare [`Terminal`].
///
/// # Examples
///
/// ```
/// use chained_alloc::{Allocator, HeapPolicy, PoolPolicy, StrictPolicy, policy_chain};
///
/// let chain = policy_chain![PoolPolicy::new(), HeapPolicy, StrictPolicy];
/// let mut allocator = Allocator::<u64, _>::new(chain);
///
/// let ptr = allocator.allocate(1).unwrap();
///
/// // SAFETY: The pointer came from this allocator and is released once.
/// unsafe { allocator.deallocate(ptr, 1) };
/// ```
#[macro_export]
macro_rules! policy_chain {
    () => {
        $crate::Terminal
    };
    ($policy:expr $(, $rest:expr)* $(,)?) => {
        $crate::Link::new($policy, $crate::policy_chain!($($rest),*))
    };
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// Records the order in which policies see requests and teardown.
    #[derive(Clone, Debug)]
    struct Tracer {
        name: &'static str,
        journal: Rc<RefCell<Vec<String>>>,
        id: u32,
    }

    impl Tracer {
        fn new(name: &'static str, journal: &Rc<RefCell<Vec<String>>>) -> Self {
            Self {
                name,
                journal: Rc::clone(journal),
                id: 0,
            }
        }

        fn note(&self, event: &str) {
            self.journal
                .borrow_mut()
                .push(format!("{}:{event}", self.name));
        }
    }

    unsafe impl AllocPolicy for Tracer {
        fn allocate<R: PolicyChain>(
            &mut self,
            request: &AllocRequest,
            existing: Option<NonNull<u8>>,
            rest: &mut R,
        ) -> Result<Option<NonNull<u8>>> {
            self.note("alloc");
            rest.allocate(request, existing)
        }

        unsafe fn deallocate<R: PolicyChain>(&mut self, request: &DeallocRequest, rest: &mut R) {
            self.note("dealloc");
            unsafe { rest.deallocate(request) };
        }

        fn release<R: PolicyChain>(&mut self, _rest: &mut R) {
            self.note("release");
        }
    }

    /// A comparable policy that only compares equal to itself by `id`.
    #[derive(Clone, Debug)]
    struct Tagged(u32);

    unsafe impl AllocPolicy for Tagged {
        const COMPARABLE: bool = true;
        const PROPAGATION: Propagation = Propagation::new(false, true, false);

        fn allocate<R: PolicyChain>(
            &mut self,
            request: &AllocRequest,
            existing: Option<NonNull<u8>>,
            rest: &mut R,
        ) -> Result<Option<NonNull<u8>>> {
            rest.allocate(request, existing)
        }

        unsafe fn deallocate<R: PolicyChain>(&mut self, request: &DeallocRequest, rest: &mut R) {
            unsafe { rest.deallocate(request) };
        }

        fn policy_eq(&self, other: &Self) -> bool {
            self.0 == other.0
        }
    }

    fn dummy_ptr() -> NonNull<u8> {
        NonNull::<u64>::dangling().cast()
    }

    #[test]
    fn terminal_returns_what_it_is_given() {
        let request = AllocRequest::new(Layout::new::<u8>(), 1);

        assert_eq!(Terminal.allocate(&request, None).unwrap(), None);
        assert_eq!(
            Terminal.allocate(&request, Some(dummy_ptr())).unwrap(),
            Some(dummy_ptr())
        );
    }

    #[test]
    fn empty_macro_is_terminal() {
        let chain: Terminal = policy_chain![];
        assert!(chain.chain_eq(&Terminal));
    }

    #[test]
    fn requests_visit_policies_in_order() {
        let journal = Rc::new(RefCell::new(Vec::new()));

        {
            let mut chain = policy_chain![
                Tracer::new("first", &journal),
                Tracer::new("second", &journal),
            ];

            let request = AllocRequest::new(Layout::new::<u32>(), 1);
            let result = chain.allocate(&request, Some(dummy_ptr())).unwrap();
            assert_eq!(result, Some(dummy_ptr()));

            unsafe {
                chain.deallocate(&DeallocRequest::new(dummy_ptr(), Layout::new::<u32>(), 1));
            }
        }

        assert_eq!(
            *journal.borrow(),
            vec![
                "first:alloc",
                "second:alloc",
                "first:dealloc",
                "second:dealloc",
                "first:release",
                "second:release",
            ]
        );
    }

    #[test]
    fn release_runs_once_per_link_instance() {
        let journal = Rc::new(RefCell::new(Vec::new()));

        {
            let chain = policy_chain![Tracer::new("only", &journal)];
            let _copy = chain.clone();
            let _rebound = chain.rebind(Layout::new::<u64>());
        }

        assert_eq!(journal.borrow().len(), 3);
    }

    #[test]
    fn equality_only_consults_comparable_policies() {
        let journal = Rc::new(RefCell::new(Vec::new()));

        let mut first_tracer = Tracer::new("a", &journal);
        first_tracer.id = 1;
        let mut second_tracer = Tracer::new("b", &journal);
        second_tracer.id = 2;

        let a = policy_chain![first_tracer, Tagged(7)];
        let b = policy_chain![second_tracer.clone(), Tagged(7)];
        let c = policy_chain![second_tracer, Tagged(8)];

        // Tracers differ but are not comparable, so they never block equality.
        assert_ne!(a.policy().id, b.policy().id);
        assert!(a.chain_eq(&b));
        assert!(!a.chain_eq(&c));
    }

    #[test]
    fn propagation_is_or_across_chain() {
        type Plain = Link<Tracer, Terminal>;
        type WithTagged = Link<Tracer, Link<Tagged, Terminal>>;

        assert_eq!(Plain::PROPAGATION, Propagation::NONE);
        assert!(WithTagged::PROPAGATION.on_move_assignment());
        assert!(!WithTagged::PROPAGATION.on_copy_assignment());
        assert!(!WithTagged::PROPAGATION.on_swap());
    }

    #[test]
    fn split_mut_exposes_both_halves() {
        let mut chain = policy_chain![Tagged(1), Tagged(2)];

        let (head, rest) = chain.split_mut();
        head.0 = 10;
        rest.policy_mut().0 = 20;

        assert_eq!(chain.policy().0, 10);
        assert_eq!(chain.rest().policy().0, 20);
        assert_eq!(chain.rest_mut().policy().0, 20);
    }
}
