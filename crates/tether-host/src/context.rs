//! Native call context.
//!
//! This module provides [`NativeCall`], the context every native entry point
//! receives. It gives access to the callback relay and lets the entry point
//! schedule work that must run after the bridge has released its state, such
//! as delivering queued events back into the host.

use tether_core::FunctionRef;

use crate::relay::{CallbackRelay, EventSlot, EventSource, RelaySender};

/// Work a native entry point asks the bridge to do once the call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostCall {
    /// Deliver the events queued so far.
    DispatchPending,
    /// Deliver events until an exit is posted.
    RunEventLoop,
}

/// Context available to native entry points.
pub struct NativeCall<'a> {
    relay: &'a mut CallbackRelay,
    post: Option<PostCall>,
}

impl<'a> NativeCall<'a> {
    /// Create a context over a relay.
    pub fn new(relay: &'a mut CallbackRelay) -> Self {
        Self { relay, post: None }
    }

    /// A producer for creating event sources or posting an exit.
    pub fn sender(&self) -> RelaySender {
        self.relay.sender()
    }

    /// Access the relay.
    pub fn relay_mut(&mut self) -> &mut CallbackRelay {
        self.relay
    }

    /// Register a callback on a source owned by a native object, returning
    /// the callable it replaces.
    pub fn register_callback(
        &mut self,
        source: &EventSource,
        slot: EventSlot,
        callable: FunctionRef,
    ) -> Option<FunctionRef> {
        self.relay.register(source, slot, callable)
    }

    /// Schedule work to run after the call. A later request replaces an
    /// earlier one.
    pub fn defer(&mut self, post: PostCall) {
        self.post = Some(post);
    }

    /// The scheduled post-call work, if any.
    pub fn post_call(&self) -> Option<PostCall> {
        self.post
    }
}

impl std::fmt::Debug for NativeCall<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeCall")
            .field("post", &self.post)
            .finish()
    }
}
