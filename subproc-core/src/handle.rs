//! Exclusive ownership of a single OS resource.

/// Owns at most one OS resource (a pipe endpoint, an open file or a process).
///
/// A handle is either *valid* (it owns a resource) or *invalid*. Releasing an invalid handle
/// is a no-op and releasing a valid one leaves it invalid, so every resource is released
/// exactly once no matter how many times [`Handle::release`] is called. Moving the resource
/// out with [`Handle::take`] invalidates the handle as well.
#[derive(Debug)]
pub(crate) struct Handle<T>(Option<T>);

impl<T> Handle<T> {
    /// Wraps a resource.
    pub const fn new(resource: T) -> Self {
        Self(Some(resource))
    }

    /// Returns a handle that owns nothing.
    pub const fn invalid() -> Self {
        Self(None)
    }

    pub const fn is_valid(&self) -> bool {
        self.0.is_some()
    }

    pub const fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }

    /// Moves the resource out, leaving the handle invalid.
    pub const fn take(&mut self) -> Option<T> {
        self.0.take()
    }

    /// Releases the resource, if any. Failures while closing the underlying OS object are
    /// not actionable and are ignored.
    pub fn release(&mut self) {
        drop(self.0.take());
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::invalid()
    }
}

impl<T> From<Option<T>> for Handle<T> {
    fn from(resource: Option<T>) -> Self {
        Self(resource)
    }
}
