use std::fmt;

use super::request::MemoryRequest;

/// Completion hook attached to a request. The stage that finishes servicing a request calls
/// `notify` once; the request itself only carries the reference.
pub trait Signal: Send + Sync {
    fn name(&self) -> &str;

    /// Returns false if the receiver could not accept the completion this cycle.
    fn notify(&self, request: &MemoryRequest) -> bool;
}

type Callback = Box<dyn Fn(&MemoryRequest) -> bool + Send + Sync>;

/// Named signal backed by a closure.
pub struct CallbackSignal {
    name: String,
    callback: Callback,
}

impl CallbackSignal {
    pub fn new<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&MemoryRequest) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            callback: Box::new(callback),
        }
    }
}

impl Signal for CallbackSignal {
    fn name(&self) -> &str {
        &self.name
    }

    fn notify(&self, request: &MemoryRequest) -> bool {
        (self.callback)(request)
    }
}

impl fmt::Debug for CallbackSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSignal")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
