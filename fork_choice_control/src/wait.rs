use core::ops::DerefMut as _;
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_utils::sync::WaitGroup;
use tap::Pipe as _;

/// Tracks messages that have been sent to the mutator but not handled yet.
///
/// `()` tracks nothing. [`WaitGroup`] is only worth its overhead in tests.
pub trait Wait: Clone + Default + Send + 'static {
    type Swappable: Default + Send + Sync;

    fn load_and_clone(swappable: &Self::Swappable) -> Self;

    /// Blocks until every clone loaded so far is dropped.
    fn wait(swappable: &Self::Swappable);
}

impl Wait for () {
    type Swappable = ();

    fn load_and_clone((): &Self::Swappable) -> Self {}

    fn wait((): &Self::Swappable) {}
}

impl Wait for WaitGroup {
    type Swappable = Arc<Mutex<Self>>;

    fn load_and_clone(swappable: &Self::Swappable) -> Self {
        swappable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // The current group is swapped out so that messages sent while waiting join a new one.
    // Retried objects are sent with clones of the old group, so they are waited for too.
    fn wait(swappable: &Self::Swappable) {
        let wait_group = swappable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .deref_mut()
            .pipe(core::mem::take);

        wait_group.wait()
    }
}
