use std::sync::{Arc, Mutex, PoisonError};

use crate::numbering::FragmentNumber;

/// Fetches and installs numbered fragments.
///
/// Implementations must eventually report back to the loader exactly once per
/// request, through `fragment_has_loaded`, `leftovers_fragment_has_loaded` or
/// `fragment_load_failed`. `start_download` must not block on the loader.
pub trait FragmentTransport {
    fn start_download(&mut self, fragment: FragmentNumber);
}

impl<T: FragmentTransport + ?Sized> FragmentTransport for Box<T> {
    fn start_download(&mut self, fragment: FragmentNumber) {
        (**self).start_download(fragment)
    }
}

impl<T: FragmentTransport + ?Sized> FragmentTransport for &mut T {
    fn start_download(&mut self, fragment: FragmentNumber) {
        (**self).start_download(fragment)
    }
}

/// Records requests in order and never completes them.
///
/// Clones share the same log, so a test can keep one handle while the loader
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    requests: Arc<Mutex<Vec<FragmentNumber>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<FragmentNumber> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FragmentTransport for RecordingTransport {
    fn start_download(&mut self, fragment: FragmentNumber) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fragment);
    }
}
