//! Platform audio focus

use std::sync::Arc;

/// Best-effort exclusive-output arbitration. Changes in focus come back to the
/// session as [`super::FocusChange`] events.
pub trait AudioFocus: Send + Sync {
    /// Returns whether focus was granted
    fn request(&self) -> bool;

    fn abandon(&self);
}

impl<T: AudioFocus + ?Sized> AudioFocus for Arc<T> {
    fn request(&self) -> bool {
        (**self).request()
    }

    fn abandon(&self) {
        (**self).abandon();
    }
}

/// Desktop hosts have no focus arbiter; every request is granted
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopFocus;

impl AudioFocus for DesktopFocus {
    fn request(&self) -> bool {
        true
    }

    fn abandon(&self) {}
}
