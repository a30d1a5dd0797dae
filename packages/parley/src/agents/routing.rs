//! The one place that decides what happens to an inbound agent event.

use parley_protocol::MessageType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Owner is active: publish now.
    Publish,
    /// Owner is in the background: queue for replay.
    Buffer,
    /// Session-ending event: always closes the stream and notifies, whether or
    /// not the owner is active.
    Complete { owner_active: bool },
}

pub fn decide(active: Option<&str>, owner: &str, message_type: &MessageType) -> Route {
    let owner_active = active == Some(owner);
    if message_type.is_completion() {
        Route::Complete { owner_active }
    } else if owner_active {
        Route::Publish
    } else {
        Route::Buffer
    }
}
