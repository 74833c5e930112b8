/// Data model for dirwatch change notifications.
///
/// Re-exports the normalized change record and its kind.
pub mod record;

pub use record::{ChangeKind, ChangeRecord};
