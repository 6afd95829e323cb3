//! Classification of raw `notify` events.

use notify::event::ModifyKind;
use notify::EventKind;

/// Whether an event of this kind can change what the mirror should hold.
/// Access notifications never do.
pub fn is_qualifying(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Any | EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Other
    )
}

/// Whether an event of this kind may have brought a new directory into
/// existence at one of its paths.
pub fn may_create_dir(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Any | EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_)) | EventKind::Modify(ModifyKind::Any)
    )
}
