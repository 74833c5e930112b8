/// Raw action → [`ChangeKind`] classification.
///
/// A rename is never reported as its own event: the old name surfaces as
/// `Deleted` and the new name as `Created`, as two independent records with
/// no correlation between them. Downstream consumers rely on that shape.
use crate::decode::RawAction;
use crate::model::ChangeKind;
use std::path::Path;

/// Classify one raw action.
///
/// Returns `None` for [`RawAction::Overflow`], which names no file.
pub fn classify(action: RawAction) -> Option<ChangeKind> {
    match action {
        RawAction::Added | RawAction::RenamedNewName => Some(ChangeKind::Created),
        RawAction::Removed | RawAction::RenamedOldName => Some(ChangeKind::Deleted),
        RawAction::Overflow => None,
        RawAction::Modified | RawAction::Other(_) => Some(ChangeKind::Modified),
    }
}

/// Drops records whose file extension is on an exclusion list.
///
/// Matching is case-insensitive and ignores a leading dot in the configured
/// extensions, so `"TMP"`, `".tmp"` and `"tmp"` are equivalent.
#[derive(Clone, Debug, Default)]
pub struct ExtensionFilter {
    excluded: Vec<String>,
}

impl ExtensionFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let excluded = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self { excluded }
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }

    pub fn excludes(&self, path: &Path) -> bool {
        if self.excluded.is_empty() {
            return false;
        }
        match path.extension() {
            Some(ext) => {
                let ext = ext.to_string_lossy().to_ascii_lowercase();
                self.excluded.iter().any(|e| *e == ext)
            }
            None => false,
        }
    }
}
