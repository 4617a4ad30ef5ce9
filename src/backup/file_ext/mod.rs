use std::sync::Arc;

/// Suffix a component contributes to the archive file name, without the dot.
pub trait FileExtProvider {
    fn file_ext(&self) -> Option<Arc<str>>;
}
