//! Enumeration of the regular files below a source root.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;

use bon::Builder;
use dyn_iter::{DynIter, IntoDynIterator};
use getset::{CopyGetters, Getters};
use walkdir::{DirEntry, WalkDir};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// A regular file found under a source root during one walk.
#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct FileRecord {
    #[getset(get = "pub")]
    root: Arc<Path>,
    #[getset(get = "pub")]
    path: PathBuf,
    #[getset(get = "pub")]
    relative_path: PathBuf,
    #[getset(get_copy = "pub")]
    size: u64,
    #[getset(get_copy = "pub")]
    modified: SystemTime,
}

/// Walks source roots recursively.
///
/// Symbolic links are reported as neither files nor directories unless
/// `follow_symlinks` is set, in which case their targets are walked.
#[derive(Clone, Copy, Debug, Default, Builder)]
pub struct PathWalker {
    #[builder(default)]
    follow_symlinks: bool,
}

impl PathWalker {
    pub fn new(follow_symlinks: bool) -> Self {
        Self { follow_symlinks }
    }

    /// Lazily yields every regular file under `root`.
    ///
    /// An unreadable subtree yields one `Err` item and the walk carries on with
    /// its siblings. Calling `walk` again starts a fresh traversal.
    pub fn walk<P: AsRef<Path>>(&self, root: P) -> DynIter<'static, Result<FileRecord>> {
        let root: Arc<Path> = root.as_ref().into();
        tracing::debug!("Walking source root {:?}", root);

        WalkDir::new(root.as_ref())
            .follow_links(self.follow_symlinks)
            .into_iter()
            .filter_map(move |res| match res {
                Ok(de) => process_dir_entry(de, &root),
                Err(e) => Some(Err(Error::from(e).with_msg("Skipping unreadable path"))),
            })
            .into_dyn_iter()
    }
}

fn process_dir_entry(de: DirEntry, root: &Arc<Path>) -> Option<Result<FileRecord>> {
    if !de.file_type().is_file() {
        tracing::trace!("Skipping {:?} not a regular file", de.path());
        return None;
    }

    let relative_path = match de.path().strip_prefix(root.as_ref()) {
        Ok(p) => p.to_path_buf(),
        Err(_) => {
            return Some(Err(Error::configuration(format!(
                "{:?} is not below root {:?}",
                de.path(),
                root
            ))))
        }
    };

    let md = match de.metadata() {
        Ok(md) => md,
        Err(e) => return Some(Err(e.into())),
    };
    let path = de.into_path();

    Some(match md.modified() {
        Ok(modified) => Ok(FileRecord {
            root: root.clone(),
            path,
            relative_path,
            size: md.len(),
            modified,
        }),
        Err(error) => Err(Error::FileAccess { path, error }),
    })
}
