//! Timestamped tar archives, optionally gzip compressed.

use crate::backup::compress::{Compressor, CompressorBuilder, CompressorConfig};
use crate::backup::file_ext::FileExtProvider;
use crate::backup::finish::Finish;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;

use chrono::{DateTime, TimeZone};
use itertools::Itertools;

use std::collections::HashSet;
use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufWriter, IntoInnerError, Read, Take};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

pub static ARCHIVE_PREFIX: &str = "backup_";
static TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
static TAR_FILE_EXT: OnceLock<Arc<str>> = OnceLock::new();

type ArchiveStream = tar::Builder<BufWriter<Compressor<BufWriter<File>>>>;

/// Creates one archive per run in the destination directory.
#[derive(Clone, Debug, Default)]
pub struct ArchiveWriter {
    compressor: CompressorConfig,
}

impl FileExtProvider for ArchiveWriter {
    fn file_ext(&self) -> Option<Arc<str>> {
        Some(
            std::iter::once(TAR_FILE_EXT.get_or_init(|| "tar".into()))
                .chain(self.compressor.file_ext().iter())
                .join(".")
                .into(),
        )
    }
}

impl ArchiveWriter {
    pub fn new(compressor: CompressorConfig) -> Self {
        Self { compressor }
    }

    /// `backup_<YYYY-MM-DD_HH-MM-SS>.<ext>`. Two calls within the same second
    /// produce the same name.
    pub fn archive_file_name<O: Display, T: TimeZone<Offset = O>>(
        &self,
        dt: &DateTime<T>,
    ) -> String {
        format!(
            "{}{}.{}",
            ARCHIVE_PREFIX,
            dt.format(TIME_FORMAT),
            self.file_ext().unwrap_or("".into())
        )
    }

    /// Creates the archive file, truncating an existing one of the same name.
    pub fn begin<P: AsRef<Path>, O: Display, T: TimeZone<Offset = O>>(
        &self,
        destination: P,
        dt: &DateTime<T>,
    ) -> Result<ArchiveHandle> {
        let path = destination.as_ref().join(self.archive_file_name(dt));
        let file = File::create(&path)
            .map_err(Error::from)
            .with_msg(format!("Create archive {:?} failed", path))?;
        let stream = BufWriter::new(self.compressor.build_compressor(BufWriter::new(file)));
        tracing::info!("Writing archive {:?}", path);

        Ok(ArchiveHandle {
            path,
            builder: tar::Builder::new(stream),
            entry_count: 0,
        })
    }
}

/// An archive being written. Must be passed to [`ArchiveHandle::finalize`];
/// a dropped handle leaves an incomplete file behind.
pub struct ArchiveHandle {
    path: PathBuf,
    builder: ArchiveStream,
    entry_count: usize,
}

impl ArchiveHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Streams `src` into the archive under `name`.
    ///
    /// The entry holds exactly as many bytes as the file had when it was
    /// opened, so a file that keeps growing is cut at that length.
    ///
    /// [`Error::FileAccess`] means `src` could not be opened and the archive is
    /// untouched. [`Error::FileChanged`] means the file shrank while being read;
    /// the entry is zero filled to its recorded size and the archive stays
    /// readable. Any other error happened after the entry header was written
    /// and leaves the archive unusable.
    pub fn add_file<P1: AsRef<Path>, P2: AsRef<Path>>(&mut self, src: P1, name: P2) -> Result<()> {
        let src = src.as_ref();
        let access = |error| Error::FileAccess {
            path: src.to_path_buf(),
            error,
        };
        let file = File::open(src).map_err(access)?;
        let metadata = file.metadata().map_err(access)?;
        let len = metadata.len();

        let mut header = tar::Header::new_gnu();
        header.set_metadata(&metadata);
        let mut data = ExactLen::new(file, len);
        self.builder
            .append_data(&mut header, name.as_ref(), &mut data)
            .map_err(Error::from)
            .with_msg(format!(
                "Append {:?} as {:?} to {:?} failed",
                src,
                name.as_ref(),
                self.path
            ))?;
        self.entry_count += 1;

        if data.padded > 0 {
            return Err(Error::FileChanged {
                path: src.to_path_buf(),
                expected: len,
                read: len - data.padded,
            });
        }
        tracing::trace!("Archived {:?} -> {:?}", src, name.as_ref());
        Ok(())
    }

    /// Writes the tar trailer, flushes every layer and syncs the file.
    pub fn finalize(self) -> Result<PathBuf> {
        let path = self.path;
        let res = self
            .builder
            .into_inner()
            .and_then(|w| w.into_inner().map_err(IntoInnerError::into_error))
            .and_then(Finish::finish)
            .and_then(|w| w.into_inner().map_err(IntoInnerError::into_error))
            .and_then(|f| f.sync_all());

        match res {
            Ok(()) => {
                tracing::debug!("Finalized archive {:?}", path);
                Ok(path)
            }
            Err(error) => Err(Error::ArchiveFinalize { path, error }),
        }
    }
}

/// Reads exactly `len` bytes from `inner`, zero filling past its end.
struct ExactLen<R> {
    inner: Take<R>,
    padded: u64,
}

impl<R: Read> ExactLen<R> {
    fn new(inner: R, len: u64) -> Self {
        Self {
            inner: inner.take(len),
            padded: 0,
        }
    }
}

impl<R: Read> Read for ExactLen<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        let left = self.inner.limit();
        if n > 0 || left == 0 || buf.is_empty() {
            return Ok(n);
        }

        let fill = left.min(buf.len() as u64) as usize;
        buf[..fill].fill(0);
        self.inner.set_limit(left - fill as u64);
        self.padded += fill as u64;
        Ok(fill)
    }
}

/// Top-level directory name inside the archive for each source root.
///
/// A root is labelled by its basename. A later root whose basename is already
/// taken gets `<basename>-2`, `<basename>-3`, ... so two roots never share a
/// namespace.
pub fn root_labels<P: AsRef<Path>>(roots: &[P]) -> Vec<PathBuf> {
    let mut used = HashSet::new();
    roots
        .iter()
        .map(|root| {
            let base = root
                .as_ref()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "root".to_string());
            let mut label = base.clone();
            let mut n = 2;
            while !used.insert(label.clone()) {
                label = format!("{base}-{n}");
                n += 1;
            }
            PathBuf::from(label)
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backup::compress::GzipConfig;
    use chrono::{Duration, Utc};
    use flate2::read::GzDecoder;
    use std::io::Cursor;
    use tempfile::TempDir;

    /// Entry name to content for every file in a `.tar.gz` archive.
    pub(crate) fn read_archive(path: &Path) -> Vec<(String, String)> {
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let name = e.path().unwrap().to_string_lossy().into_owned();
                let mut content = String::new();
                e.read_to_string(&mut content).unwrap();
                (name, content)
            })
            .sorted()
            .collect()
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap()
    }

    #[test]
    fn test_archive_file_name() {
        let writer = ArchiveWriter::default();
        assert_eq!(
            writer.archive_file_name(&fixed_time()),
            "backup_2024-03-05_07-08-09.tar.gz"
        );
        assert_eq!(
            ArchiveWriter::new(CompressorConfig::None).archive_file_name(&fixed_time()),
            "backup_2024-03-05_07-08-09.tar"
        );
    }

    #[test]
    fn test_archive_names_collide_within_one_second() {
        let writer = ArchiveWriter::default();
        let t0 = fixed_time();
        assert_eq!(
            writer.archive_file_name(&t0),
            writer.archive_file_name(&(t0 + Duration::milliseconds(999)))
        );
        assert_ne!(
            writer.archive_file_name(&t0),
            writer.archive_file_name(&(t0 + Duration::seconds(1)))
        );
    }

    #[test]
    fn test_write_and_read_back() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::fs::write(src.path().join("x.txt"), "hello").unwrap();
        std::fs::create_dir(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub/y.txt"), "world").unwrap();

        let writer = ArchiveWriter::new(CompressorConfig::Gzip(GzipConfig { level: Some(1) }));
        let mut handle = writer.begin(dst.path(), &fixed_time()).unwrap();
        handle.add_file(src.path().join("x.txt"), "A/x.txt").unwrap();
        handle.add_file(src.path().join("sub/y.txt"), "A/sub/y.txt").unwrap();
        assert_eq!(handle.entry_count(), 2);
        let path = handle.finalize().unwrap();

        assert_eq!(path, dst.path().join("backup_2024-03-05_07-08-09.tar.gz"));
        assert_eq!(
            read_archive(&path),
            vec![
                ("A/sub/y.txt".to_string(), "world".to_string()),
                ("A/x.txt".to_string(), "hello".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_source_is_file_access_error() {
        let dst = TempDir::new().unwrap();
        let mut handle = ArchiveWriter::default()
            .begin(dst.path(), &fixed_time())
            .unwrap();
        let err = handle
            .add_file(dst.path().join("gone.txt"), "A/gone.txt")
            .unwrap_err();
        assert!(matches!(err, Error::FileAccess { .. }));
        assert_eq!(handle.entry_count(), 0);

        let path = handle.finalize().unwrap();
        assert!(read_archive(&path).is_empty());
    }

    #[test]
    fn test_growing_file_is_cut_at_open_length() {
        const LEN: usize = 4 * 1024 * 1024;
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let log = src.path().join("app.log");
        std::fs::write(&log, vec![b'a'; LEN]).unwrap();
        std::fs::write(src.path().join("after.txt"), "after").unwrap();

        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let appender = {
            let stop = stop.clone();
            let log = log.clone();
            std::thread::spawn(move || {
                let mut f = File::options().append(true).open(log).unwrap();
                while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                    std::io::Write::write_all(&mut f, &[b'b'; 4096]).unwrap();
                }
            })
        };

        let mut handle = ArchiveWriter::default()
            .begin(dst.path(), &fixed_time())
            .unwrap();
        let res = handle.add_file(&log, "A/app.log");
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        appender.join().unwrap();
        res.unwrap();
        handle.add_file(src.path().join("after.txt"), "A/after.txt").unwrap();
        let path = handle.finalize().unwrap();

        let entries = read_archive(&path);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ("A/after.txt".to_string(), "after".to_string()));
        assert_eq!(entries[1].0, "A/app.log");
        assert!(entries[1].1.len() >= LEN);
        assert!(entries[1].1.bytes().take(LEN).all(|b| b == b'a'));
    }

    #[test]
    fn test_exact_len_zero_fills_short_source() {
        let mut data = ExactLen::new(Cursor::new(b"abc".to_vec()), 5);
        let mut out = Vec::new();
        data.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc\0\0");
        assert_eq!(data.padded, 2);

        let mut data = ExactLen::new(Cursor::new(b"abcdef".to_vec()), 3);
        let mut out = Vec::new();
        data.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(data.padded, 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_finalize_failure_is_archive_finalize_error() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::fs::write(src.path().join("x.txt"), "x").unwrap();
        let writer = ArchiveWriter::default();
        let target = dst.path().join(writer.archive_file_name(&fixed_time()));
        // Every write to /dev/full fails with ENOSPC.
        std::os::unix::fs::symlink("/dev/full", &target).unwrap();

        let mut handle = writer.begin(dst.path(), &fixed_time()).unwrap();
        handle.add_file(src.path().join("x.txt"), "A/x.txt").unwrap();
        match handle.finalize() {
            Err(Error::ArchiveFinalize { path, .. }) => assert_eq!(path, target),
            other => panic!("Expected ArchiveFinalize, got {other:?}"),
        }
        assert!(target.symlink_metadata().is_ok());
    }

    #[test]
    fn test_begin_in_missing_destination_fails() {
        let dst = TempDir::new().unwrap();
        let res = ArchiveWriter::default().begin(dst.path().join("missing"), &fixed_time());
        assert!(res.is_err());
    }

    #[test]
    fn test_root_labels_use_basename() {
        let labels = root_labels(&["/home/u/docs", "/home/u/photos"]);
        assert_eq!(labels, vec![PathBuf::from("docs"), PathBuf::from("photos")]);
    }

    #[test]
    fn test_root_labels_disambiguate_shared_basename() {
        let labels = root_labels(&["/a/docs", "/b/docs", "/c/docs-2", "/d/docs"]);
        assert_eq!(
            labels,
            vec![
                PathBuf::from("docs"),
                PathBuf::from("docs-2"),
                PathBuf::from("docs-2-2"),
                PathBuf::from("docs-3"),
            ]
        );
    }
}
