//! Recording data collection.
//!
//! Packs every finished recording file from the app's data directory into
//! one ZIP archive. Files whose names carry the temporary prefix are still
//! being written by the sampling engine and are skipped, as is anything
//! that is not a regular file.

use std::cell::Cell;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Error, Result};

/// Default recording data directory, relative to the app's working directory.
pub const DEFAULT_DATA_DIR: &str = "appprof_data";

/// Prefix of files the sampling engine has not finished writing.
pub const TEMP_FILE_PREFIX: &str = "TemporaryFile-";

/// Copy buffer size.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// A candidate file in the data directory.
#[derive(Debug, Clone)]
pub struct DataFile {
    /// Base name, used as the archive entry name.
    pub name: String,
    /// Full path.
    pub path: PathBuf,
    /// Whether the path resolves to a regular file.
    pub is_regular: bool,
}

/// One archived file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedEntry {
    /// Entry name.
    pub name: String,
    /// Uncompressed size in bytes.
    pub bytes: u64,
}

/// Result of a successful collection.
#[derive(Debug, Default)]
pub struct CollectSummary {
    /// Entries written, in archive order.
    pub entries: Vec<ArchivedEntry>,
    /// Names that were skipped as temporary or non-regular.
    pub skipped: Vec<String>,
}

/// Streams eligible files from a data directory into a ZIP archive.
pub struct ArchiveCollector {
    data_dir: PathBuf,
    temp_prefix: String,
}

impl ArchiveCollector {
    /// Collect from `data_dir`, skipping names starting with [`TEMP_FILE_PREFIX`].
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            temp_prefix: TEMP_FILE_PREFIX.into(),
        }
    }

    /// Override the temporary-file prefix.
    #[must_use]
    pub fn with_temp_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_prefix = prefix.into();
        self
    }

    /// The directory being collected.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// List the top level of the data directory in enumeration order.
    pub fn scan(&self) -> Result<Vec<DataFile>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.data_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| Error::file("read directory", &self.data_dir, e.into()))?;
            let path = entry.path().to_path_buf();
            // Follows symlinks; unreadable metadata counts as not regular.
            let is_regular = fs::metadata(&path).is_ok_and(|m| m.is_file());
            files.push(DataFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                is_regular,
            });
        }
        Ok(files)
    }

    fn is_eligible(&self, file: &DataFile) -> bool {
        file.is_regular && !file.name.starts_with(&self.temp_prefix)
    }

    /// Write every eligible file to `sink` as one archive.
    ///
    /// Any failure aborts immediately without writing the archive index, so
    /// the partial output is never a valid archive.
    pub fn collect<W: Write + Seek>(&self, sink: W) -> Result<CollectSummary> {
        let mut summary = CollectSummary::default();
        let mut archive = ArchiveWriter::new(sink);
        let mut buffer = vec![0u8; CHUNK_SIZE];

        for file in self.scan()? {
            if !self.is_eligible(&file) {
                summary.skipped.push(file.name);
                continue;
            }
            let input = File::open(&file.path).map_err(|e| Error::file("open", &file.path, e))?;
            let size = input.metadata().map_or(0, |m| m.len());
            let bytes = append_entry(&mut archive, &file.name, size, input, &mut buffer)?;
            summary.entries.push(ArchivedEntry {
                name: file.name,
                bytes,
            });
        }

        archive.finish()?.flush()?;
        Ok(summary)
    }
}

/// ZIP output that only gets an index through [`ArchiveWriter::finish`].
///
/// `ZipWriter` finalizes itself when dropped. Here a dropped, unfinished
/// writer discards whatever it would still write, so an abandoned archive
/// ends without its central directory.
pub struct ArchiveWriter<W: Write + Seek> {
    // Dropped before `zip`.
    seal: SealOnDrop,
    zip: ZipWriter<SealableSink<W>>,
}

impl<W: Write + Seek> ArchiveWriter<W> {
    /// Start an empty archive at the current position of `sink`.
    pub fn new(sink: W) -> Self {
        let sealed = Rc::new(Cell::new(false));
        Self {
            seal: SealOnDrop(Rc::clone(&sealed)),
            zip: ZipWriter::new(SealableSink {
                inner: sink,
                sealed,
                position: 0,
            }),
        }
    }

    /// Open a deflated entry. `size` selects ZIP64 fields for entries past 4 GiB.
    pub fn start_entry(&mut self, name: &str, size: u64) -> Result<()> {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(size >= u64::from(u32::MAX));
        self.zip.start_file(name, options)?;
        Ok(())
    }

    /// Append bytes to the open entry.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.zip.write_all(data)?;
        Ok(())
    }

    /// Finish the last entry, write the central directory, and return the sink.
    pub fn finish(self) -> Result<W> {
        let Self { seal, zip } = self;
        let sink = zip.finish()?;
        drop(seal);
        Ok(sink.inner)
    }
}

struct SealOnDrop(Rc<Cell<bool>>);

impl Drop for SealOnDrop {
    fn drop(&mut self) {
        self.0.set(true);
    }
}

/// Passes I/O through until sealed, then accepts and drops everything.
///
/// The first I/O error also seals it, so a writer that failed mid-finish
/// cannot complete the index on its way out.
struct SealableSink<W> {
    inner: W,
    sealed: Rc<Cell<bool>>,
    position: u64,
}

impl<W> SealableSink<W> {
    fn seal_on_error<T>(&self, result: io::Result<T>) -> io::Result<T> {
        if result.is_err() {
            self.sealed.set(true);
        }
        result
    }
}

impl<W: Write> Write for SealableSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.sealed.get() {
            self.position += buf.len() as u64;
            return Ok(buf.len());
        }
        let result = self.inner.write(buf);
        let n = self.seal_on_error(result)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.sealed.get() {
            return Ok(());
        }
        let result = self.inner.flush();
        self.seal_on_error(result)
    }
}

impl<W: Seek> Seek for SealableSink<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if self.sealed.get() {
            self.position = match pos {
                SeekFrom::Start(n) => n,
                SeekFrom::Current(delta) | SeekFrom::End(delta) => {
                    self.position.saturating_add_signed(delta)
                }
            };
            return Ok(self.position);
        }
        let result = self.inner.seek(pos);
        self.position = self.seal_on_error(result)?;
        Ok(self.position)
    }
}

/// Stream `reader` into a new entry named `name`.
///
/// Reads interrupted by a signal are retried; any other read error returns
/// with the entry still open. Dropping `archive` after that leaves no index.
pub fn append_entry<W: Write + Seek, R: Read>(
    archive: &mut ArchiveWriter<W>,
    name: &str,
    size: u64,
    mut reader: R,
    buffer: &mut [u8],
) -> Result<u64> {
    archive.start_entry(name, size)?;
    let mut total = 0u64;
    loop {
        let n = match reader.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::file("read", name, e)),
        };
        archive.write_bytes(&buffer[..n])?;
        total += n as u64;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn entries(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut f = archive.by_index(i).unwrap();
                let mut data = Vec::new();
                f.read_to_end(&mut data).unwrap();
                (f.name().to_string(), data)
            })
            .collect()
    }

    fn collect_into_vec(collector: &ArchiveCollector) -> Result<(CollectSummary, Vec<u8>)> {
        let mut out = Cursor::new(Vec::new());
        let summary = collector.collect(&mut out)?;
        Ok((summary, out.into_inner()))
    }

    #[test]
    fn collects_only_regular_non_temporary_files() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..1024u32).map(|i| (i * 7) as u8).collect();
        fs::write(dir.path().join("a.data"), &data).unwrap();
        fs::write(dir.path().join("TemporaryFile-x"), [0u8; 500]).unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let (summary, out) = collect_into_vec(&ArchiveCollector::new(dir.path())).unwrap();

        assert_eq!(
            summary.entries,
            vec![ArchivedEntry {
                name: "a.data".into(),
                bytes: 1024
            }]
        );
        let mut skipped = summary.skipped.clone();
        skipped.sort();
        assert_eq!(skipped, vec!["TemporaryFile-x".to_string(), "subdir".to_string()]);
        assert_eq!(entries(out), vec![("a.data".to_string(), data)]);
    }

    #[test]
    fn entries_are_deflated() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("zeros.data"), vec![0u8; 256 * 1024]).unwrap();
        let (_, out) = collect_into_vec(&ArchiveCollector::new(dir.path())).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(out)).unwrap();
        let entry = archive.by_index(0).unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Deflated);
        assert_eq!(entry.size(), 256 * 1024);
        assert!(entry.compressed_size() < 16 * 1024);
    }

    #[test]
    fn empty_directory_gives_zero_entry_archive() {
        let dir = tempfile::tempdir().unwrap();
        let (summary, out) = collect_into_vec(&ArchiveCollector::new(dir.path())).unwrap();
        assert!(summary.entries.is_empty());
        assert!(entries(out).is_empty());
    }

    #[test]
    fn zero_length_file_gives_empty_entry() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("empty.data"), b"").unwrap();
        let (_, out) = collect_into_vec(&ArchiveCollector::new(dir.path())).unwrap();
        assert_eq!(entries(out), vec![("empty.data".to_string(), Vec::new())]);
    }

    #[test]
    fn missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_into_vec(&ArchiveCollector::new(dir.path().join("gone"))).unwrap_err();
        assert!(matches!(err, Error::File { op: "read directory", .. }));
    }

    #[test]
    fn custom_temp_prefix() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("partial-1"), b"x").unwrap();
        fs::write(dir.path().join("TemporaryFile-kept"), b"y").unwrap();
        let collector = ArchiveCollector::new(dir.path()).with_temp_prefix("partial-");
        let (_, out) = collect_into_vec(&collector).unwrap();
        assert_eq!(entries(out), vec![("TemporaryFile-kept".to_string(), b"y".to_vec())]);
    }

    /// Yields one chunk, then an interrupt, then a second chunk, then `then`.
    struct FlakyReader {
        step: usize,
        then: Option<ErrorKind>,
    }

    impl Read for FlakyReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.step += 1;
            match self.step {
                1 | 3 => {
                    buf[..4].copy_from_slice(b"abcd");
                    Ok(4)
                }
                2 => Err(ErrorKind::Interrupted.into()),
                _ => match self.then {
                    Some(kind) => Err(kind.into()),
                    None => Ok(0),
                },
            }
        }
    }

    #[test]
    fn interrupted_reads_are_retried() {
        let mut archive = ArchiveWriter::new(Cursor::new(Vec::new()));
        let mut buf = vec![0u8; CHUNK_SIZE];
        let reader = FlakyReader { step: 0, then: None };
        let n = append_entry(&mut archive, "f", 8, reader, &mut buf).unwrap();
        assert_eq!(n, 8);
        let out = archive.finish().unwrap().into_inner();
        assert_eq!(entries(out), vec![("f".to_string(), b"abcdabcd".to_vec())]);
    }

    #[test]
    fn read_failure_leaves_no_index() {
        let mut out = Cursor::new(Vec::new());
        {
            let mut archive = ArchiveWriter::new(&mut out);
            let mut buf = vec![0u8; CHUNK_SIZE];
            append_entry(&mut archive, "done", 3, &b"abc"[..], &mut buf).unwrap();
            let reader = FlakyReader {
                step: 0,
                then: Some(ErrorKind::Other),
            };
            let err = append_entry(&mut archive, "f", 8, reader, &mut buf).unwrap_err();
            assert!(matches!(err, Error::File { op: "read", .. }));
        }
        let out = out.into_inner();
        assert!(!out.is_empty());
        assert!(zip::ZipArchive::new(Cursor::new(out)).is_err());
    }

    #[test]
    fn dropped_writer_leaves_no_index() {
        let mut out = Cursor::new(Vec::new());
        {
            let mut archive = ArchiveWriter::new(&mut out);
            archive.start_entry("a", 5).unwrap();
            archive.write_bytes(b"hello").unwrap();
        }
        assert!(zip::ZipArchive::new(Cursor::new(out.into_inner())).is_err());
    }

    /// Accepts `budget` bytes, fails one write, then accepts everything.
    struct HiccupDisk {
        inner: Cursor<Vec<u8>>,
        budget: Option<usize>,
    }

    impl Write for HiccupDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.budget {
                Some(0) => {
                    self.budget = None;
                    Err(io::Error::new(ErrorKind::StorageFull, "disk full"))
                }
                Some(left) => {
                    let n = buf.len().min(left);
                    self.budget = Some(left - n);
                    self.inner.write(&buf[..n])
                }
                None => self.inner.write(buf),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for HiccupDisk {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    fn noise(len: usize) -> Vec<u8> {
        let mut x = 0x2545_f491_u32;
        (0..len)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                x.to_le_bytes()[0]
            })
            .collect()
    }

    #[test]
    fn write_failure_leaves_no_index() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.data"), noise(64 * 1024)).unwrap();

        let mut sink = HiccupDisk {
            inner: Cursor::new(Vec::new()),
            budget: Some(4096),
        };
        assert!(ArchiveCollector::new(dir.path()).collect(&mut sink).is_err());
        assert!(sink.budget.is_none());
        assert!(zip::ZipArchive::new(Cursor::new(sink.inner.into_inner())).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_aborts_collection() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.data");
        fs::write(&path, b"secret").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o000)).unwrap();
        if File::open(&path).is_ok() {
            // Running as root; permissions are not enforced.
            return;
        }
        let err = collect_into_vec(&ArchiveCollector::new(dir.path())).unwrap_err();
        assert!(matches!(err, Error::File { op: "open", .. }));
    }
}
