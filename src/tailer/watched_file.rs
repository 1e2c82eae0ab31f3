// SPDX-License-Identifier: Apache-2.0

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::tailer::file_id::FileId;
use crate::tailer::line_splitter::LineSplitter;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Result of draining a file up to its current end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// Reached end of file.
    Eof,
    /// The line callback asked to stop, the tailer is shutting down.
    Stopped,
}

/// A file being tailed: its open handle, read position and pending partial line.
///
/// The handle is owned here and closed when the value is dropped.
#[derive(Debug)]
pub(crate) struct WatchedFile {
    id: FileId,
    path: PathBuf,
    dir: PathBuf,
    file: File,
    offset: u64,
    splitter: LineSplitter,
}

impl WatchedFile {
    /// Opens `path`, positioned at the start when `readall` is set and at the
    /// current end otherwise.
    pub(crate) fn open(path: &Path, dir: &Path, readall: bool) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let id = FileId::from_file(&file)?;
        let offset = if readall {
            0
        } else {
            file.seek(SeekFrom::End(0))?
        };

        Ok(Self {
            id,
            path: path.to_path_buf(),
            dir: dir.to_path_buf(),
            file,
            offset,
            splitter: LineSplitter::new(),
        })
    }

    pub(crate) fn id(&self) -> FileId {
        self.id
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    /// Records a new name for the same underlying file. Offset and partial
    /// line are kept.
    pub(crate) fn set_path(&mut self, path: &Path, dir: &Path) {
        self.path = path.to_path_buf();
        self.dir = dir.to_path_buf();
    }

    /// Rewinds to the start if the file shrank below the read offset, which
    /// happens with copy-truncate rotation. Returns true when it rewound.
    pub(crate) fn rewind_if_truncated(&mut self) -> io::Result<bool> {
        let size = self.file.metadata()?.len();
        if self.offset <= size {
            return Ok(false);
        }
        self.file.seek(SeekFrom::Start(0))?;
        self.offset = 0;
        self.splitter.clear();
        Ok(true)
    }

    /// Reads everything up to the current end of file and hands each complete
    /// line to `emit`. Reading stops early when `emit` returns false.
    pub(crate) fn read_lines(
        &mut self,
        mut emit: impl FnMut(String) -> bool,
    ) -> io::Result<ReadOutcome> {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let n = match self.file.read(&mut buf) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            self.offset += n as u64;

            self.splitter.push(&buf[..n]);
            while let Some(line) = self.splitter.next_line() {
                if !emit(line) {
                    return Ok(ReadOutcome::Stopped);
                }
            }
        }
    }
}
