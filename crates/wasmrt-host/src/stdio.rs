//! Stdio files.
//!
//! Adapters exposing host readers and writers as [`File`]s for a guest's
//! stdin, stdout and stderr. All of them stat as character devices. When the
//! host supplies no stream, the no-op variants are used: stdin is always at
//! end of file, stdout discards what it is given.

use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;

use crate::fsapi::{Errno, File, FileType, Stat};

/// Name of the stdin entry.
pub const STDIN: &str = "stdin";
/// Name of the stdout entry.
pub const STDOUT: &str = "stdout";
/// Name of the stderr entry.
pub const STDERR: &str = "stderr";

fn device_stat() -> Stat {
    Stat {
        file_type: FileType::CharacterDevice,
        nlink: 1,
        ..Stat::default()
    }
}

/// Stdin that is always at end of file and always ready.
#[derive(Debug, Default)]
pub struct NoopStdin;

impl File for NoopStdin {
    fn stat(&self) -> Result<Stat, Errno> {
        Ok(device_stat())
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Errno> {
        Ok(0)
    }

    fn poll_read(&mut self, _timeout: Option<Duration>) -> Result<bool, Errno> {
        Ok(true)
    }
}

/// Stdout or stderr that discards everything written.
#[derive(Debug, Default)]
pub struct NoopStdout;

impl File for NoopStdout {
    fn stat(&self) -> Result<Stat, Errno> {
        Ok(device_stat())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Errno> {
        Ok(buf.len())
    }
}

/// Stdin backed by a host reader.
pub struct StdinFile<R> {
    reader: R,
}

impl<R: Read + Send> StdinFile<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R> fmt::Debug for StdinFile<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdinFile").finish_non_exhaustive()
    }
}

impl<R: Read + Send> File for StdinFile<R> {
    fn stat(&self) -> Result<Stat, Errno> {
        Ok(device_stat())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Errno> {
        self.reader.read(buf).map_err(Errno::from)
    }

    fn poll_read(&mut self, _timeout: Option<Duration>) -> Result<bool, Errno> {
        Ok(true)
    }
}

/// Stdout or stderr backed by a host writer.
pub struct WriterFile<W> {
    writer: W,
}

impl<W: Write + Send> WriterFile<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W> fmt::Debug for WriterFile<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterFile").finish_non_exhaustive()
    }
}

impl<W: Write + Send> File for WriterFile<W> {
    fn stat(&self) -> Result<Stat, Errno> {
        Ok(device_stat())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Errno> {
        self.writer.write(buf).map_err(Errno::from)
    }

    fn sync(&mut self) -> Result<(), Errno> {
        self.writer.flush().map_err(Errno::from)
    }
}

/// An entry of a guest file table.
pub struct FileEntry {
    /// Name the guest sees.
    pub name: String,

    /// Whether the host opened the file before the guest started.
    pub is_preopen: bool,

    pub file: Box<dyn File>,
}

impl fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry")
            .field("name", &self.name)
            .field("is_preopen", &self.is_preopen)
            .finish_non_exhaustive()
    }
}

/// Stdin entry reading from `reader`, or always at end of file without one.
pub fn stdin_file_entry(reader: Option<Box<dyn Read + Send>>) -> FileEntry {
    let file: Box<dyn File> = match reader {
        Some(reader) => Box::new(StdinFile::new(reader)),
        None => Box::new(NoopStdin),
    };
    FileEntry {
        name: STDIN.to_string(),
        is_preopen: true,
        file,
    }
}

/// Stdout or stderr entry named `name`, writing to `writer` or discarding
/// without one.
pub fn stdio_writer_file_entry(
    name: impl Into<String>,
    writer: Option<Box<dyn Write + Send>>,
) -> FileEntry {
    let file: Box<dyn File> = match writer {
        Some(writer) => Box::new(WriterFile::new(writer)),
        None => Box::new(NoopStdout),
    };
    FileEntry {
        name: name.into(),
        is_preopen: true,
        file,
    }
}
