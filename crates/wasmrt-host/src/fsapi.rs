//! File abstraction for host-provided files.
//!
//! [`File`] is the capability guest-facing file tables are built from. Every
//! operation has a default: unsupported operations fail with
//! [`Errno::NoSys`], while `sync`, `datasync` and `close` succeed. An
//! implementation overrides only what it supports.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// POSIX-style error numbers returned by file operations.
///
/// Success is `Ok(..)`; there is no zero value.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    #[error("function not implemented")]
    NoSys,

    #[error("bad file descriptor")]
    BadF,

    #[error("is a directory")]
    IsDir,

    #[error("invalid argument")]
    Inval,

    #[error("I/O error")]
    Io,

    #[error("interrupted system call")]
    Intr,

    #[error("resource temporarily unavailable")]
    Again,
}

impl From<&io::Error> for Errno {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::Interrupted => Errno::Intr,
            io::ErrorKind::WouldBlock => Errno::Again,
            io::ErrorKind::InvalidInput => Errno::Inval,
            io::ErrorKind::Unsupported => Errno::NoSys,
            io::ErrorKind::IsADirectory => Errno::IsDir,
            _ => Errno::Io,
        }
    }
}

impl From<io::Error> for Errno {
    fn from(err: io::Error) -> Self {
        Errno::from(&err)
    }
}

/// Type of a file, as reported by [`Stat`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileType {
    #[default]
    Unknown,
    CharacterDevice,
    Directory,
    RegularFile,
}

/// File metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    pub dev: u64,
    pub ino: u64,
    pub file_type: FileType,
    pub nlink: u64,
    pub size: u64,
}

/// Reference point for [`File::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Current,
    End,
}

/// A file opened by the host on behalf of a guest.
#[allow(unused_variables)]
pub trait File: Send {
    /// Device number. Zero when unknown.
    fn dev(&self) -> Result<u64, Errno> {
        Ok(0)
    }

    /// Inode number. Zero when unknown.
    fn ino(&self) -> Result<u64, Errno> {
        Ok(0)
    }

    fn is_dir(&self) -> Result<bool, Errno> {
        Ok(false)
    }

    fn is_append(&self) -> bool {
        false
    }

    fn set_append(&mut self, enable: bool) -> Result<(), Errno> {
        Err(Errno::NoSys)
    }

    fn is_nonblock(&self) -> bool {
        false
    }

    fn set_nonblock(&mut self, enable: bool) -> Result<(), Errno> {
        Err(Errno::NoSys)
    }

    fn stat(&self) -> Result<Stat, Errno> {
        Err(Errno::NoSys)
    }

    /// Read into `buf`. `Ok(0)` is end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Errno> {
        Err(Errno::NoSys)
    }

    /// Read at `offset` without moving the file position.
    fn pread(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, Errno> {
        Err(Errno::NoSys)
    }

    /// Move the file position and return the new one.
    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, Errno> {
        Err(Errno::NoSys)
    }

    /// Whether a read would not block, waiting up to `timeout`. `None` waits
    /// forever.
    fn poll_read(&mut self, timeout: Option<Duration>) -> Result<bool, Errno> {
        Err(Errno::NoSys)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Errno> {
        Err(Errno::NoSys)
    }

    fn pwrite(&mut self, buf: &[u8], offset: u64) -> Result<usize, Errno> {
        Err(Errno::NoSys)
    }

    fn truncate(&mut self, size: u64) -> Result<(), Errno> {
        Err(Errno::NoSys)
    }

    fn sync(&mut self) -> Result<(), Errno> {
        Ok(())
    }

    fn datasync(&mut self) -> Result<(), Errno> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), Errno> {
        Ok(())
    }
}
