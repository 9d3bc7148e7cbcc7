//! On-disk storage for the single shared file (§4.7).
//!
//! A leecher preallocates the full file, zero-filled, before accepting any
//! piece; a seed opens the already-complete file read/write. All actual IO
//! happens on the blocking thread pool via [`tokio::task::spawn_blocking`] so
//! a slow disk never stalls the reactor that's juggling every peer link.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::{error::Error, piece_count, piece_len, PieceIndex};

/// A handle to the single shared file backing a running engine.
///
/// Cheaply cloneable: the open file handle is shared behind an `Arc<Mutex<_>>`
/// so every session's read/write calls serialize on the one descriptor,
/// matching the one-file-handle-per-file layout the disk actor this is
/// grounded on uses for a single-file torrent.
#[derive(Clone)]
pub struct FileStore {
    file: Arc<Mutex<File>>,
    file_size: u64,
    piece_size: u32,
}

impl FileStore {
    /// Opens (or creates) the shared file at `path`.
    ///
    /// `is_seed` peers are expected to already have a complete file at
    /// `path`, which is opened as-is without truncation. Leechers have the
    /// file created and preallocated to `file_size` zero bytes, per §4.7's
    /// requirement that a piece write always lands at a valid, existing
    /// offset.
    pub fn open(
        path: impl AsRef<Path>,
        file_size: u64,
        piece_size: u32,
        is_seed: bool,
    ) -> Result<Self, Error> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(!is_seed)
            .open(&path)?;
        if !is_seed {
            file.set_len(file_size)?;
        }
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            file_size,
            piece_size,
        })
    }

    /// The number of pieces the file is divided into.
    pub fn piece_count(&self) -> usize {
        piece_count(self.file_size, self.piece_size)
    }

    /// The byte length of the piece at `index`.
    pub fn piece_len(&self, index: PieceIndex) -> u32 {
        piece_len(self.file_size, self.piece_size, index)
    }

    /// Reads the bytes of piece `index` off disk.
    pub async fn read_piece(&self, index: PieceIndex) -> Result<Vec<u8>, Error> {
        let count = self.piece_count();
        if index >= count {
            return Err(Error::InvalidPieceIndex(index));
        }
        let offset = index as u64 * self.piece_size as u64;
        let len = self.piece_len(index);
        let file = Arc::clone(&self.file);

        tokio::task::spawn_blocking(move || {
            let mut file = file.lock().expect("file store mutex poisoned");
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = vec![0u8; len as usize];
            file.read_exact(&mut buf)?;
            Ok(buf)
        })
        .await
        .expect("disk read task panicked")
    }

    /// Writes `data` as the full contents of piece `index`.
    ///
    /// `data` must be exactly the piece's expected byte length; anything
    /// else is a protocol violation rather than a legitimate short write, so
    /// it's rejected up front instead of silently truncated or zero-padded.
    pub async fn write_piece(&self, index: PieceIndex, data: Vec<u8>) -> Result<(), Error> {
        let count = self.piece_count();
        if index >= count {
            return Err(Error::InvalidPieceIndex(index));
        }
        let expected_len = self.piece_len(index) as usize;
        if data.len() != expected_len {
            return Err(Error::MalformedFrame(format!(
                "piece {} write: expected {} bytes, got {}",
                index,
                expected_len,
                data.len()
            )));
        }
        let offset = index as u64 * self.piece_size as u64;
        let file = Arc::clone(&self.file);

        tokio::task::spawn_blocking(move || {
            let mut file = file.lock().expect("file store mutex poisoned");
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&data)?;
            Ok(())
        })
        .await
        .expect("disk write task panicked")
    }
}
