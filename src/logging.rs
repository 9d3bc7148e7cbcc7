//! The per-peer log file and the §6 line templates (§9.1).
//!
//! A single [`PeerLogger`] is installed once at process start. It writes
//! every `log::info!` "protocol narration" line -- the exact templates this
//! module's helper functions produce -- to `log_peer_<P>.log`, one per line,
//! prefixed with a `[HH:MM:SS]` timestamp. `debug`/`trace`/`warn` diagnostic
//! lines are written to the same file and, when `verbose` is set, mirrored
//! to stderr.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::Mutex,
};

use chrono::Local;
use log::{Level, Log, Metadata, Record};

use crate::PeerId;

struct PeerLogger {
    file: Mutex<File>,
    verbose: bool,
}

impl Log for PeerLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{}]: {}",
            Local::now().format("%H:%M:%S"),
            record.args()
        );

        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{}", line);
        }
        if self.verbose && record.level() <= Level::Warn {
            eprintln!("{}", line);
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Installs the process-wide logger, truncating `log_peer_<local_id>.log` at
/// `dir`.
pub fn install(dir: impl AsRef<Path>, local_id: PeerId, verbose: bool) -> std::io::Result<()> {
    let path = dir.as_ref().join(format!("log_peer_{}.log", local_id));
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    let logger = PeerLogger {
        file: Mutex::new(file),
        verbose,
    };
    log::set_boxed_logger(Box::new(logger))
        .map(|()| log::set_max_level(log::LevelFilter::Trace))
        .expect("logger already installed");
    Ok(())
}

pub fn log_makes_connection(me: PeerId, remote: PeerId) {
    log::info!("Peer {} makes a connection to Peer {}.", me, remote);
}

pub fn log_connected_from(me: PeerId, remote: PeerId) {
    log::info!("Peer {} is connected from Peer {}.", me, remote);
}

pub fn log_preferred_neighbors(me: PeerId, ids: &[PeerId]) {
    let joined = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    log::info!("Peer {} has the preferred neighbors {}.", me, joined);
}

pub fn log_optimistic_neighbor(me: PeerId, id: PeerId) {
    log::info!("Peer {} has the optimistically unchoked neighbor {}.", me, id);
}

pub fn log_unchoked_by(me: PeerId, remote: PeerId) {
    log::info!("Peer {} is unchoked by {}.", me, remote);
}

pub fn log_choked_by(me: PeerId, remote: PeerId) {
    log::info!("Peer {} is choked by {}.", me, remote);
}

pub fn log_received_have(me: PeerId, remote: PeerId, index: crate::PieceIndex) {
    log::info!(
        "Peer {} received the 'have' message from {} for the piece {}.",
        me,
        remote,
        index
    );
}

pub fn log_received_interested(me: PeerId, remote: PeerId) {
    log::info!("Peer {} received the 'interested' message from {}.", me, remote);
}

pub fn log_received_not_interested(me: PeerId, remote: PeerId) {
    log::info!(
        "Peer {} received the 'not interested' message from {}.",
        me,
        remote
    );
}

pub fn log_downloaded_piece(
    me: PeerId,
    index: crate::PieceIndex,
    remote: PeerId,
    have_count: usize,
) {
    log::info!(
        "Peer {} has downloaded the piece {} from {}. Now the number of pieces it has is {}.",
        me,
        index,
        remote,
        have_count
    );
}

pub fn log_downloaded_complete_file(me: PeerId) {
    log::info!("Peer {} has downloaded the complete file.", me);
}
