//! The engine supervisor / CLI entry point (§9.4).
//!
//! Usage: `peer_process <PeerId>`, run from a working directory containing
//! `Common.cfg` and `PeerInfo.cfg`.

use std::process::ExitCode;

use p2p_file_sharing_peer::{conf::Conf, engine::Engine, storage::FileStore, PeerId};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let local_id = match parse_args() {
        Ok(id) => id,
        Err(msg) => {
            eprintln!("{}", msg);
            return ExitCode::FAILURE;
        }
    };

    let verbose = std::env::var("PEER_VERBOSE").is_ok();
    if let Err(e) = p2p_file_sharing_peer::logging::install(".", local_id, verbose) {
        eprintln!("failed to open log file for peer {}: {}", local_id, e);
        return ExitCode::FAILURE;
    }

    let conf = match Conf::load(".") {
        Ok(conf) => conf,
        Err(e) => {
            log::warn!("failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let local_entry = match conf.peers.get(local_id) {
        Some(entry) => entry.clone(),
        None => {
            log::warn!("peer id {} is not listed in PeerInfo.cfg", local_id);
            return ExitCode::FAILURE;
        }
    };

    for entry in conf.peers.entries() {
        let dir = std::path::PathBuf::from(format!("peer_{}", entry.id));
        if let Err(e) = std::fs::create_dir_all(&dir) {
            log::warn!("failed to create {:?}: {}", dir, e);
            return ExitCode::FAILURE;
        }
    }
    let peer_dir = std::path::PathBuf::from(format!("peer_{}", local_id));

    let store = match FileStore::open(
        peer_dir.join(&conf.common.file_name),
        conf.common.file_size,
        conf.common.piece_size,
        local_entry.is_seed,
    ) {
        Ok(store) => store,
        Err(e) => {
            log::warn!("failed to open file store: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let engine = Engine::new(conf, local_id, store, local_entry.is_seed);
    match engine.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::warn!("engine exited with error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn parse_args() -> Result<PeerId, String> {
    let mut args = std::env::args();
    let _program = args.next();
    let id_arg = args
        .next()
        .ok_or_else(|| "usage: peer_process <PeerId>".to_string())?;
    id_arg
        .parse::<PeerId>()
        .map_err(|e| format!("invalid PeerId {:?}: {}", id_arg, e))
}
