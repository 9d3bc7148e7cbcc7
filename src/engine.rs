//! `SelfState`, the protocol reactor's message handlers (§4.4), and the
//! peer bootstrap (§4.6) that wires the static peer directory into live
//! sessions.

use std::{collections::HashMap, collections::HashSet, sync::Arc};

use rand::seq::SliceRandom;
use tokio::{
    net::TcpListener,
    sync::{Mutex, Notify},
};

use crate::{
    codec::Message,
    conf::Conf,
    error::{Error, Result},
    logging,
    piece_map::PieceMap,
    scheduler,
    session::{self, Command, CommandSender},
    storage::FileStore,
    PeerId, PieceIndex,
};

/// The engine's view of one live link, mirroring `NeighborSession` (§3).
pub(crate) struct SessionHandle {
    pub cmd_tx: CommandSender,
    pub remote_map: PieceMap,
    pub am_choking: bool,
    pub peer_choking_me: bool,
    pub peer_interested_in_me: bool,
    pub i_am_interested_in_peer: bool,
    pub downloaded_bytes_this_interval: u64,
}

/// `SelfState` of §3: the local map, live sessions, and the scheduler's
/// current selections, all behind one lock.
pub(crate) struct SelfState {
    pub local_map: PieceMap,
    pub sessions: HashMap<PeerId, SessionHandle>,
    pub preferred: HashSet<PeerId>,
    pub optimistic: Option<PeerId>,
    completed: bool,
}

/// The running engine for one peer process.
pub struct Engine {
    pub conf: Conf,
    pub local_id: PeerId,
    pub(crate) store: FileStore,
    pub(crate) state: Mutex<SelfState>,
    done: Notify,
}

impl Engine {
    /// Builds a new engine. `is_seed` comes from the local peer's directory
    /// entry and seeds the initial local piece map (full for a seeder,
    /// empty for a leecher).
    pub fn new(conf: Conf, local_id: PeerId, store: FileStore, is_seed: bool) -> Arc<Self> {
        let piece_count = conf.common.piece_count();
        let local_map = if is_seed {
            PieceMap::new_full(piece_count)
        } else {
            PieceMap::new(piece_count)
        };
        Arc::new(Self {
            conf,
            local_id,
            store,
            state: Mutex::new(SelfState {
                local_map,
                sessions: HashMap::new(),
                preferred: HashSet::new(),
                optimistic: None,
                completed: false,
            }),
            done: Notify::new(),
        })
    }

    pub fn piece_count(&self) -> usize {
        self.conf.common.piece_count()
    }

    /// Runs bootstrap (§4.6) and the choking scheduler (§4.5), and returns
    /// once the completion detector fires.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let local_entry = self
            .conf
            .peers
            .get(self.local_id)
            .ok_or_else(|| Error::Config(format!("peer id {} not in PeerInfo.cfg", self.local_id)))?
            .clone();

        let listener = TcpListener::bind(("0.0.0.0", local_entry.port))
            .await
            .map_err(Error::Bind)?;

        let accept_engine = Arc::clone(&self);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, addr)) => {
                        let engine = Arc::clone(&accept_engine);
                        tokio::spawn(async move {
                            if let Err(e) = session::run_inbound(engine, socket, addr).await {
                                log::warn!("inbound session from {} ended: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        log::warn!("accept failed: {}", e);
                    }
                }
            }
        });

        for peer in self.conf.peers.earlier_than(self.local_id).cloned().collect::<Vec<_>>() {
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = session::run_outbound(engine, peer.clone()).await {
                    log::warn!("outbound session to {} failed: {}", peer.id, e);
                }
            });
        }

        scheduler::spawn(Arc::clone(&self));

        self.done.notified().await;
        Ok(())
    }

    pub(crate) async fn register_session(&self, remote_id: PeerId, cmd_tx: CommandSender) {
        let mut state = self.state.lock().await;
        state.sessions.insert(
            remote_id,
            SessionHandle {
                cmd_tx,
                remote_map: PieceMap::new(self.piece_count()),
                am_choking: true,
                peer_choking_me: true,
                peer_interested_in_me: false,
                i_am_interested_in_peer: false,
                downloaded_bytes_this_interval: 0,
            },
        );
    }

    pub(crate) async fn remove_session(&self, remote_id: PeerId) {
        let mut state = self.state.lock().await;
        state.sessions.remove(&remote_id);
        state.preferred.remove(&remote_id);
        if state.optimistic == Some(remote_id) {
            state.optimistic = None;
        }
    }

    pub(crate) async fn local_bitfield(&self) -> PieceMap {
        self.state.lock().await.local_map.clone()
    }

    pub(crate) async fn handle_bitfield(&self, remote_id: PeerId, map: PieceMap) -> Result<()> {
        let mut state = self.state.lock().await;
        let interesting = state.local_map.is_interesting(&map);
        let cmd_tx = {
            let session = state
                .sessions
                .get_mut(&remote_id)
                .ok_or(Error::PeerDisconnect)?;
            session.remote_map = map;
            session.i_am_interested_in_peer = interesting;
            session.cmd_tx.clone()
        };
        drop(state);

        let msg = if interesting {
            Message::Interested
        } else {
            Message::NotInterested
        };
        let _ = cmd_tx.send(Command::Send(msg));
        self.maybe_finish().await;
        Ok(())
    }

    pub(crate) async fn handle_have(&self, remote_id: PeerId, index: PieceIndex) -> Result<()> {
        logging::log_received_have(self.local_id, remote_id, index);

        let mut state = self.state.lock().await;
        let cmd_tx = state
            .sessions
            .get(&remote_id)
            .ok_or(Error::PeerDisconnect)?
            .cmd_tx
            .clone();

        let local_map = state.local_map.clone();
        let session = state.sessions.get_mut(&remote_id).unwrap();
        session.remote_map.set(index);
        let now_interesting = !session.i_am_interested_in_peer
            && local_map.is_interesting(&session.remote_map);
        if now_interesting {
            session.i_am_interested_in_peer = true;
        }
        drop(state);

        if now_interesting {
            let _ = cmd_tx.send(Command::Send(Message::Interested));
        }
        self.maybe_finish().await;
        Ok(())
    }

    pub(crate) async fn handle_interested(&self, remote_id: PeerId) -> Result<()> {
        logging::log_received_interested(self.local_id, remote_id);
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(&remote_id)
            .ok_or(Error::PeerDisconnect)?;
        session.peer_interested_in_me = true;
        Ok(())
    }

    pub(crate) async fn handle_not_interested(&self, remote_id: PeerId) -> Result<()> {
        logging::log_received_not_interested(self.local_id, remote_id);
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(&remote_id)
            .ok_or(Error::PeerDisconnect)?;
        session.peer_interested_in_me = false;
        Ok(())
    }

    pub(crate) async fn handle_choke(&self, remote_id: PeerId) -> Result<()> {
        logging::log_choked_by(self.local_id, remote_id);
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(&remote_id)
            .ok_or(Error::PeerDisconnect)?;
        session.peer_choking_me = true;
        Ok(())
    }

    pub(crate) async fn handle_unchoke(&self, remote_id: PeerId) -> Result<()> {
        logging::log_unchoked_by(self.local_id, remote_id);

        let mut state = self.state.lock().await;
        let local_map = state.local_map.clone();
        let (cmd_tx, request) = {
            let session = state
                .sessions
                .get_mut(&remote_id)
                .ok_or(Error::PeerDisconnect)?;
            session.peer_choking_me = false;
            let missing: Vec<_> = local_map.missing_from_self(&session.remote_map).collect();
            let request = missing.choose(&mut rand::thread_rng()).copied();
            (session.cmd_tx.clone(), request)
        };

        let outgoing = match request {
            Some(index) => Command::Send(Message::Request(index)),
            None => {
                state
                    .sessions
                    .get_mut(&remote_id)
                    .unwrap()
                    .i_am_interested_in_peer = false;
                Command::Send(Message::NotInterested)
            }
        };
        drop(state);

        let _ = cmd_tx.send(outgoing);
        Ok(())
    }

    pub(crate) async fn handle_request(&self, remote_id: PeerId, index: PieceIndex) -> Result<()> {
        let (am_choking, cmd_tx) = {
            let state = self.state.lock().await;
            let session = state.sessions.get(&remote_id).ok_or(Error::PeerDisconnect)?;
            (session.am_choking, session.cmd_tx.clone())
        };
        if am_choking {
            return Ok(());
        }
        let data = self.store.read_piece(index).await?;
        let _ = cmd_tx.send(Command::Send(Message::Piece { index, data }));
        Ok(())
    }

    pub(crate) async fn handle_piece(
        &self,
        remote_id: PeerId,
        index: PieceIndex,
        data: Vec<u8>,
    ) -> Result<()> {
        let len = data.len() as u64;
        if let Err(e) = self.store.write_piece(index, data).await {
            log::warn!(
                "Peer {} failed to save piece {} from {} to disk: {}",
                self.local_id,
                index,
                remote_id,
                e
            );
            return Ok(());
        }

        let mut state = self.state.lock().await;
        state.local_map.set(index);
        if let Some(session) = state.sessions.get_mut(&remote_id) {
            session.downloaded_bytes_this_interval += len;
        }
        let have_count = state.local_map.count();
        logging::log_downloaded_piece(self.local_id, index, remote_id, have_count);

        let broadcast_targets: Vec<_> =
            state.sessions.values().map(|s| s.cmd_tx.clone()).collect();

        let local_map = state.local_map.clone();
        let next = state.sessions.get_mut(&remote_id).and_then(|session| {
            if session.peer_choking_me {
                return None;
            }
            let missing: Vec<_> = local_map.missing_from_self(&session.remote_map).collect();
            if let Some(index) = missing.choose(&mut rand::thread_rng()).copied() {
                Some((session.cmd_tx.clone(), Command::Send(Message::Request(index))))
            } else {
                session.i_am_interested_in_peer = false;
                Some((session.cmd_tx.clone(), Command::Send(Message::NotInterested)))
            }
        });
        drop(state);

        for tx in &broadcast_targets {
            let _ = tx.send(Command::Send(Message::Have(index)));
        }
        if let Some((tx, cmd)) = next {
            let _ = tx.send(cmd);
        }

        self.maybe_finish().await;
        Ok(())
    }

    /// Checks §4.6's completion condition and, the first time it holds,
    /// logs the completion line and releases `run`.
    async fn maybe_finish(&self) {
        let mut state = self.state.lock().await;
        if state.completed || state.sessions.is_empty() {
            return;
        }
        let all_remotes_complete = state.sessions.values().all(|s| s.remote_map.is_complete());
        if state.local_map.is_complete() && all_remotes_complete {
            state.completed = true;
            drop(state);
            logging::log_downloaded_complete_file(self.local_id);
            self.done.notify_one();
        }
    }
}
