//! The choking scheduler (§4.5): two independent periodic tasks that pick
//! the preferred-neighbor set and the optimistic neighbor and drive the
//! resulting choke/unchoke sends.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::time;

use crate::{codec::Message, engine::Engine, logging, session::Command, PeerId};

/// Spawns both scheduler tasks, sharing the engine's mutual-exclusion
/// domain with the reactor (§5). They run until the process exits.
pub fn spawn(engine: Arc<Engine>) {
    let preferred_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        run_preferred_neighbor_selection(preferred_engine).await;
    });

    tokio::spawn(async move {
        run_optimistic_unchoke_selection(engine).await;
    });
}

async fn run_preferred_neighbor_selection(engine: Arc<Engine>) {
    let mut ticker = time::interval(engine.conf.common.unchoking_interval);
    loop {
        ticker.tick().await;
        select_preferred_neighbors(&engine).await;
    }
}

async fn run_optimistic_unchoke_selection(engine: Arc<Engine>) {
    let mut ticker = time::interval(engine.conf.common.optimistic_unchoking_interval);
    loop {
        ticker.tick().await;
        select_optimistic_neighbor(&engine).await;
    }
}

async fn select_preferred_neighbors(engine: &Arc<Engine>) {
    let k = engine.conf.common.number_of_preferred_neighbors;
    let mut state = engine.state.lock().await;

    let is_seeder = state.local_map.is_complete();
    let mut interested: Vec<PeerId> = state
        .sessions
        .iter()
        .filter(|(_, s)| s.peer_interested_in_me)
        .map(|(id, _)| *id)
        .collect();

    let new_preferred: std::collections::HashSet<PeerId> = if is_seeder {
        interested.shuffle(&mut rand::thread_rng());
        interested.into_iter().take(k).collect()
    } else {
        // shuffle first so ties between equal byte counts break randomly
        // under the following stable sort.
        interested.shuffle(&mut rand::thread_rng());
        interested.sort_by_key(|id| {
            std::cmp::Reverse(state.sessions[id].downloaded_bytes_this_interval)
        });
        interested.into_iter().take(k).collect()
    };

    let optimistic = state.optimistic;
    // the optimistic neighbor can legitimately be picked into the new
    // preferred set (§4.5); when that happens it's no longer "additional to"
    // the preferred set, so the slot is freed for the next optimistic cycle
    // and the invariant PreferredNeighbors ∩ {optimisticNeighbor} = ∅ holds.
    if let Some(id) = optimistic {
        if new_preferred.contains(&id) {
            state.optimistic = None;
        }
    }

    let mut to_unchoke = Vec::new();
    let mut to_choke = Vec::new();
    for (id, session) in state.sessions.iter_mut() {
        let is_optimistic = optimistic == Some(*id);
        if new_preferred.contains(id) {
            if session.am_choking && !is_optimistic {
                session.am_choking = false;
                to_unchoke.push((session.cmd_tx.clone(), *id));
            }
        } else if !is_optimistic && !session.am_choking {
            session.am_choking = true;
            to_choke.push((session.cmd_tx.clone(), *id));
        }
        session.downloaded_bytes_this_interval = 0;
    }
    state.preferred = new_preferred.clone();
    drop(state);

    for (tx, _) in &to_unchoke {
        let _ = tx.send(Command::Send(Message::Unchoke));
    }
    for (tx, _) in &to_choke {
        let _ = tx.send(Command::Send(Message::Choke));
    }

    let mut ids: Vec<_> = new_preferred.into_iter().collect();
    ids.sort_unstable();
    logging::log_preferred_neighbors(engine.local_id, &ids);
}

async fn select_optimistic_neighbor(engine: &Arc<Engine>) {
    let mut state = engine.state.lock().await;

    let candidates: Vec<PeerId> = state
        .sessions
        .iter()
        .filter(|(id, s)| {
            s.peer_interested_in_me && s.am_choking && !state.preferred.contains(id)
        })
        .map(|(id, _)| *id)
        .collect();

    let chosen = candidates.choose(&mut rand::thread_rng()).copied();
    let Some(chosen) = chosen else {
        return;
    };

    state.optimistic = Some(chosen);
    let cmd_tx = {
        let session = state.sessions.get_mut(&chosen).expect("candidate vanished under lock");
        session.am_choking = false;
        session.cmd_tx.clone()
    };
    drop(state);

    let _ = cmd_tx.send(Command::Send(Message::Unchoke));
    logging::log_optimistic_neighbor(engine.local_id, chosen);
}
