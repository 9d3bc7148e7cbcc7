//! Per-link connection lifecycle: handshake, codec swap, and the
//! reader/writer task pair that realize one `NeighborSession` (§3, §4.4).

use std::{net::SocketAddr, sync::Arc};

use futures::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_util::codec::{Framed, FramedParts};

use crate::{
    codec::{Handshake, HandshakeCodec, Message, PeerCodec},
    conf::PeerEntry,
    engine::Engine,
    error::{Error, Result},
    logging, PeerId,
};

/// A command sent from the reactor to a session's dedicated writer task,
/// which owns the socket's write half so frames on one link are never
/// interleaved (§5).
pub enum Command {
    Send(Message),
    Shutdown,
}

pub type CommandSender = mpsc::UnboundedSender<Command>;
type CommandReceiver = mpsc::UnboundedReceiver<Command>;

/// Connects outbound to `peer`, who must be listed strictly before us in
/// the peer directory, and runs the resulting session.
pub async fn run_outbound(engine: Arc<Engine>, peer: PeerEntry) -> Result<()> {
    let addr = format!("{}:{}", peer.host, peer.port);
    let socket = TcpStream::connect(&addr)
        .await
        .map_err(|source| Error::Connect { remote: peer.id, source })?;
    logging::log_makes_connection(engine.local_id, peer.id);

    let mut framed = Framed::new(socket, HandshakeCodec);
    framed.send(Handshake::new(engine.local_id)).await?;
    let remote_handshake = framed.next().await.ok_or(Error::PeerDisconnect)??;

    let socket = swap_to_peer_codec(framed, engine.piece_count());
    run(engine, remote_handshake.peer_id, socket).await
}

/// Completes an inbound handshake on a freshly accepted socket and runs the
/// resulting session.
pub async fn run_inbound(engine: Arc<Engine>, socket: TcpStream, _addr: SocketAddr) -> Result<()> {
    let mut framed = Framed::new(socket, HandshakeCodec);
    let remote_handshake = framed.next().await.ok_or(Error::PeerDisconnect)??;
    framed.send(Handshake::new(engine.local_id)).await?;
    logging::log_connected_from(engine.local_id, remote_handshake.peer_id);

    let socket = swap_to_peer_codec(framed, engine.piece_count());
    run(engine, remote_handshake.peer_id, socket).await
}

/// Swaps a `Framed`'s codec from the one-shot `HandshakeCodec` to the
/// ongoing `PeerCodec`, reusing the read/write buffers so no bytes the
/// remote sent immediately after its handshake are lost.
fn swap_to_peer_codec(
    framed: Framed<TcpStream, HandshakeCodec>,
    piece_count: usize,
) -> Framed<TcpStream, PeerCodec> {
    let old_parts = framed.into_parts();
    let mut new_parts = FramedParts::new(old_parts.io, PeerCodec::new(piece_count));
    new_parts.read_buf = old_parts.read_buf;
    new_parts.write_buf = old_parts.write_buf;
    Framed::from_parts(new_parts)
}

/// Registers the session with the engine, sends the local bitfield as the
/// first typed message (§4.6), then runs the reader loop until the stream
/// ends or a framing error tears the link down.
async fn run(engine: Arc<Engine>, remote_id: PeerId, socket: Framed<TcpStream, PeerCodec>) -> Result<()> {
    let (sink, mut stream) = socket.split();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    engine.register_session(remote_id, cmd_tx.clone()).await;

    tokio::spawn(run_writer(sink, cmd_rx));

    let local_bitfield = engine.local_bitfield().await;
    let _ = cmd_tx.send(Command::Send(Message::Bitfield(local_bitfield)));

    let result = async {
        while let Some(msg) = stream.next().await {
            let msg = msg?;
            dispatch(&engine, remote_id, msg).await?;
        }
        Ok(())
    }
    .await;

    engine.remove_session(remote_id).await;
    let _ = cmd_tx.send(Command::Shutdown);

    result
}

/// Dispatches one decoded message to the engine's reactor handlers (§4.4).
async fn dispatch(engine: &Arc<Engine>, remote_id: PeerId, msg: Message) -> Result<()> {
    match msg {
        Message::Bitfield(map) => engine.handle_bitfield(remote_id, map).await,
        Message::Have(index) => engine.handle_have(remote_id, index).await,
        Message::Interested => engine.handle_interested(remote_id).await,
        Message::NotInterested => engine.handle_not_interested(remote_id).await,
        Message::Choke => engine.handle_choke(remote_id).await,
        Message::Unchoke => engine.handle_unchoke(remote_id).await,
        Message::Request(index) => engine.handle_request(remote_id, index).await,
        Message::Piece { index, data } => engine.handle_piece(remote_id, index, data).await,
    }
}

/// Owns the socket's write half for the lifetime of the session, draining
/// outbound commands one at a time so frames are never interleaved.
async fn run_writer(
    mut sink: futures::stream::SplitSink<Framed<TcpStream, PeerCodec>, Message>,
    mut cmd_rx: CommandReceiver,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::Send(msg) => {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            Command::Shutdown => break,
        }
    }
}
