//! Wire framing (§4.1): the one-shot 32 byte handshake and the
//! length-prefixed typed messages that follow it.
//!
//! Two `tokio_util::codec` adapters are provided, following the same
//! technique the engine uses elsewhere in the pack: frame with
//! `HandshakeCodec` first, then, once the handshake on both sides has been
//! exchanged, swap the `Framed`'s codec for `PeerCodec` while reusing its
//! read/write buffers (see [`crate::session`]).

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{error::Error, piece_map::PieceMap, PeerId, PieceIndex};

/// The fixed protocol header string, 18 bytes.
pub const PROTOCOL_STRING: &str = "P2PFILESHARINGPROJ";

const HANDSHAKE_LEN: usize = 32;
const ZERO_PADDING_LEN: usize = 10;

/// The one-shot handshake message exchanged immediately after the
/// connection is established, in both directions, before any other bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(peer_id: PeerId) -> Self {
        Self { peer_id }
    }
}

/// Frames the 32 byte handshake, in both the encode and decode direction.
///
/// A handshake is rejected (no error response, just a dropped connection) if
/// its length isn't exactly 32 bytes or if the header string doesn't match
/// verbatim.
#[derive(Clone, Copy, Debug, Default)]
pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = Error;

    fn encode(
        &mut self,
        handshake: Handshake,
        buf: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        buf.reserve(HANDSHAKE_LEN);
        buf.put_slice(PROTOCOL_STRING.as_bytes());
        buf.put_bytes(0, ZERO_PADDING_LEN);
        buf.put_u32(handshake.peer_id);
        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if buf.len() < HANDSHAKE_LEN {
            return Ok(None);
        }
        let frame = buf.split_to(HANDSHAKE_LEN);
        if &frame[0..PROTOCOL_STRING.len()] != PROTOCOL_STRING.as_bytes() {
            return Err(Error::MalformedFrame(
                "handshake header string mismatch".into(),
            ));
        }
        let peer_id_offset = PROTOCOL_STRING.len() + ZERO_PADDING_LEN;
        let peer_id = u32::from_be_bytes([
            frame[peer_id_offset],
            frame[peer_id_offset + 1],
            frame[peer_id_offset + 2],
            frame[peer_id_offset + 3],
        ]);
        Ok(Some(Handshake { peer_id }))
    }
}

/// The numeric wire value of each typed message (§4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
}

impl MessageId {
    fn from_u8(b: u8) -> Result<Self, Error> {
        match b {
            0 => Ok(Self::Choke),
            1 => Ok(Self::Unchoke),
            2 => Ok(Self::Interested),
            3 => Ok(Self::NotInterested),
            4 => Ok(Self::Have),
            5 => Ok(Self::Bitfield),
            6 => Ok(Self::Request),
            7 => Ok(Self::Piece),
            other => Err(Error::MalformedFrame(format!(
                "unknown message type {}",
                other
            ))),
        }
    }
}

/// A decoded typed message (§4.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(PieceIndex),
    Bitfield(PieceMap),
    Request(PieceIndex),
    Piece { index: PieceIndex, data: Vec<u8> },
}

impl Message {
    pub fn id(&self) -> MessageId {
        match self {
            Message::Choke => MessageId::Choke,
            Message::Unchoke => MessageId::Unchoke,
            Message::Interested => MessageId::Interested,
            Message::NotInterested => MessageId::NotInterested,
            Message::Have(_) => MessageId::Have,
            Message::Bitfield(_) => MessageId::Bitfield,
            Message::Request(_) => MessageId::Request,
            Message::Piece { .. } => MessageId::Piece,
        }
    }
}

/// Frames typed messages once the handshake has completed on a link.
///
/// Needs to know the torrent's piece count so it can correctly bound a
/// decoded bitfield's trailing padding bits (§4.2).
#[derive(Clone, Copy, Debug)]
pub struct PeerCodec {
    piece_count: usize,
    /// The length prefix of the frame currently being decoded, once known,
    /// so repeated `decode` calls don't need to reparse it while waiting for
    /// more bytes to arrive.
    frame_len: Option<u32>,
}

impl PeerCodec {
    pub fn new(piece_count: usize) -> Self {
        Self {
            piece_count,
            frame_len: None,
        }
    }

    /// Rejects a piece index carried in a `have`/`request`/`piece` payload
    /// that falls outside `[0, piece_count)`, so a malicious or buggy peer
    /// tears down the link with `MalformedFrame` (§7) rather than panicking
    /// deep inside `PieceMap::set`/`has` (piece_map.rs).
    fn check_index(&self, id: MessageId, index: PieceIndex) -> Result<(), Error> {
        if index >= self.piece_count {
            return Err(Error::MalformedFrame(format!(
                "message {:?} piece index {} out of bounds ({})",
                id, index, self.piece_count
            )));
        }
        Ok(())
    }
}

impl Encoder<Message> for PeerCodec {
    type Error = Error;

    fn encode(&mut self, msg: Message, buf: &mut BytesMut) -> Result<(), Self::Error> {
        let id = msg.id();
        match msg {
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {
                buf.reserve(5);
                buf.put_u32(0);
                buf.put_u8(id as u8);
            }
            Message::Have(index) => {
                buf.reserve(9);
                buf.put_u32(4);
                buf.put_u8(id as u8);
                buf.put_u32(index as u32);
            }
            Message::Bitfield(map) => {
                let bytes = map.to_bytes();
                buf.reserve(5 + bytes.len());
                buf.put_u32(bytes.len() as u32);
                buf.put_u8(id as u8);
                buf.put_slice(&bytes);
            }
            Message::Request(index) => {
                buf.reserve(9);
                buf.put_u32(4);
                buf.put_u8(id as u8);
                buf.put_u32(index as u32);
            }
            Message::Piece { index, data } => {
                buf.reserve(9 + data.len());
                buf.put_u32(4 + data.len() as u32);
                buf.put_u8(id as u8);
                buf.put_u32(index as u32);
                buf.put_slice(&data);
            }
        }
        Ok(())
    }
}

impl Decoder for PeerCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let frame_len = match self.frame_len {
            Some(len) => len,
            None => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
                self.frame_len = Some(len);
                len
            }
        };

        // +1 for the message type byte that isn't counted in the length
        // prefix.
        let full_frame_len = 4 + 1 + frame_len as usize;
        if buf.len() < full_frame_len {
            return Ok(None);
        }

        buf.advance(4);
        self.frame_len = None;
        let message_type = buf.get_u8();
        let id = MessageId::from_u8(message_type)?;
        let mut payload = buf.split_to(frame_len as usize);

        let msg = match id {
            MessageId::Choke => {
                expect_empty_payload(id, &payload)?;
                Message::Choke
            }
            MessageId::Unchoke => {
                expect_empty_payload(id, &payload)?;
                Message::Unchoke
            }
            MessageId::Interested => {
                expect_empty_payload(id, &payload)?;
                Message::Interested
            }
            MessageId::NotInterested => {
                expect_empty_payload(id, &payload)?;
                Message::NotInterested
            }
            MessageId::Have => {
                let index = read_u32_payload(id, &payload)? as PieceIndex;
                self.check_index(id, index)?;
                Message::Have(index)
            }
            MessageId::Bitfield => {
                let map = PieceMap::from_bytes(&payload, self.piece_count);
                Message::Bitfield(map)
            }
            MessageId::Request => {
                let index = read_u32_payload(id, &payload)? as PieceIndex;
                self.check_index(id, index)?;
                Message::Request(index)
            }
            MessageId::Piece => {
                if payload.len() < 4 {
                    return Err(Error::MalformedFrame(
                        "piece payload shorter than index field".into(),
                    ));
                }
                let index =
                    u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as PieceIndex;
                self.check_index(MessageId::Piece, index)?;
                payload.advance(4);
                Message::Piece {
                    index,
                    data: payload.to_vec(),
                }
            }
        };

        Ok(Some(msg))
    }
}

fn expect_empty_payload(id: MessageId, payload: &BytesMut) -> Result<(), Error> {
    if !payload.is_empty() {
        return Err(Error::MalformedFrame(format!(
            "message {:?} expects an empty payload, got {} bytes",
            id,
            payload.len()
        )));
    }
    Ok(())
}

fn read_u32_payload(id: MessageId, payload: &BytesMut) -> Result<u32, Error> {
    if payload.len() != 4 {
        return Err(Error::MalformedFrame(format!(
            "message {:?} expects a 4 byte payload, got {} bytes",
            id,
            payload.len()
        )));
    }
    Ok(u32::from_be_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_round_trip() {
        let mut codec = HandshakeCodec;
        let mut buf = BytesMut::new();
        codec.encode(Handshake::new(1002), &mut buf).unwrap();
        assert_eq!(buf.len(), HANDSHAKE_LEN);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.peer_id, 1002);
        assert!(buf.is_empty());
    }

    // property 6: parsing handshake(id) yields exactly id
    #[test]
    fn test_handshake_idempotence() {
        for id in [0, 1, 1001, u32::MAX] {
            let mut codec = HandshakeCodec;
            let mut buf = BytesMut::new();
            codec.encode(Handshake::new(id), &mut buf).unwrap();
            let decoded = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded.peer_id, id);
        }
    }

    #[test]
    fn test_handshake_rejects_mutated_header() {
        let mut codec = HandshakeCodec;
        let mut buf = BytesMut::new();
        codec.encode(Handshake::new(7), &mut buf).unwrap();
        // mutate a single byte of the 18 byte header string
        buf[3] = b'x';
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_handshake_waits_for_full_frame() {
        let mut codec = HandshakeCodec;
        let mut buf = BytesMut::new();
        codec.encode(Handshake::new(7), &mut buf).unwrap();
        buf.truncate(HANDSHAKE_LEN - 1);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_peer_codec_choke_round_trip() {
        let mut codec = PeerCodec::new(10);
        let mut buf = BytesMut::new();
        codec.encode(Message::Choke, &mut buf).unwrap();
        assert_eq!(buf.len(), 5);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, Message::Choke);
    }

    #[test]
    fn test_peer_codec_have_round_trip() {
        let mut codec = PeerCodec::new(10);
        let mut buf = BytesMut::new();
        codec.encode(Message::Have(3), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, Message::Have(3));
    }

    #[test]
    fn test_peer_codec_bitfield_round_trip() {
        let mut codec = PeerCodec::new(13);
        let mut map = PieceMap::new(13);
        for i in [0, 7, 8, 12] {
            map.set(i);
        }
        let mut buf = BytesMut::new();
        codec.encode(Message::Bitfield(map.clone()), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, Message::Bitfield(map));
    }

    #[test]
    fn test_peer_codec_piece_round_trip() {
        let mut codec = PeerCodec::new(10);
        let data = vec![1, 2, 3, 4, 5];
        let mut buf = BytesMut::new();
        codec
            .encode(
                Message::Piece {
                    index: 4,
                    data: data.clone(),
                },
                &mut buf,
            )
            .unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, Message::Piece { index: 4, data });
    }

    #[test]
    fn test_peer_codec_waits_for_full_frame() {
        let mut codec = PeerCodec::new(10);
        let mut buf = BytesMut::new();
        codec
            .encode(
                Message::Piece {
                    index: 0,
                    data: vec![1, 2, 3],
                },
                &mut buf,
            )
            .unwrap();
        buf.truncate(buf.len() - 1);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_peer_codec_rejects_unknown_type() {
        let mut codec = PeerCodec::new(10);
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        buf.put_u8(99);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_peer_codec_rejects_have_index_out_of_bounds() {
        let mut codec = PeerCodec::new(10);
        let mut buf = BytesMut::new();
        codec.encode(Message::Have(10), &mut buf).unwrap();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_peer_codec_rejects_request_index_out_of_bounds() {
        let mut codec = PeerCodec::new(10);
        let mut buf = BytesMut::new();
        codec.encode(Message::Request(999), &mut buf).unwrap();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_peer_codec_rejects_wrong_length_for_fixed_payload() {
        let mut codec = PeerCodec::new(10);
        let mut buf = BytesMut::new();
        // choke claims a 2 byte payload, which is invalid
        buf.put_u32(2);
        buf.put_u8(MessageId::Choke as u8);
        buf.put_u16(0);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_peer_codec_handles_back_to_back_frames() {
        let mut codec = PeerCodec::new(10);
        let mut buf = BytesMut::new();
        codec.encode(Message::Interested, &mut buf).unwrap();
        codec.encode(Message::Have(2), &mut buf).unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, Message::Interested);
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second, Message::Have(2));
    }
}
