//! Core protocol engine for a BitTorrent-style peer-to-peer file-sharing
//! peer: wire framing and handshake, the per-link choke/interest state
//! machine, piece selection, the periodic choking scheduler, and the
//! bootstrap that wires a static peer directory into live sessions.

pub mod codec;
pub mod conf;
pub mod engine;
pub mod error;
pub mod logging;
pub mod piece_map;
pub mod scheduler;
pub mod session;
pub mod storage;

/// A peer's id, unique within the static peer directory (`PeerInfo.cfg`).
pub type PeerId = u32;

/// The index of a piece in `[0, NumPieces)`.
pub type PieceIndex = usize;

/// Returns the number of pieces a file of `file_size` bytes is divided into,
/// per `NumPieces = ceil(FileSize / PieceSize)`.
pub fn piece_count(file_size: u64, piece_size: u32) -> usize {
    debug_assert!(piece_size > 0);
    let piece_size = piece_size as u64;
    ((file_size + piece_size - 1) / piece_size) as usize
}

/// Returns the byte length of the piece at `index`, given the total file
/// size and nominal piece size. All pieces but the last are exactly
/// `piece_size` bytes; the last piece is whatever remains.
///
/// # Panics
///
/// Panics if `index` is out of bounds for the implied piece count.
pub fn piece_len(file_size: u64, piece_size: u32, index: PieceIndex) -> u32 {
    let count = piece_count(file_size, piece_size);
    assert!(
        index < count,
        "piece index {} out of bounds ({})",
        index,
        count
    );
    if index == count - 1 {
        let full_pieces_len = piece_size as u64 * (count - 1) as u64;
        (file_size - full_pieces_len) as u32
    } else {
        piece_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_piece_count() {
        assert_eq!(piece_count(10000, 1000), 10);
        assert_eq!(piece_count(10001, 1000), 11);
        assert_eq!(piece_count(999, 1000), 1);
        assert_eq!(piece_count(1000, 1000), 1);
    }

    #[test]
    fn test_piece_len() {
        // exact multiple: every piece is full length
        assert_eq!(piece_len(10000, 1000, 0), 1000);
        assert_eq!(piece_len(10000, 1000, 9), 1000);

        // uneven: last piece is shorter
        assert_eq!(piece_len(10001, 1000, 10), 1);
        for i in 0..10 {
            assert_eq!(piece_len(10001, 1000, i), 1000);
        }
    }

    #[test]
    #[should_panic]
    fn test_piece_len_out_of_bounds_panics() {
        piece_len(10000, 1000, 10);
    }
}
