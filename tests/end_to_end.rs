//! End-to-end scenario S1 (§8): two real engines, one seeder and one
//! leecher, talking over loopback TCP with tempdir-backed file stores.

use std::time::Duration;

use p2p_file_sharing_peer::{
    conf::{CommonConfig, Conf, PeerDirectory},
    engine::Engine,
    storage::FileStore,
};

fn two_peer_conf(seed_port: u16, leech_port: u16) -> Conf {
    let peers = PeerDirectory::parse(&format!(
        "1001 127.0.0.1 {} 1\n1002 127.0.0.1 {} 0\n",
        seed_port, leech_port
    ))
    .unwrap();
    Conf {
        common: CommonConfig {
            number_of_preferred_neighbors: 1,
            unchoking_interval: Duration::from_millis(200),
            optimistic_unchoking_interval: Duration::from_millis(400),
            file_name: "thefile.dat".to_string(),
            file_size: 2000,
            piece_size: 500,
        },
        peers,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_s1_two_peers_one_seeder() {
    let seed_dir = tempfile::tempdir().unwrap();
    let leech_dir = tempfile::tempdir().unwrap();

    let file_size = 2000usize;
    let piece_size = 500u32;
    let payload: Vec<u8> = (0..file_size).map(|i| (i % 251) as u8).collect();

    let seed_path = seed_dir.path().join("thefile.dat");
    std::fs::write(&seed_path, &payload).unwrap();
    let seed_store = FileStore::open(&seed_path, file_size as u64, piece_size, true).unwrap();

    let leech_path = leech_dir.path().join("thefile.dat");
    let leech_store = FileStore::open(&leech_path, file_size as u64, piece_size, false).unwrap();

    let seed_port = 17001;
    let leech_port = 17002;
    let conf = two_peer_conf(seed_port, leech_port);

    let seed_engine = Engine::new(conf.clone(), 1001, seed_store, true);
    let leech_engine = Engine::new(conf, 1002, leech_store, false);

    let seed_task = tokio::spawn(seed_engine.run());
    let leech_task = tokio::spawn(leech_engine.run());

    let outcome = tokio::time::timeout(Duration::from_secs(20), async {
        let (seed_result, leech_result) = tokio::join!(seed_task, leech_task);
        seed_result.unwrap().unwrap();
        leech_result.unwrap().unwrap();
    })
    .await;

    assert!(outcome.is_ok(), "engines did not reach completion in time");

    let downloaded = std::fs::read(&leech_path).unwrap();
    assert_eq!(downloaded, payload);
}
