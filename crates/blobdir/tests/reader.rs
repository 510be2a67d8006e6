//! Integration tests for concurrent readers and reader clones

mod common;

use std::sync::Arc;

#[tokio::test]
async fn test_concurrent_readers_have_independent_cursors() {
    let cluster = common::Cluster::new().await;
    let dir = cluster.directory("node-a").await;
    common::write_file(&dir, "_0.tis", b"abcdefghijklmnopqrstuvwxyz").await;

    let mut a = dir.open_input("_0.tis").await.unwrap();
    let mut head = [0u8; 5];
    a.read_bytes(&mut head).unwrap();
    assert_eq!(&head, b"abcde");

    let mut b = dir.open_input("_0.tis").await.unwrap();
    assert_eq!(b.position(), 0);
    b.seek(20).unwrap();
    assert_eq!(b.read_byte().unwrap(), b'u');

    // A is unaffected by B
    assert_eq!(a.position(), 5);
    assert_eq!(a.read_byte().unwrap(), b'f');

    a.close().await.unwrap();
    assert_eq!(b.read_byte().unwrap(), b'v');
    b.close().await.unwrap();
}

#[tokio::test]
async fn test_clone_shares_bytes_not_cursor() {
    let cluster = common::Cluster::new().await;
    let dir = cluster.directory("node-a").await;
    common::write_file(&dir, "_1.prx", b"0123456789").await;

    let mut original = dir.open_input("_1.prx").await.unwrap();
    original.seek(4).unwrap();

    let mut clone = original.try_clone().await.unwrap();
    assert_eq!(clone.position(), 4);
    assert_eq!(clone.len(), 10);

    clone.seek(9).unwrap();
    assert_eq!(clone.read_byte().unwrap(), b'9');
    assert_eq!(original.read_byte().unwrap(), b'4');

    // Closing the clone leaves the original readable
    clone.close().await.unwrap();
    assert_eq!(original.read_byte().unwrap(), b'5');
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_opens_of_one_name() {
    let cluster = common::Cluster::new().await;
    let dir = Arc::new(cluster.directory("node-a").await);
    let content: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 256) as u8).collect();
    common::write_file(&dir, "_2.cfs", &content).await;

    let mut tasks = Vec::new();
    for offset in 0..8u64 {
        let dir = dir.clone();
        let expected = content.clone();
        tasks.push(tokio::spawn(async move {
            let mut reader = dir.open_input("_2.cfs").await.unwrap();
            reader.seek(offset * 100).unwrap();
            let mut buf = vec![0u8; 100];
            reader.read_bytes(&mut buf).unwrap();
            reader.close().await.unwrap();
            assert_eq!(&buf[..], &expected[(offset * 100) as usize..][..100]);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Concurrent syncs never left a torn cache entry behind
    assert_eq!(dir.cache().read("_2.cfs").await.unwrap(), content);
}
