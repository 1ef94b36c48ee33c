//! Record daemon integration: memory broker in, finalized archive out.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use tapedeck_archive::{FilenameTemplate, FrameReader};
use tapedeck_broker::{MemoryBroker, Publisher, Subscriber};
use tapedeck_record::{FileRotator, RecordDaemon};

const PATTERN: &str = "%Y-%m-%d-%H-%M-%S%.3f";

fn rotator(dir: &Path) -> FileRotator {
    let template = FilenameTemplate::new(
        "{dir}/{topic}-{time}-{count}.reel",
        dir,
        "orders",
        "archive",
        PATTERN,
    )
    .unwrap();
    FileRotator::new(template, None, None, None).unwrap()
}

fn archive_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn archives_deliveries_and_acks_after_write() {
    let tmp = tempfile::TempDir::new().unwrap();
    let broker = MemoryBroker::new();

    let sub = broker.subscribe("orders", "archive").await.unwrap();
    for body in [&b"a"[..], b"bb", b"ccc"] {
        broker
            .publish("orders", Bytes::copy_from_slice(body))
            .await
            .unwrap();
    }

    let cancel = CancellationToken::new();
    let daemon = RecordDaemon::new(
        tmp.path().to_path_buf(),
        "orders".to_string(),
        "archive".to_string(),
        rotator(tmp.path()),
        Duration::from_secs(30),
        Duration::from_secs(30),
        cancel.clone(),
    );
    let stats = daemon.stats();
    let handle = tokio::spawn(daemon.run(sub));

    // All three deliveries acked means all three frames hit the writer.
    for _ in 0..200 {
        if broker.acked("orders", "archive") == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(broker.acked("orders", "archive"), 3);

    cancel.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(stats.received.load(Ordering::Relaxed), 3);
    assert_eq!(stats.written.load(Ordering::Relaxed), 3);
    assert_eq!(stats.acked.load(Ordering::Relaxed), 3);

    // Shutdown finalized exactly one archive carrying all three frames.
    let names = archive_files(tmp.path());
    assert_eq!(names.len(), 1, "got {:?}", names);
    assert!(names[0].contains("-3.reel"), "got {:?}", names);
    assert!(!FilenameTemplate::is_pending_name(&names[0]));

    let file = std::fs::File::open(tmp.path().join(&names[0])).unwrap();
    let mut reader = FrameReader::new(std::io::BufReader::new(file));
    let mut bodies = Vec::new();
    while let Some(body) = reader.next_frame().unwrap() {
        bodies.push(body.to_vec());
    }
    assert_eq!(bodies, vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()]);
}

#[tokio::test]
async fn drains_buffered_deliveries_on_shutdown() {
    let tmp = tempfile::TempDir::new().unwrap();
    let broker = MemoryBroker::new();

    let sub = broker.subscribe("orders", "archive").await.unwrap();
    for i in 0..5u8 {
        broker
            .publish("orders", Bytes::from(vec![i]))
            .await
            .unwrap();
    }

    // Cancelled before the daemon ever polls: everything the broker already
    // delivered must still reach the archive during the drain.
    let cancel = CancellationToken::new();
    cancel.cancel();

    let daemon = RecordDaemon::new(
        tmp.path().to_path_buf(),
        "orders".to_string(),
        "archive".to_string(),
        rotator(tmp.path()),
        Duration::from_secs(30),
        Duration::from_secs(30),
        cancel,
    );
    daemon.run(sub).await.unwrap();

    let names = archive_files(tmp.path());
    assert_eq!(names.len(), 1, "got {:?}", names);
    assert!(names[0].contains("-5.reel"), "got {:?}", names);
}
