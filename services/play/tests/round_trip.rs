//! Full bridge round trip: broker → record → disk → play → broker.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use tapedeck_archive::FilenameTemplate;
use tapedeck_broker::{MemoryBroker, Publisher, Subscriber};
use tapedeck_config::{
    BrokerSettings, LogSettings, PlayConfig, PlayDaemonSettings, WatchSettings, ZonePolicy,
};
use tapedeck_play::Play;
use tapedeck_record::{FileRotator, RecordDaemon};

const PATTERN: &str = "%Y-%m-%d-%H-%M-%S%.3f";

#[tokio::test]
async fn record_then_play_round_trip() {
    let tmp = tempfile::TempDir::new().unwrap();
    let broker = MemoryBroker::new();
    let bodies: [&[u8]; 3] = [b"a", b"bb", b"ccc"];

    // Record: three messages into one gzipped, finalized archive.
    let sub = broker.subscribe("orders", "archive").await.unwrap();
    for body in bodies {
        broker
            .publish("orders", Bytes::copy_from_slice(body))
            .await
            .unwrap();
    }

    let template = FilenameTemplate::new(
        "{dir}/{topic}-{time}-{count}.reel.gz",
        tmp.path(),
        "orders",
        "archive",
        PATTERN,
    )
    .unwrap();
    let rotator =
        FileRotator::new(template, None, None, Some(flate2::Compression::default())).unwrap();

    let record_cancel = CancellationToken::new();
    let record = RecordDaemon::new(
        tmp.path().to_path_buf(),
        "orders".to_string(),
        "archive".to_string(),
        rotator,
        Duration::from_secs(30),
        Duration::from_secs(30),
        record_cancel.clone(),
    );
    let record_handle = tokio::spawn(record.run(sub));

    for _ in 0..200 {
        if broker.acked("orders", "archive") == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    record_cancel.cancel();
    record_handle.await.unwrap().unwrap();

    // Verification consumer attaches before play starts publishing.
    let mut verify = broker.subscribe("orders", "verify").await.unwrap();

    // Play the directory back through the orchestrator.
    let config = PlayConfig {
        name: "play-test".to_string(),
        watches: vec![WatchSettings {
            topic: "orders".to_string(),
            dirs: vec![tmp.path().to_path_buf()],
        }],
        broker: BrokerSettings {
            endpoints: Vec::new(),
            endpoints_file: None,
            zone_policy: ZonePolicy::Global,
            zone_name: None,
            max_in_flight: 64,
        },
        daemon: PlayDaemonSettings {
            scan_interval_secs: 1,
            push_timeout_secs: 1,
            channel_capacity: 5,
        },
        log: LogSettings::default(),
        pid_file: None,
    };
    let play = Play::new(config, vec![Arc::new(broker.clone()) as Arc<dyn Publisher>]);
    let play_cancel = play.cancellation();
    let play_handle = tokio::spawn(play.run());

    let mut replayed = Vec::new();
    for _ in 0..3 {
        let delivery = tokio::time::timeout(Duration::from_secs(10), verify.recv())
            .await
            .expect("timed out waiting for replayed frame")
            .expect("verify subscription ended");
        replayed.push(delivery.body().to_vec());
        delivery.ack();
    }
    assert_eq!(replayed, vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()]);

    // The archive was moved under done/ with the .done suffix.
    let done_dir = tmp.path().join("done");
    for _ in 0..500 {
        if done_dir.exists()
            && std::fs::read_dir(&done_dir).unwrap().next().is_some()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let done_names: Vec<String> = std::fs::read_dir(&done_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(done_names.len(), 1);
    assert!(done_names[0].ends_with(".reel.gz.done"), "got {:?}", done_names);
    assert!(done_names[0].contains("-3.reel"), "got {:?}", done_names);

    play_cancel.cancel();
    play_handle.await.unwrap().unwrap();

    // Nothing further arrives: replay of a drained directory is idempotent.
    let extra = tokio::time::timeout(Duration::from_millis(200), verify.recv()).await;
    assert!(extra.is_err() || extra.unwrap().is_none());
}
