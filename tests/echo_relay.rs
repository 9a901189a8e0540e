use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use webrtc_echo_server::media::in_memory::{frame_channel, RecordingSink, ScriptedSource};
use webrtc_echo_server::media::{AudioFrame, FrameSink, MediaError};
use webrtc_echo_server::relay::{EchoRelay, RelayOutcome};

fn frames(count: u16) -> Vec<AudioFrame> {
    (0..count)
        .map(|i| AudioFrame::new(i, u32::from(i) * 960, vec![i as u8; 4]))
        .collect()
}

/// `limit` 件受け付けた後に失敗するシンク
struct FailingSink {
    accepted: usize,
    limit: usize,
}

#[async_trait]
impl FrameSink for FailingSink {
    async fn send_frame(&mut self, _frame: AudioFrame) -> Result<(), MediaError> {
        if self.accepted == self.limit {
            return Err(MediaError::track("write failed"));
        }
        self.accepted += 1;
        Ok(())
    }
}

#[tokio::test]
async fn forwards_frames_in_order() {
    let input = frames(25);
    let sink = RecordingSink::new();
    let (reports, mut outcomes) = mpsc::channel(1);

    EchoRelay::bind(
        Box::new(ScriptedSource::frames(input.clone())),
        Box::new(sink.clone()),
        reports,
    )
    .start();

    let outcome = outcomes.recv().await.unwrap();
    assert!(matches!(outcome, RelayOutcome::EndOfStream { forwarded: 25 }));
    assert!(outcome.is_failure());
    assert_eq!(sink.frames(), input);
}

#[tokio::test]
async fn source_error_stops_after_forwarded_frames() {
    let mut script: Vec<Result<AudioFrame, MediaError>> = frames(3).into_iter().map(Ok).collect();
    script.push(Err(MediaError::track("read failed")));
    script.extend(frames(2).into_iter().map(Ok));

    let sink = RecordingSink::new();
    let (reports, mut outcomes) = mpsc::channel(1);
    EchoRelay::bind(Box::new(ScriptedSource::new(script)), Box::new(sink.clone()), reports)
        .start();

    let outcome = outcomes.recv().await.unwrap();
    assert!(matches!(outcome, RelayOutcome::SourceFailed { forwarded: 3, .. }));
    assert_eq!(sink.frames(), frames(3));
}

#[tokio::test]
async fn sink_error_is_reported() {
    let (reports, mut outcomes) = mpsc::channel(1);
    EchoRelay::bind(
        Box::new(ScriptedSource::frames(frames(10))),
        Box::new(FailingSink {
            accepted: 0,
            limit: 4,
        }),
        reports,
    )
    .start();

    let outcome = outcomes.recv().await.unwrap();
    assert!(matches!(outcome, RelayOutcome::SinkFailed { forwarded: 4, .. }));
    assert_eq!(outcome.forwarded(), 4);
}

#[tokio::test]
async fn released_relay_forwards_nothing_more() {
    let (frames_tx, source) = frame_channel(8);
    let sink = RecordingSink::new();
    let (reports, mut outcomes) = mpsc::channel(1);

    let handle = EchoRelay::bind(Box::new(source), Box::new(sink.clone()), reports).start();
    frames_tx.send(Ok(AudioFrame::new(1, 0, vec![1u8]))).await.unwrap();
    for _ in 0..100 {
        if sink.frames().len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(sink.frames().len(), 1);

    handle.release();
    // 停止を検知したか、先にタスクが中断された
    match outcomes.recv().await {
        None | Some(RelayOutcome::Stopped { .. }) => {}
        Some(other) => panic!("unexpected outcome {other:?}"),
    }

    let _ = frames_tx.send(Ok(AudioFrame::new(2, 960, vec![2u8]))).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(sink.frames().len(), 1);
}
