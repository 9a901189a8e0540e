//! エコーリレー（受信音声フレームをそのまま送り返す）
//!
//! リレーはセッションやレジストリを知らない。終了理由は bind 時に渡した
//! レポートチャネルへ送られ、失敗の扱いは [`RelayHandle`] の所有者が決める。
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::media::{FrameSink, FrameSource, MediaError};

/// リレー終了理由
#[derive(Debug)]
pub enum RelayOutcome {
    /// 所有者による停止
    Stopped { forwarded: u64 },
    /// 受信ソース終端
    EndOfStream { forwarded: u64 },
    SourceFailed { forwarded: u64, error: MediaError },
    SinkFailed { forwarded: u64, error: MediaError },
}

impl RelayOutcome {
    /// 所有者による停止以外は失敗扱い
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Stopped { .. })
    }

    pub fn forwarded(&self) -> u64 {
        match self {
            Self::Stopped { forwarded }
            | Self::EndOfStream { forwarded }
            | Self::SourceFailed { forwarded, .. }
            | Self::SinkFailed { forwarded, .. } => *forwarded,
        }
    }
}

pub struct EchoRelay {
    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,
    reports: mpsc::Sender<RelayOutcome>,
}

impl EchoRelay {
    pub fn bind(
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
        reports: mpsc::Sender<RelayOutcome>,
    ) -> Self {
        Self {
            source,
            sink,
            reports,
        }
    }

    /// `forward` を別タスクで起動
    pub fn start(self) -> RelayHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let reports = self.reports.clone();
        let task = tokio::spawn(async move {
            let outcome = self.forward(stop_rx).await;
            debug!(forwarded = outcome.forwarded(), outcome = ?outcome, "echo relay finished");
            let _ = reports.send(outcome).await;
        });
        RelayHandle {
            stop: stop_tx,
            task,
        }
    }

    /// 停止・終端・エラーまでソースからシンクへフレームを転送する。
    pub async fn forward(mut self, mut stop: watch::Receiver<bool>) -> RelayOutcome {
        let mut forwarded = 0u64;
        let mut watching = true;
        loop {
            if *stop.borrow() {
                return RelayOutcome::Stopped { forwarded };
            }

            let next = tokio::select! {
                biased;
                changed = stop.changed(), if watching => {
                    // 送信側が無い: 切り離されたリレーは終端まで動く
                    watching = changed.is_ok();
                    continue;
                }
                next = self.source.next_frame() => next,
            };

            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => return RelayOutcome::EndOfStream { forwarded },
                Err(error) => {
                    warn!(error = %error, forwarded, "inbound audio failed");
                    return RelayOutcome::SourceFailed { forwarded, error };
                }
            };

            if *stop.borrow() {
                return RelayOutcome::Stopped { forwarded };
            }

            if let Err(error) = self.sink.send_frame(frame).await {
                warn!(error = %error, forwarded, "outbound audio failed");
                return RelayOutcome::SinkFailed { forwarded, error };
            }
            forwarded += 1;
        }
    }
}

/// 実行中リレータスクのハンドル
///
/// `release` せずに破棄するとリレーは切り離される。
#[derive(Debug)]
pub struct RelayHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// 停止を通知してタスクを中断する
    pub fn release(self) {
        let _ = self.stop.send(true);
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::in_memory::{frame_channel, RecordingSink};
    use crate::media::AudioFrame;

    #[tokio::test]
    async fn stop_signal_ends_idle_relay() {
        let (frames, source) = frame_channel(4);
        let sink = RecordingSink::new();
        let (reports_tx, mut reports_rx) = mpsc::channel(1);

        let handle = EchoRelay::bind(Box::new(source), Box::new(sink.clone()), reports_tx).start();
        frames.send(Ok(AudioFrame::new(1, 0, vec![1u8]))).await.unwrap();

        // 最初のフレームが通るまで待ってから停止
        for _ in 0..50 {
            if !sink.frames().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(sink.frames().len(), 1);

        let _ = handle.stop.send(true);
        let outcome = reports_rx.recv().await.expect("outcome");
        assert!(matches!(outcome, RelayOutcome::Stopped { forwarded: 1 }));
        assert!(!outcome.is_failure());
    }
}
