use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::SignalingError;
use crate::media::SessionDescription;

#[derive(Debug, Deserialize)]
struct OfferBody {
    #[serde(default)]
    sdp: Option<String>,
    #[serde(default, rename = "type")]
    sdp_type: Option<String>,
}

/// `{sdp, type}` リクエストを解析（offer のみ受け付ける）
pub fn parse_offer(body: &[u8]) -> Result<SessionDescription, SignalingError> {
    let body: OfferBody = serde_json::from_slice(body)
        .map_err(|e| SignalingError::malformed(format!("invalid JSON body: {e}")))?;

    let sdp = body
        .sdp
        .filter(|sdp| !sdp.trim().is_empty())
        .ok_or_else(|| SignalingError::malformed("missing sdp"))?;
    let sdp_type = body
        .sdp_type
        .ok_or_else(|| SignalingError::malformed("missing type"))?;
    if sdp_type != "offer" {
        return Err(SignalingError::malformed(format!(
            "expected type \"offer\", got {sdp_type:?}"
        )));
    }

    Ok(SessionDescription::offer(sdp))
}

/// ネゴシエーション各段階の所要時間（ミリ秒）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerTimings {
    pub parse_ms: f64,
    pub ice_ms: f64,
    pub session_ms: f64,
    pub remote_description_ms: f64,
    pub answer_ms: f64,
    pub total_ms: f64,
}

pub(crate) struct StepTimer {
    last: Instant,
}

impl StepTimer {
    pub(crate) fn start() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// 前回からの経過ミリ秒
    pub(crate) fn lap(&mut self) -> f64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        self.last = now;
        elapsed.as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_offer() {
        let offer = parse_offer(br#"{"sdp": "v=0\r\n", "type": "offer"}"#).expect("offer");
        assert_eq!(offer.sdp, "v=0\r\n");
        assert_eq!(offer.sdp_type, "offer");
    }

    #[test]
    fn rejects_missing_sdp() {
        let err = parse_offer(br#"{"type": "offer"}"#).expect_err("missing sdp");
        assert!(err.to_string().contains("missing sdp"));
    }

    #[test]
    fn rejects_answer_type() {
        assert!(parse_offer(br#"{"sdp": "v=0", "type": "answer"}"#).is_err());
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            parse_offer(b"sdp=v=0"),
            Err(SignalingError::MalformedOffer { .. })
        ));
    }
}
