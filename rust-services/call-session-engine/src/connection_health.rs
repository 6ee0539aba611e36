//! Connection health monitoring
//!
//! Classifies link quality from candidate-pair round-trip time and decides
//! whether a failed link gets another ICE restart.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use chrono::{DateTime, Utc};
use meshcall_types::UserId;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::connection::{CandidatePairState, CandidatePairStats};
use crate::error::CallResult;
use crate::link::PeerLink;
use crate::protocol;
use crate::relay_adapter::RelayAdapter;

const MAX_HISTORY: usize = 100;

/// Connection quality level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallQuality {
    /// RTT below the good threshold (100ms by default)
    Good,
    /// RTT below the fair threshold (300ms by default)
    Fair,
    Poor,
    /// No succeeded candidate pair
    Unknown,
}

impl CallQuality {
    /// Get quality as string
    pub fn as_str(&self) -> &'static str {
        match self {
            CallQuality::Good => "good",
            CallQuality::Fair => "fair",
            CallQuality::Poor => "poor",
            CallQuality::Unknown => "unknown",
        }
    }

    /// Get quality score (0-100)
    pub fn score(&self) -> u8 {
        match self {
            CallQuality::Good => 100,
            CallQuality::Fair => 50,
            CallQuality::Poor => 25,
            CallQuality::Unknown => 0,
        }
    }

    /// Worst known quality; `Unknown` only when nothing is known
    pub fn worst<I: IntoIterator<Item = CallQuality>>(qualities: I) -> CallQuality {
        qualities
            .into_iter()
            .filter(|q| *q != CallQuality::Unknown)
            .min_by_key(|q| q.score())
            .unwrap_or(CallQuality::Unknown)
    }
}

/// One point-in-time measurement
#[derive(Debug, Clone, Serialize)]
pub struct QualitySample {
    pub peer: UserId,
    pub quality: CallQuality,
    pub rtt_ms: Option<f64>,
    pub sampled_at: DateTime<Utc>,
}

/// What happened to a failed link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// One ICE-restart offer was sent
    Restarted,
    /// The restart cap was reached; the link stays failed
    GaveUp { restarts: u32 },
}

/// Connection health monitor
pub struct ConnectionHealthMonitor {
    good_rtt_ms: f64,
    fair_rtt_ms: f64,
    max_ice_restarts: Option<u32>,
    history: VecDeque<QualitySample>,
}

impl ConnectionHealthMonitor {
    pub fn new(good_rtt_ms: f64, fair_rtt_ms: f64, max_ice_restarts: Option<u32>) -> Self {
        ConnectionHealthMonitor {
            good_rtt_ms,
            fair_rtt_ms,
            max_ice_restarts,
            history: VecDeque::with_capacity(MAX_HISTORY),
        }
    }

    pub fn classify_rtt(&self, rtt_ms: f64) -> CallQuality {
        if rtt_ms < self.good_rtt_ms {
            CallQuality::Good
        } else if rtt_ms < self.fair_rtt_ms {
            CallQuality::Fair
        } else {
            CallQuality::Poor
        }
    }

    /// RTT of the succeeded pair, preferring the nominated one
    fn active_rtt_ms(stats: &[CandidatePairStats]) -> Option<f64> {
        let mut succeeded = stats
            .iter()
            .filter(|pair| pair.state == CandidatePairState::Succeeded)
            .collect::<Vec<_>>();
        succeeded.sort_by_key(|pair| !pair.nominated);
        succeeded
            .first()
            .and_then(|pair| pair.current_round_trip_time)
            .map(|seconds| seconds * 1000.0)
    }

    /// Sample one link and record the result
    pub async fn sample_link(&mut self, link: &PeerLink) -> CallResult<QualitySample> {
        let stats = link.connection().candidate_pair_stats().await?;
        let rtt_ms = Self::active_rtt_ms(&stats);
        let quality = match rtt_ms {
            Some(rtt) => self.classify_rtt(rtt),
            None => CallQuality::Unknown,
        };

        let sample = QualitySample {
            peer: link.remote_id().clone(),
            quality,
            rtt_ms,
            sampled_at: Utc::now(),
        };
        debug!(peer = %sample.peer, quality = quality.as_str(), rtt_ms = ?rtt_ms, "Link quality sampled");

        self.history.push_back(sample.clone());
        if self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
        Ok(sample)
    }

    /// Send exactly one ICE-restart offer for a failed link, unless capped
    pub async fn recover(&self, link: &mut PeerLink, relay: &RelayAdapter) -> CallResult<Recovery> {
        if let Some(max) = self.max_ice_restarts {
            if link.ice_restarts() >= max {
                warn!(peer = %link.remote_id(), restarts = link.ice_restarts(), "ICE restart limit reached");
                return Ok(Recovery::GaveUp {
                    restarts: link.ice_restarts(),
                });
            }
        }
        protocol::restart_ice(link, relay).await?;
        Ok(Recovery::Restarted)
    }

    /// Recent samples, oldest first
    pub fn history(&self) -> impl Iterator<Item = &QualitySample> {
        self.history.iter()
    }

    pub fn latest(&self) -> Option<&QualitySample> {
        self.history.back()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(state: CandidatePairState, nominated: bool, rtt: Option<f64>) -> CandidatePairStats {
        CandidatePairStats {
            state,
            nominated,
            current_round_trip_time: rtt,
        }
    }

    #[test]
    fn test_quality_buckets() {
        let monitor = ConnectionHealthMonitor::new(100.0, 300.0, None);
        assert_eq!(monitor.classify_rtt(40.0), CallQuality::Good);
        assert_eq!(monitor.classify_rtt(100.0), CallQuality::Fair);
        assert_eq!(monitor.classify_rtt(299.9), CallQuality::Fair);
        assert_eq!(monitor.classify_rtt(300.0), CallQuality::Poor);
    }

    #[test]
    fn test_custom_thresholds() {
        let monitor = ConnectionHealthMonitor::new(20.0, 50.0, None);
        assert_eq!(monitor.classify_rtt(40.0), CallQuality::Fair);
        assert_eq!(monitor.classify_rtt(60.0), CallQuality::Poor);
    }

    #[test]
    fn test_rtt_needs_succeeded_pair() {
        let stats = vec![
            pair(CandidatePairState::InProgress, false, Some(0.010)),
            pair(CandidatePairState::Failed, false, Some(0.020)),
        ];
        assert_eq!(ConnectionHealthMonitor::active_rtt_ms(&stats), None);
    }

    #[test]
    fn test_nominated_pair_preferred() {
        let stats = vec![
            pair(CandidatePairState::Succeeded, false, Some(0.400)),
            pair(CandidatePairState::Succeeded, true, Some(0.050)),
        ];
        let rtt = ConnectionHealthMonitor::active_rtt_ms(&stats).unwrap();
        assert!((rtt - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_worst_quality() {
        assert_eq!(
            CallQuality::worst([CallQuality::Good, CallQuality::Poor, CallQuality::Unknown]),
            CallQuality::Poor
        );
        assert_eq!(
            CallQuality::worst([CallQuality::Unknown, CallQuality::Unknown]),
            CallQuality::Unknown
        );
        assert_eq!(CallQuality::worst(Vec::new()), CallQuality::Unknown);
    }

    #[test]
    fn test_quality_scoring() {
        assert_eq!(CallQuality::Good.score(), 100);
        assert_eq!(CallQuality::Fair.score(), 50);
        assert_eq!(CallQuality::Poor.score(), 25);
        assert_eq!(CallQuality::Unknown.score(), 0);
    }
}
