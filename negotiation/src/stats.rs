use crate::engine::StatsReport;
use call_core::{EncoderStats, StatsSnapshot};
use log::trace;

/// Turns cumulative engine counters into per-interval figures.
#[derive(Debug, Default)]
pub struct StatsSampler {
    video: bool,
    prev_bytes_sent: Option<u64>,
    prev_bytes_received: Option<u64>,
}

impl StatsSampler {
    pub fn new(video: bool) -> Self {
        Self {
            video,
            ..Self::default()
        }
    }

    pub fn sample(&mut self, reports: &[StatsReport]) -> StatsSnapshot {
        let pair = reports.iter().find(|r| is_active_pair(r));
        let bytes_sent = pair.and_then(|p| p.value_u64("bytesSent"));
        let bytes_received = pair.and_then(|p| p.value_u64("bytesReceived"));

        let snapshot = StatsSnapshot {
            bytes_sent_delta: delta(self.prev_bytes_sent, bytes_sent),
            bytes_received_delta: delta(self.prev_bytes_received, bytes_received),
            encoder: self.video.then(|| encoder_stats(reports)),
        };
        self.prev_bytes_sent = bytes_sent;
        self.prev_bytes_received = bytes_received;

        trace!("Stats sample: {:?}", snapshot);
        snapshot
    }
}

fn is_active_pair(report: &StatsReport) -> bool {
    match report.kind.as_str() {
        "googCandidatePair" => report.value("googActiveConnection") == Some("true"),
        "candidate-pair" => report.value("nominated") == Some("true"),
        _ => false,
    }
}

/// Counter reset or missing sample yields no figure rather than a bogus one.
fn delta(previous: Option<u64>, current: Option<u64>) -> Option<u64> {
    match (previous, current) {
        (Some(prev), Some(cur)) => cur.checked_sub(prev),
        _ => None,
    }
}

fn encoder_stats(reports: &[StatsReport]) -> EncoderStats {
    let mut stats = EncoderStats::default();
    for report in reports {
        if report.id == "bweforvideo" {
            stats.target_bitrate = report.value_u64("googTargetEncBitrate");
            stats.actual_bitrate = report.value_u64("googActualEncBitrate");
        }
        if let Some(frame_rate) = report.value_f64("googFrameRateSent") {
            stats.frame_rate = Some(frame_rate);
        }
    }
    stats
}
