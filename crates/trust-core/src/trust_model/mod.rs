//! Pluggable trust model: per-edge and per-capability statistical state,
//! the shared evidence-update verbs, value computation, and CBOR
//! (de)serialisation tagged with a per-variant discriminant.

pub mod distributions;
pub mod hmm;

use std::collections::HashMap;

use ciborium::value::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use distributions::{Beta, ExponentialClock, Gaussian};
pub use hmm::{Hmm, Observation};

#[derive(Debug, Error)]
pub enum TrustModelError {
    #[error("trust weight table does not sum to 1 (got {0})")]
    WeightsNotNormalized(f64),
    #[error("wire trust-model tag {wire} does not match configured variant {configured}")]
    VariantMismatch { wire: u8, configured: u8 },
    #[error("cbor encode error: {0}")]
    Encode(String),
    #[error("cbor decode error: {0}")]
    Decode(String),
}

/// The five pluggable trust-model shapes, tagged on the wire with a small
/// integer constant so a receiver can refuse a mismatched payload.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum TrustModelKind {
    None = 1,
    Badlisted = 2,
    Reputation = 3,
    Hmm = 4,
    Throughput = 5,
}

impl TrustModelKind {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Per-application weights for the Beta+reputation variant's weighted sum.
/// Must sum to 1 within a small tolerance, checked at runtime.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct WeightTable {
    pub w_task_submission: f64,
    pub w_task_result: f64,
    pub w_result_quality: f64,
    pub w_challenge_response: f64,
    pub reputation_weight: f64,
}

const WEIGHT_TOLERANCE: f64 = 1e-6;

impl WeightTable {
    pub fn validate(&self) -> Result<(), TrustModelError> {
        let sum = self.w_task_submission + self.w_task_result + self.w_result_quality + self.w_challenge_response;
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(TrustModelError::WeightsNotNormalized(sum));
        }
        if self.reputation_weight < 0.0 || self.reputation_weight > 1.0 {
            return Err(TrustModelError::WeightsNotNormalized(self.reputation_weight));
        }
        Ok(())
    }
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            w_task_submission: 0.3,
            w_task_result: 0.3,
            w_result_quality: 0.3,
            w_challenge_response: 0.1,
            reputation_weight: 0.2,
        }
    }
}

// --- Outcome variants, one per shared evidence verb ------------------------

#[derive(Clone, Copy, Debug)]
pub enum TaskSubmissionOutcome {
    AckOk,
    OtherStatus,
    NonResponseCompletion,
    FinishedNoResponse,
}

impl TaskSubmissionOutcome {
    fn to_good_bad(self) -> Option<bool> {
        match self {
            Self::AckOk => Some(true),
            Self::OtherStatus | Self::NonResponseCompletion => Some(false),
            Self::FinishedNoResponse => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TaskResultOutcome {
    ExplicitSuccess,
    ExplicitFail,
    Timeout,
}

impl TaskResultOutcome {
    fn to_good_bad(self) -> bool {
        matches!(self, Self::ExplicitSuccess)
    }
}

#[derive(Clone, Copy, Debug)]
pub enum ChallengeResponseOutcome {
    Ack { ok: bool },
    Timeout { never_received: bool, late: bool },
    Response { hash_meets_difficulty: bool, late: bool },
}

impl ChallengeResponseOutcome {
    fn to_good_bad(self) -> Option<bool> {
        match self {
            Self::Ack { ok: true } => None,
            Self::Ack { ok: false } => Some(false),
            Self::Timeout { never_received, late } => Some(!(never_received || late)),
            Self::Response {
                hash_meets_difficulty,
                late,
            } => Some(hash_meets_difficulty && !late),
        }
    }

    /// `true` when this is a badlist-relevant failure (used by Variant 2).
    pub fn is_bad(self) -> bool {
        matches!(self.to_good_bad(), Some(false))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThroughputDirection {
    In,
    Out,
}

#[derive(Clone, Copy, Debug)]
pub struct ThroughputSample {
    pub direction: ThroughputDirection,
    pub bytes_per_sec: f64,
}

// --- Per-edge state ---------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum EdgeTrustState {
    None,
    Badlisted { bad: bool },
    Reputation { task_submission: Beta, task_result: Beta },
    Hmm,
    Throughput,
}

impl EdgeTrustState {
    pub fn new(kind: TrustModelKind) -> Self {
        match kind {
            TrustModelKind::None => Self::None,
            TrustModelKind::Badlisted => Self::Badlisted { bad: false },
            TrustModelKind::Reputation => Self::Reputation {
                task_submission: Beta::default(),
                task_result: Beta::default(),
            },
            TrustModelKind::Hmm => Self::Hmm,
            TrustModelKind::Throughput => Self::Throughput,
        }
    }

    pub fn apply_task_submission(&mut self, outcome: TaskSubmissionOutcome) {
        let Some(good) = outcome.to_good_bad() else { return };
        match self {
            Self::Reputation { task_submission, .. } => {
                if good {
                    task_submission.add_good();
                } else {
                    task_submission.add_bad();
                }
            }
            _ => {}
        }
    }

    pub fn apply_task_result(&mut self, outcome: TaskResultOutcome) {
        let good = outcome.to_good_bad();
        match self {
            Self::Reputation { task_result, .. } => {
                if good {
                    task_result.add_good();
                } else {
                    task_result.add_bad();
                }
            }
            _ => {}
        }
    }

    pub fn apply_challenge_response(&mut self, outcome: ChallengeResponseOutcome) {
        if let Self::Badlisted { bad } = self {
            if let Some(good) = outcome.to_good_bad() {
                *bad = !good;
            }
        }
    }

    pub fn is_bad(&self) -> bool {
        matches!(self, Self::Badlisted { bad: true })
    }

    /// Scalar reputation signal this edge's state contributes when another
    /// node reports it as a peer, used to blend a peer's view into our own
    /// trust value. Only the reputation variant carries a meaningful
    /// signal; every other variant reports `None`.
    pub fn reputation_scalar(&self) -> Option<f64> {
        match self {
            Self::Reputation { task_submission, task_result } => {
                Some((task_submission.expected() + task_result.expected()) / 2.0)
            }
            _ => None,
        }
    }

    pub fn is_empty_state(&self) -> bool {
        matches!(self, Self::None | Self::Hmm | Self::Throughput)
    }

    pub fn encode(&self, kind: TrustModelKind) -> Result<Vec<u8>, TrustModelError> {
        encode_tagged(kind, self)
    }

    pub fn decode(kind: TrustModelKind, bytes: &[u8]) -> Result<Self, TrustModelError> {
        decode_tagged(kind, bytes)
    }
}

// --- Per-capability state ----------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum CapabilityTrustState {
    None,
    Badlisted,
    Reputation {
        result_quality: Beta,
        challenge_quality: Option<Beta>,
    },
    Hmm {
        hmm: Hmm,
    },
    Throughput {
        in_samples: Gaussian,
        in_ewma: Gaussian,
        out_samples: Gaussian,
        out_ewma: Gaussian,
        throughput_good: bool,
        seconds_since_bad: Option<u64>,
        reconsider: ExponentialClock,
    },
}

const EWMA_WEIGHT: f64 = 0.6;
const THROUGHPUT_MIN_SAMPLES: u32 = 10;
const THROUGHPUT_BAD_LOCAL: f64 = 0.25;
const THROUGHPUT_BAD_GLOBAL: f64 = 0.4;
const THROUGHPUT_GOOD_LOCAL: f64 = 0.75;
const THROUGHPUT_GOOD_GLOBAL: f64 = 0.4;

impl CapabilityTrustState {
    pub fn new(kind: TrustModelKind) -> Self {
        match kind {
            TrustModelKind::None => Self::None,
            TrustModelKind::Badlisted => Self::Badlisted,
            TrustModelKind::Reputation => Self::Reputation {
                result_quality: Beta::default(),
                challenge_quality: None,
            },
            TrustModelKind::Hmm => Self::Hmm { hmm: Hmm::new_default() },
            TrustModelKind::Throughput => Self::Throughput {
                in_samples: Gaussian::empty(),
                in_ewma: Gaussian::empty(),
                out_samples: Gaussian::empty(),
                out_ewma: Gaussian::empty(),
                throughput_good: true,
                seconds_since_bad: None,
                reconsider: ExponentialClock::new(1.0 / 300.0),
            },
        }
    }

    pub fn apply_result_quality(&mut self, good: bool) {
        if let Self::Reputation { result_quality, .. } = self {
            if good {
                result_quality.add_good();
            } else {
                result_quality.add_bad();
            }
        }
        if let Self::Hmm { hmm } = self {
            let first = false;
            hmm.update(
                if good {
                    Observation::ResultCorrect
                } else {
                    Observation::ResultIncorrect
                },
                first,
            );
        }
    }

    /// Feeds a task-submission outcome into this capability's HMM history
    /// as `SubmissionTimedOut` when the submission went badly; other
    /// variants track task-submission evidence on the edge, not here.
    pub fn apply_task_submission(&mut self, outcome: TaskSubmissionOutcome) {
        if let Self::Hmm { hmm } = self {
            if let Some(false) = outcome.to_good_bad() {
                hmm.update(Observation::SubmissionTimedOut, false);
            }
        }
    }

    /// Feeds a task-result outcome into this capability's HMM history as
    /// `ResponseTimedOut` on anything short of explicit success; other
    /// variants track task-result evidence on the edge, not here.
    pub fn apply_task_result(&mut self, outcome: TaskResultOutcome) {
        if let Self::Hmm { hmm } = self {
            if !outcome.to_good_bad() {
                hmm.update(Observation::ResponseTimedOut, false);
            }
        }
    }

    pub fn apply_challenge_response(&mut self, outcome: ChallengeResponseOutcome) {
        if let Self::Reputation { challenge_quality, .. } = self {
            if let Some(good) = outcome.to_good_bad() {
                let beta = challenge_quality.get_or_insert_with(Beta::default);
                if good {
                    beta.add_good();
                } else {
                    beta.add_bad();
                }
            }
        }
    }

    /// Records one throughput sample and updates the local goodness boolean
    /// against the good/bad transition thresholds, consulting (and updating)
    /// the cross-edge global Gaussian for this capability.
    pub fn apply_throughput(&mut self, sample: ThroughputSample, global: &mut GlobalThroughputStats, now_secs: u64) {
        let Self::Throughput {
            in_samples,
            in_ewma,
            out_samples,
            out_ewma,
            throughput_good,
            seconds_since_bad,
            ..
        } = self
        else {
            return;
        };

        let (samples, ewma, global_stats) = match sample.direction {
            ThroughputDirection::In => (in_samples, in_ewma, &mut global.in_stats),
            ThroughputDirection::Out => (out_samples, out_ewma, &mut global.out_stats),
        };

        samples.update(sample.bytes_per_sec);
        ewma.mean = if ewma.count == 0 {
            sample.bytes_per_sec
        } else {
            EWMA_WEIGHT * sample.bytes_per_sec + (1.0 - EWMA_WEIGHT) * ewma.mean
        };
        ewma.count += 1;
        global_stats.update(sample.bytes_per_sec);

        let local_goodness = [in_ewma_vs_mean(in_ewma, in_samples), in_ewma_vs_mean(out_ewma, out_samples)]
            .iter()
            .sum::<f64>()
            / 2.0;

        let global_goodness = [
            global.in_stats.pr_less_than(in_samples.mean),
            global.out_stats.pr_less_than(out_samples.mean),
        ]
        .iter()
        .sum::<f64>()
            / 2.0;

        let enough_samples = in_samples.count >= THROUGHPUT_MIN_SAMPLES && out_samples.count >= THROUGHPUT_MIN_SAMPLES;

        if *throughput_good
            && enough_samples
            && local_goodness <= THROUGHPUT_BAD_LOCAL
            && global_goodness < THROUGHPUT_BAD_GLOBAL
        {
            *throughput_good = false;
            *seconds_since_bad = Some(now_secs);
        } else if !*throughput_good && local_goodness >= THROUGHPUT_GOOD_LOCAL && global_goodness >= THROUGHPUT_GOOD_GLOBAL
        {
            *throughput_good = true;
            *seconds_since_bad = None;
        }
    }

    /// A bad throughput edge may be reconsidered once the exponential CDF
    /// of elapsed time since going bad exceeds `threshold`.
    pub fn may_reconsider(&self, now_secs: u64, threshold: f64) -> bool {
        match self {
            Self::Throughput {
                throughput_good: false,
                seconds_since_bad: Some(bad_at),
                reconsider,
                ..
            } => {
                let elapsed = now_secs.saturating_sub(*bad_at) as f64;
                reconsider.cdf(elapsed) > threshold
            }
            Self::Throughput { throughput_good: true, .. } => true,
            _ => true,
        }
    }

    pub fn is_throughput_bad(&self) -> bool {
        matches!(self, Self::Throughput { throughput_good: false, .. })
    }

    /// Combined trust value for this capability: weighted sum of the active
    /// Beta means, additively combined with a stereotype prior and blended
    /// with peer-reported reputation; other variants return their own
    /// natural scalar.
    pub fn value(
        &self,
        edge: &EdgeTrustState,
        stereotype: Option<&EdgeTrustState>,
        peer_reputation: Option<f64>,
        weights: &WeightTable,
    ) -> f64 {
        match self {
            Self::None => 1.0,
            Self::Badlisted => 1.0,
            Self::Reputation { result_quality, challenge_quality } => {
                let (task_submission, task_result) = match edge {
                    EdgeTrustState::Reputation { task_submission, task_result } => (*task_submission, *task_result),
                    _ => (Beta::default(), Beta::default()),
                };

                let prior = match stereotype {
                    Some(EdgeTrustState::Reputation { task_submission, task_result }) => {
                        Some((*task_submission, *task_result))
                    }
                    _ => None,
                };

                let (task_submission, task_result) = if let Some((prior_sub, prior_res)) = prior {
                    (task_submission.combine(&prior_sub), task_result.combine(&prior_res))
                } else {
                    (task_submission, task_result)
                };

                let mut local = weights.w_task_submission * task_submission.expected()
                    + weights.w_task_result * task_result.expected()
                    + weights.w_result_quality * result_quality.expected();

                if let Some(challenge) = challenge_quality {
                    local += weights.w_challenge_response * challenge.expected();
                }

                match peer_reputation {
                    Some(peer) => weights.reputation_weight * peer + (1.0 - weights.reputation_weight) * local,
                    None => local,
                }
            }
            Self::Hmm { hmm } => hmm.value(),
            Self::Throughput { throughput_good, .. } => {
                if *throughput_good {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn encode(&self, kind: TrustModelKind) -> Result<Vec<u8>, TrustModelError> {
        encode_tagged(kind, self)
    }

    pub fn decode(kind: TrustModelKind, bytes: &[u8]) -> Result<Self, TrustModelError> {
        decode_tagged(kind, bytes)
    }
}

fn in_ewma_vs_mean(ewma: &Gaussian, unweighted: &Gaussian) -> f64 {
    ewma.pr_at_least(unweighted.mean)
}

/// Cross-edge, per-capability throughput aggregate (Variant 5's "global"
/// Gaussian), keyed by capability name and owned by whoever aggregates
/// state across all edges offering that capability.
#[derive(Clone, Debug, Default)]
pub struct GlobalThroughputStats {
    pub in_stats: Gaussian,
    pub out_stats: Gaussian,
}

#[derive(Default)]
pub struct GlobalThroughputTable(HashMap<String, GlobalThroughputStats>);

impl GlobalThroughputTable {
    pub fn entry(&mut self, capability: &str) -> &mut GlobalThroughputStats {
        self.0.entry(capability.to_string()).or_default()
    }
}

fn encode_tagged<T: Serialize>(kind: TrustModelKind, value: &T) -> Result<Vec<u8>, TrustModelError> {
    let payload = serde_cbor_value(value)?;
    let tagged = Value::Array(vec![Value::Integer(kind.tag().into()), payload]);
    let mut out = Vec::new();
    ciborium::ser::into_writer(&tagged, &mut out).map_err(|e| TrustModelError::Encode(e.to_string()))?;
    Ok(out)
}

fn decode_tagged<T: for<'de> Deserialize<'de>>(kind: TrustModelKind, bytes: &[u8]) -> Result<T, TrustModelError> {
    let value: Value = ciborium::de::from_reader(bytes).map_err(|e| TrustModelError::Decode(e.to_string()))?;
    let items = match value {
        Value::Array(items) if items.len() == 2 => items,
        _ => return Err(TrustModelError::Decode("expected [tag, payload]".into())),
    };
    let wire_tag = items[0]
        .as_integer()
        .and_then(|i| u8::try_from(i).ok())
        .ok_or_else(|| TrustModelError::Decode("expected u8 tag".into()))?;
    if wire_tag != kind.tag() {
        return Err(TrustModelError::VariantMismatch {
            wire: wire_tag,
            configured: kind.tag(),
        });
    }
    let mut payload_bytes = Vec::new();
    ciborium::ser::into_writer(&items[1], &mut payload_bytes).map_err(|e| TrustModelError::Encode(e.to_string()))?;
    ciborium::de::from_reader(payload_bytes.as_slice()).map_err(|e| TrustModelError::Decode(e.to_string()))
}

fn serde_cbor_value<T: Serialize>(value: &T) -> Result<Value, TrustModelError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes).map_err(|e| TrustModelError::Encode(e.to_string()))?;
    ciborium::de::from_reader(bytes.as_slice()).map_err(|e| TrustModelError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_table_must_sum_to_one() {
        let mut weights = WeightTable::default();
        assert!(weights.validate().is_ok());
        weights.w_task_submission = 0.9;
        assert!(weights.validate().is_err());
    }

    #[test]
    fn badlisted_flips_on_challenge_failure_and_back() {
        let mut edge = EdgeTrustState::new(TrustModelKind::Badlisted);
        edge.apply_challenge_response(ChallengeResponseOutcome::Timeout {
            never_received: true,
            late: false,
        });
        assert!(edge.is_bad());

        edge.apply_challenge_response(ChallengeResponseOutcome::Response {
            hash_meets_difficulty: true,
            late: false,
        });
        assert!(!edge.is_bad());
    }

    #[test]
    fn finished_with_no_response_does_not_update() {
        let mut edge = EdgeTrustState::new(TrustModelKind::Reputation);
        edge.apply_task_submission(TaskSubmissionOutcome::FinishedNoResponse);
        match &edge {
            EdgeTrustState::Reputation { task_submission, .. } => {
                assert_eq!(*task_submission, Beta::default());
            }
            _ => panic!("expected reputation variant"),
        }
    }

    #[test]
    fn encode_decode_round_trips_and_rejects_variant_mismatch() {
        let edge = EdgeTrustState::new(TrustModelKind::Reputation);
        let encoded = edge.encode(TrustModelKind::Reputation).unwrap();
        let decoded = EdgeTrustState::decode(TrustModelKind::Reputation, &encoded).unwrap();
        assert_eq!(edge, decoded);

        let mismatch = EdgeTrustState::decode(TrustModelKind::Badlisted, &encoded);
        assert!(matches!(mismatch, Err(TrustModelError::VariantMismatch { .. })));
    }

    #[test]
    fn throughput_transitions_to_bad_and_allows_reconsideration() {
        let mut cap = CapabilityTrustState::new(TrustModelKind::Throughput);
        let mut global = GlobalThroughputStats::default();
        global.in_stats = Gaussian::new(1000.0, 10.0);
        global.out_stats = Gaussian::new(1000.0, 10.0);

        for t in 0..12u64 {
            cap.apply_throughput(
                ThroughputSample {
                    direction: ThroughputDirection::In,
                    bytes_per_sec: 1.0,
                },
                &mut global,
                t,
            );
            cap.apply_throughput(
                ThroughputSample {
                    direction: ThroughputDirection::Out,
                    bytes_per_sec: 1.0,
                },
                &mut global,
                t,
            );
        }

        assert!(cap.is_throughput_bad());
        assert!(cap.may_reconsider(1_000_000, 0.5));
    }

    #[test]
    fn bad_task_submission_and_result_feed_the_hmm_history() {
        let mut cap = CapabilityTrustState::new(TrustModelKind::Hmm);
        let before = cap.value(&EdgeTrustState::new(TrustModelKind::Hmm), None, None, &WeightTable::default());

        cap.apply_task_submission(TaskSubmissionOutcome::OtherStatus);
        cap.apply_task_result(TaskResultOutcome::Timeout);

        let after = cap.value(&EdgeTrustState::new(TrustModelKind::Hmm), None, None, &WeightTable::default());
        assert!(after < before);
    }

    #[test]
    fn successful_task_submission_does_not_touch_the_hmm_history() {
        let mut cap = CapabilityTrustState::new(TrustModelKind::Hmm);
        let before = cap.value(&EdgeTrustState::new(TrustModelKind::Hmm), None, None, &WeightTable::default());

        cap.apply_task_submission(TaskSubmissionOutcome::AckOk);
        cap.apply_task_result(TaskResultOutcome::ExplicitSuccess);

        let after = cap.value(&EdgeTrustState::new(TrustModelKind::Hmm), None, None, &WeightTable::default());
        assert_eq!(before, after);
    }

    #[test]
    fn reputation_scalar_is_only_reported_by_the_reputation_variant() {
        let edge = EdgeTrustState::Reputation {
            task_submission: Beta::new(3, 1),
            task_result: Beta::new(1, 1),
        };
        assert!(edge.reputation_scalar().is_some());
        assert!(EdgeTrustState::new(TrustModelKind::Hmm).reputation_scalar().is_none());
    }
}
