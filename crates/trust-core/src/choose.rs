//! Edge-selection policies: given a capability name and the set of known
//! candidate edges, pick one to route a task to.

use rand::Rng;
use thiserror::Error;

use crate::registry::{EdgeHandle, Registry};

#[derive(Debug, Error)]
pub enum ChooseError {
    #[error("no active edge offers this capability")]
    NoCandidates,
}

/// Width of the trust-value band around the highest-trust candidate that
/// the banded strategy draws uniformly from.
pub const BAND_SIZE: f64 = 0.25;

/// Default exponential-CDF threshold past which a throughput-bad
/// capability becomes reconsiderable again.
pub const DEFAULT_RECONSIDER_THRESHOLD: f64 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChooseStrategy {
    Random,
    Banded,
    Proportional,
    Badlisted,
    Fcfs,
}

struct Candidate {
    handle: EdgeHandle,
    trust_value: f64,
    arrival_order: usize,
    is_bad: bool,
}

/// Builds the candidate pool: active edges offering an active instance of
/// `capability`, with throughput-bad-and-not-yet-reconsiderable capabilities
/// dropped up front regardless of strategy (the throughput-probabilistic
/// variant's filter applies before any strategy-specific selection runs).
fn candidates(
    registry: &Registry,
    capability: &str,
    trust_value_of: impl Fn(EdgeHandle) -> f64,
    now_secs: u64,
    reconsider_threshold: f64,
) -> Vec<Candidate> {
    registry
        .iter_edges()
        .enumerate()
        .filter_map(|(order, edge)| {
            if !edge.active {
                return None;
            }
            let handle = registry.find_edge_by_eui64(&edge.eui64)?;
            let cap_handle = registry.find_capability(handle, capability)?;
            let cap = registry.capability(cap_handle).ok()?;
            if !cap.active {
                return None;
            }
            if cap.trust.is_throughput_bad() && !cap.trust.may_reconsider(now_secs, reconsider_threshold) {
                return None;
            }
            Some(Candidate {
                handle,
                trust_value: trust_value_of(handle),
                arrival_order: order,
                is_bad: edge.trust.is_bad(),
            })
        })
        .collect()
}

/// Picks a candidate edge for `capability` according to `strategy`.
///
/// `trust_value_of` supplies each candidate's current trust value (the
/// caller owns the trust-model state and computes it per-edge). `now_secs`
/// and `reconsider_threshold` drive the throughput-bad filter applied to
/// every strategy; the `Badlisted` strategy additionally filters on
/// `EdgeTrustState::is_bad()` rather than on trust value.
pub fn choose_edge(
    registry: &Registry,
    capability: &str,
    strategy: ChooseStrategy,
    trust_value_of: impl Fn(EdgeHandle) -> f64,
    now_secs: u64,
    reconsider_threshold: f64,
    rng: &mut impl Rng,
) -> Result<EdgeHandle, ChooseError> {
    let mut pool = candidates(registry, capability, trust_value_of, now_secs, reconsider_threshold);
    if pool.is_empty() {
        return Err(ChooseError::NoCandidates);
    }

    match strategy {
        ChooseStrategy::Random => {
            let index = rng.gen_range(0..pool.len());
            Ok(pool.remove(index).handle)
        }

        ChooseStrategy::Fcfs => {
            pool.sort_by_key(|c| c.arrival_order);
            Ok(pool.remove(0).handle)
        }

        ChooseStrategy::Badlisted => {
            pool.retain(|c| !c.is_bad);
            if pool.is_empty() {
                return Err(ChooseError::NoCandidates);
            }
            let index = rng.gen_range(0..pool.len());
            Ok(pool.remove(index).handle)
        }

        ChooseStrategy::Banded => {
            let highest = pool
                .iter()
                .map(|c| c.trust_value)
                .fold(f64::MIN, f64::max);
            pool.retain(|c| c.trust_value >= highest - BAND_SIZE);
            let index = rng.gen_range(0..pool.len());
            Ok(pool.remove(index).handle)
        }

        ChooseStrategy::Proportional => {
            let total: f64 = pool.iter().map(|c| c.trust_value.max(0.0)).sum();
            if total <= 0.0 {
                let index = rng.gen_range(0..pool.len());
                return Ok(pool.remove(index).handle);
            }
            let mut target = rng.gen_range(0.0..total);
            for candidate in &pool {
                let weight = candidate.trust_value.max(0.0);
                if target < weight {
                    return Ok(candidate.handle);
                }
                target -= weight;
            }
            Ok(pool.last().unwrap().handle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust_model::{CapabilityTrustState, EdgeTrustState, ThroughputDirection, ThroughputSample, TrustModelKind};
    use rand::rngs::mock::StepRng;

    fn registry_with_edges(n: u8) -> Registry {
        let mut registry = Registry::new(TrustModelKind::None);
        for i in 0..n {
            let edge = registry
                .add_edge(crate::eui64::Eui64([i; 8]), format!("fe80::{}", i + 1).parse().unwrap())
                .unwrap();
            registry.add_capability(edge, "sense").unwrap();
        }
        registry
    }

    #[test]
    fn empty_candidate_set_errors() {
        let registry = Registry::new(TrustModelKind::None);
        let mut rng = StepRng::new(0, 1);
        let result = choose_edge(&registry, "sense", ChooseStrategy::Random, |_| 1.0, 0, DEFAULT_RECONSIDER_THRESHOLD, &mut rng);
        assert!(matches!(result, Err(ChooseError::NoCandidates)));
    }

    #[test]
    fn banded_strategy_excludes_low_trust_outliers() {
        let registry = registry_with_edges(3);
        let handles: Vec<_> = registry.iter_edges().map(|e| registry.find_edge_by_eui64(&e.eui64).unwrap()).collect();
        let low = handles[0];

        let mut rng = StepRng::new(0, 1);
        for _ in 0..20 {
            let chosen = choose_edge(&registry, "sense", ChooseStrategy::Banded, |h| {
                if h == low { 0.1 } else { 0.9 }
            }, 0, DEFAULT_RECONSIDER_THRESHOLD, &mut rng)
            .unwrap();
            assert_ne!(chosen, low);
        }
    }

    #[test]
    fn badlisted_strategy_excludes_bad_edges() {
        let mut registry = Registry::new(TrustModelKind::Badlisted);
        let bad = registry.add_edge(crate::eui64::Eui64([0; 8]), "fe80::1".parse().unwrap()).unwrap();
        let good = registry.add_edge(crate::eui64::Eui64([1; 8]), "fe80::2".parse().unwrap()).unwrap();
        registry.add_capability(bad, "sense").unwrap();
        registry.add_capability(good, "sense").unwrap();
        registry.edge_mut(bad).unwrap().trust = EdgeTrustState::Badlisted { bad: true };

        let mut rng = StepRng::new(0, 1);
        let chosen = choose_edge(&registry, "sense", ChooseStrategy::Badlisted, |_| 1.0, 0, DEFAULT_RECONSIDER_THRESHOLD, &mut rng)
            .unwrap();
        assert_ne!(chosen, bad);
        assert_eq!(chosen, good);
    }

    #[test]
    fn fcfs_picks_earliest_registered_edge() {
        let registry = registry_with_edges(3);
        let mut rng = StepRng::new(0, 1);
        let first = registry.find_edge_by_eui64(&crate::eui64::Eui64([0; 8])).unwrap();
        let chosen = choose_edge(&registry, "sense", ChooseStrategy::Fcfs, |_| 1.0, 0, DEFAULT_RECONSIDER_THRESHOLD, &mut rng).unwrap();
        assert_eq!(chosen, first);
    }

    #[test]
    fn throughput_bad_capability_is_dropped_until_reconsiderable() {
        let mut registry = registry_with_edges(2);
        let handles: Vec<_> = registry.iter_edges().map(|e| registry.find_edge_by_eui64(&e.eui64).unwrap()).collect();
        let degraded = handles[0];

        let cap_handle = registry.find_capability(degraded, "sense").unwrap();
        let mut global = crate::trust_model::GlobalThroughputStats {
            in_stats: crate::trust_model::Gaussian::new(1000.0, 10.0),
            out_stats: crate::trust_model::Gaussian::new(1000.0, 10.0),
        };
        {
            let cap = registry.capability_mut(cap_handle).unwrap();
            cap.trust = CapabilityTrustState::new(TrustModelKind::Throughput);
            for t in 0..12u64 {
                cap.trust.apply_throughput(
                    ThroughputSample { direction: ThroughputDirection::In, bytes_per_sec: 1.0 },
                    &mut global,
                    t,
                );
                cap.trust.apply_throughput(
                    ThroughputSample { direction: ThroughputDirection::Out, bytes_per_sec: 1.0 },
                    &mut global,
                    t,
                );
            }
        }
        assert!(registry.capability(cap_handle).unwrap().trust.is_throughput_bad());

        // Fcfs always prefers the earliest-registered (`degraded`) edge when
        // it is an eligible candidate, so its absence/presence in the
        // result pins down whether the throughput filter excluded it.
        let mut rng = StepRng::new(0, 1);
        let chosen = choose_edge(&registry, "sense", ChooseStrategy::Fcfs, |_| 1.0, 11, 0.99, &mut rng).unwrap();
        assert_ne!(chosen, degraded);

        // Once enough time has passed for the reconsideration CDF to clear
        // the threshold, the degraded edge becomes eligible again.
        let mut rng = StepRng::new(0, 1);
        let chosen = choose_edge(&registry, "sense", ChooseStrategy::Fcfs, |_| 1.0, 1_000_000, 0.5, &mut rng).unwrap();
        assert_eq!(chosen, degraded);
    }
}
