//! Two-state hidden Markov model over per-capability interaction history,
//! using the log-scaled forward algorithm for numerical stability.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::limits::HMM_HISTORY_LEN;

pub const NUM_STATES: usize = 2;
pub const NUM_OBSERVATIONS: usize = 4;

const STATE_TRUSTWORTHY: usize = 0;
const STATE_UNTRUSTWORTHY: usize = 1;

/// The four observations the emission matrix is built over.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum Observation {
    SubmissionTimedOut = 0,
    ResponseTimedOut = 1,
    ResultIncorrect = 2,
    ResultCorrect = 3,
}

const PR_GOOD_GIVEN_TRUSTWORTHY: f64 = 0.9;
const PR_BAD_GIVEN_UNTRUSTWORTHY: f64 = 0.9;
const NUM_BAD_OBSERVATIONS: f64 = (NUM_OBSERVATIONS - 1) as f64;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Hmm {
    pub initial: [f64; NUM_STATES],
    pub trans: [[f64; NUM_STATES]; NUM_STATES],
    pub emission: [[f64; NUM_OBSERVATIONS]; NUM_STATES],
    history: VecDeque<Observation>,
}

impl Hmm {
    pub fn new_default() -> Self {
        let mut emission = [[0.0; NUM_OBSERVATIONS]; NUM_STATES];
        for (state, row) in emission.iter_mut().enumerate() {
            for (obs, cell) in row.iter_mut().enumerate() {
                let good_state = state == STATE_TRUSTWORTHY;
                let good_obs = obs == Observation::ResultCorrect as usize;
                *cell = match (good_state, good_obs) {
                    (true, true) => PR_GOOD_GIVEN_TRUSTWORTHY,
                    (true, false) => (1.0 - PR_GOOD_GIVEN_TRUSTWORTHY) / NUM_BAD_OBSERVATIONS,
                    (false, true) => 1.0 - PR_BAD_GIVEN_UNTRUSTWORTHY,
                    (false, false) => PR_BAD_GIVEN_UNTRUSTWORTHY / NUM_BAD_OBSERVATIONS,
                };
            }
        }

        Self {
            initial: [0.8, 0.2],
            trans: [[0.8, 0.2], [0.8, 0.2]],
            emission,
            history: VecDeque::with_capacity(HMM_HISTORY_LEN),
        }
    }

    /// Probability of `ob` under the stationary initial distribution alone,
    /// ignoring history (used before any observation has been recorded).
    pub fn one_observation_probability(&self, ob: Observation) -> f64 {
        (0..NUM_STATES)
            .map(|i| self.initial[i] * self.emission[i][ob as usize])
            .sum()
    }

    /// Runs the scaled forward algorithm over the retained history plus a
    /// candidate observation, returning the joint probability in log-space
    /// for numerical stability (`exp(sum(log(scale_t)))`).
    pub fn observation_probability(&self, candidate: Observation) -> f64 {
        let sequence: Vec<Observation> = self
            .history
            .iter()
            .copied()
            .chain(std::iter::once(candidate))
            .collect();

        let mut alpha = [0.0f64; NUM_STATES];
        let mut log_likelihood = 0.0f64;

        for (t, ob) in sequence.iter().enumerate() {
            let mut next_alpha = [0.0f64; NUM_STATES];
            let mut scale = 0.0f64;

            for s1 in 0..NUM_STATES {
                next_alpha[s1] = if t == 0 {
                    self.initial[s1]
                } else {
                    (0..NUM_STATES).map(|s2| alpha[s2] * self.trans[s2][s1]).sum()
                };
                next_alpha[s1] *= self.emission[s1][*ob as usize];
                scale += next_alpha[s1];
            }

            if scale != 0.0 {
                for v in next_alpha.iter_mut() {
                    *v /= scale;
                }
                log_likelihood += scale.ln();
            }

            alpha = next_alpha;
        }

        log_likelihood.exp()
    }

    /// Updates the initial-state distribution given a new observation
    /// (`first` special-cases the very first observation, skipping the
    /// transition step since there is no prior state to transition from).
    pub fn update(&mut self, ob: Observation, first: bool) {
        let mut alpha = [0.0f64; NUM_STATES];
        let mut c = 0.0f64;

        for s1 in 0..NUM_STATES {
            alpha[s1] = if first {
                self.initial[s1] * self.emission[s1][ob as usize]
            } else {
                let predicted: f64 = (0..NUM_STATES).map(|s2| self.initial[s2] * self.trans[s2][s1]).sum();
                predicted * self.emission[s1][ob as usize]
            };
            c += alpha[s1];
        }

        if c != 0.0 {
            for v in alpha.iter_mut() {
                *v /= c;
            }
        }

        self.initial = alpha;

        if self.history.len() == HMM_HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(ob);
    }

    /// Trust value: the probability the next observation is "result-correct".
    pub fn value(&self) -> f64 {
        if self.history.is_empty() {
            self.one_observation_probability(Observation::ResultCorrect)
        } else {
            self.observation_probability(Observation::ResultCorrect)
        }
    }
}

impl Default for Hmm {
    fn default() -> Self {
        Self::new_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_initial_distribution_is_mostly_trustworthy() {
        let hmm = Hmm::new_default();
        assert!((hmm.initial[STATE_TRUSTWORTHY] - 0.8).abs() < 1e-9);
        assert!((hmm.initial[STATE_UNTRUSTWORTHY] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn repeated_good_observations_raise_trust_value() {
        let mut hmm = Hmm::new_default();
        let before = hmm.value();
        for i in 0..5 {
            hmm.update(Observation::ResultCorrect, i == 0);
        }
        let after = hmm.value();
        assert!(after >= before);
    }

    #[test]
    fn repeated_bad_observations_lower_trust_value() {
        let mut hmm = Hmm::new_default();
        for i in 0..5 {
            hmm.update(Observation::ResultIncorrect, i == 0);
        }
        assert!(hmm.value() < 0.5);
    }

    #[test]
    fn history_is_bounded() {
        let mut hmm = Hmm::new_default();
        for i in 0..(HMM_HISTORY_LEN * 3) {
            hmm.update(Observation::ResultCorrect, i == 0);
        }
        assert_eq!(hmm.history.len(), HMM_HISTORY_LEN);
    }
}
