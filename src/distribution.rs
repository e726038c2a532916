// Copyright 2023 RisingWave Labs
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

//! Statistical outlier model over a [`HostPriorityList`](crate::scorer::HostPriorityList): the
//! fleet's scores are expected to concentrate around their mean, and nodes that stray too far in
//! either direction (by `ratio` standard deviations) are flagged for the rebalancer to act on.

use crate::scorer::HostPriorityList;

/// A host priority list augmented with its mean and population standard deviation.
#[derive(Debug, Clone)]
pub struct HostGsl {
    scores: HostPriorityList,
    mean: f64,
    sd: f64,
}

impl HostGsl {
    pub fn compute(scores: HostPriorityList) -> Self {
        let n = scores.len() as f64;
        let mean = if n == 0.0 {
            0.0
        } else {
            scores.iter().map(|(_, s)| *s as f64).sum::<f64>() / n
        };
        let sd = if n == 0.0 {
            0.0
        } else {
            let variance = scores.iter().map(|(_, s)| (*s as f64 - mean).powi(2)).sum::<f64>() / n;
            variance.sqrt()
        };
        Self { scores, mean, sd }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn sd(&self) -> f64 {
        self.sd
    }

    /// Hosts scoring below `mean - ratio * sd`. If the threshold would be non-positive, there
    /// are no left outliers in a non-negative score space, and the threshold is clamped to 0.
    pub fn outliers_left(&self, ratio: f64) -> (Vec<String>, f64) {
        let left = self.mean - ratio * self.sd;
        if left <= 0.0 {
            return (Vec::new(), 0.0);
        }
        let hosts = self
            .scores
            .iter()
            .filter(|(_, s)| (*s as f64) < left)
            .map(|(h, _)| h.clone())
            .collect();
        (hosts, left)
    }

    /// Hosts scoring above `mean + ratio * sd`.
    pub fn outliers_right(&self, ratio: f64) -> (Vec<String>, f64) {
        let right = self.mean + ratio * self.sd;
        let hosts = self
            .scores
            .iter()
            .filter(|(_, s)| (*s as f64) > right)
            .map(|(h, _)| h.clone())
            .collect();
        (hosts, right)
    }

    /// Hosts scoring below the mean, used as the candidate pool for Phase 2 of the rebalancer.
    pub fn below_mean(&self) -> Vec<String> {
        self.scores
            .iter()
            .filter(|(_, s)| (*s as f64) < self.mean)
            .map(|(h, _)| h.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gsl(scores: &[(&str, i32)]) -> HostGsl {
        HostGsl::compute(scores.iter().map(|(h, s)| (h.to_string(), *s)).collect())
    }

    #[test]
    fn single_node_has_zero_sd_and_no_outliers() {
        let g = gsl(&[("n1", 50)]);
        assert_eq!(g.sd(), 0.0);
        assert!(g.outliers_left(2.0).0.is_empty());
        assert!(g.outliers_right(2.0).0.is_empty());
    }

    #[test]
    fn no_op_steady_state_has_no_outliers() {
        let g = gsl(&[("n1", 60), ("n2", 62), ("n3", 61)]);
        assert!(g.outliers_left(2.0).0.is_empty());
        assert!(g.outliers_right(2.0).0.is_empty());
    }

    #[test]
    fn left_outlier_is_found_and_disjoint_from_right() {
        let g = gsl(&[("n1", 70), ("n2", 72), ("n3", 71), ("n4", 73), ("n5", 20)]);
        let (left_hosts, left) = g.outliers_left(2.0);
        let (right_hosts, _right) = g.outliers_right(2.0);
        assert_eq!(left_hosts, vec!["n5".to_string()]);
        assert!(left > 0.0);
        assert!(left_hosts.iter().all(|h| !right_hosts.contains(h)));
    }

    #[test]
    fn left_outliers_are_subset_of_below_mean() {
        let g = gsl(&[("n1", 70), ("n2", 72), ("n3", 71), ("n4", 73), ("n5", 20)]);
        let (left_hosts, _) = g.outliers_left(2.0);
        let below = g.below_mean();
        assert!(left_hosts.iter().all(|h| below.contains(h)));
    }

    #[test]
    fn left_threshold_never_negative() {
        let g = gsl(&[("n1", 1), ("n2", 2), ("n3", 100)]);
        let (hosts, left) = g.outliers_left(1.0);
        assert!(left >= 0.0);
        if left == 0.0 {
            assert!(hosts.is_empty());
        }
    }

    #[test]
    fn res_pressure_scenario_right_threshold_is_huge_with_high_ratio() {
        let g = gsl(&[("n1", 90), ("n2", 88), ("n3", 55), ("n4", 57)]);
        let (right_hosts, _right) = g.outliers_right(3.0);
        assert!(right_hosts.is_empty());
    }
}
