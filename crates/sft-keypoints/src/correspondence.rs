//! From matched keypoints to a template-to-image warp.

use crate::keypoint::matched_pair;
use crate::{KeypointError, Keypoint, Match};
use log::debug;
use sft_core::{Embedding, PointSet, RadialBasisWarp, SftError};
use std::collections::BTreeMap;

/// Resolve matches to one per cluster.
///
/// Matches are grouped by `cluster_labels[m.query]`; each group keeps its
/// smallest-distance match (the first one on ties). Output is ordered by label.
pub fn resolve_clusters(
    matches: &[Match],
    cluster_labels: &[usize],
) -> Result<Vec<Match>, KeypointError> {
    let mut best: BTreeMap<usize, Match> = BTreeMap::new();
    for m in matches {
        let label = *cluster_labels
            .get(m.query)
            .ok_or(KeypointError::MissingClusterLabel {
                labels: cluster_labels.len(),
                query: m.query,
            })?;
        best.entry(label)
            .and_modify(|cur| {
                if m.distance < cur.distance {
                    *cur = *m;
                }
            })
            .or_insert(*m);
    }
    Ok(best.into_values().collect())
}

/// Thin-plate-spline warp from template keypoint positions to image
/// keypoint positions.
#[derive(Clone, Debug)]
pub struct TpsWarp {
    warp: RadialBasisWarp,
    matches: Vec<Match>,
}

impl TpsWarp {
    /// Fit through the cluster-resolved matches.
    pub fn fit(
        template: &[Keypoint],
        image: &[Keypoint],
        matches: &[Match],
        cluster_labels: &[usize],
        regularization: f64,
    ) -> Result<Self, KeypointError> {
        let resolved = resolve_clusters(matches, cluster_labels)?;
        if resolved.is_empty() {
            return Err(SftError::EmptyInput {
                context: "correspondences for warp fit",
            }
            .into());
        }

        let mut src = Vec::with_capacity(resolved.len());
        let mut dst = Vec::with_capacity(resolved.len());
        for m in &resolved {
            let (a, b) = matched_pair(template, image, m)?;
            src.push([a.position.x as f64, a.position.y as f64]);
            dst.push([b.position.x as f64, b.position.y as f64]);
        }
        let warp = RadialBasisWarp::fit(
            &PointSet::from_rows(&src)?,
            &PointSet::from_rows(&dst)?,
            regularization,
        )?;
        debug!(
            "correspondence warp from {} of {} matches",
            resolved.len(),
            matches.len()
        );
        Ok(Self {
            warp,
            matches: resolved,
        })
    }

    /// Fit with every template keypoint in its own cluster.
    pub fn from_matches(
        template: &[Keypoint],
        image: &[Keypoint],
        matches: &[Match],
        regularization: f64,
    ) -> Result<Self, KeypointError> {
        let labels: Vec<usize> = (0..template.len()).collect();
        Self::fit(template, image, matches, &labels, regularization)
    }

    /// The matches the warp was fitted through.
    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    pub fn warp(&self) -> &RadialBasisWarp {
        &self.warp
    }
}

impl Embedding for TpsWarp {
    fn input_dim(&self) -> usize {
        2
    }

    fn output_dim(&self) -> usize {
        2
    }

    fn apply(&self, points: &PointSet) -> Result<PointSet, SftError> {
        self.warp.apply(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(query: usize, train: usize, distance: f32) -> Match {
        Match {
            query,
            train,
            distance,
        }
    }

    #[test]
    fn clusters_keep_their_closest_match() {
        let labels = [0, 0, 1, 2, 2];
        let matches = [m(0, 5, 0.4), m(1, 6, 0.2), m(2, 7, 0.9), m(3, 8, 0.3), m(4, 9, 0.3)];
        let resolved = resolve_clusters(&matches, &labels).unwrap();
        assert_eq!(resolved, vec![m(1, 6, 0.2), m(2, 7, 0.9), m(3, 8, 0.3)]);

        assert!(matches!(
            resolve_clusters(&[m(7, 0, 0.1)], &labels),
            Err(KeypointError::MissingClusterLabel { query: 7, .. })
        ));
    }

    #[test]
    fn warp_interpolates_matched_positions() {
        let template: Vec<Keypoint> = [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (10.0, 10.0), (5.0, 3.0)]
            .iter()
            .map(|&(x, y)| Keypoint::new(x, y, 4.0, 0.0))
            .collect();
        // Image keypoints in reverse order, shifted and slightly bent.
        let image: Vec<Keypoint> = template
            .iter()
            .rev()
            .map(|k| {
                let p = k.position;
                Keypoint::new(p.x + 20.0 + 0.01 * p.y * p.y, p.y - 5.0, 4.0, 0.0)
            })
            .collect();
        let matches: Vec<Match> = (0..5).map(|i| m(i, 4 - i, 0.1)).collect();

        let warp = TpsWarp::from_matches(&template, &image, &matches, 0.0).unwrap();
        let out = warp.apply_point(&[10.0, 10.0]).unwrap();
        assert!((out[0] - 31.0).abs() < 1e-6);
        assert!((out[1] - 5.0).abs() < 1e-6);

        let bad = [m(0, 99, 0.1)];
        assert!(matches!(
            TpsWarp::from_matches(&template, &image, &bad, 0.0),
            Err(KeypointError::InvalidMatch { .. })
        ));
    }

    #[test]
    fn collinear_matches_cannot_define_a_warp() {
        let kps: Vec<Keypoint> = (0..4).map(|i| Keypoint::new(i as f32, i as f32, 1.0, 0.0)).collect();
        let matches: Vec<Match> = (0..4).map(|i| m(i, i, 0.0)).collect();
        assert!(matches!(
            TpsWarp::from_matches(&kps, &kps, &matches, 0.0),
            Err(KeypointError::Core(SftError::SingularSystem { .. }))
        ));
    }
}
