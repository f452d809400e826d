//! Descriptor matching with Lowe's ratio test.

use crate::{Descriptors, KeypointError, KnnMatcher, Match, Neighbor};
use kiddo::{KdTree, SquaredEuclidean};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatioTestParams {
    /// Neighbors requested per query; the test uses the first two.
    pub k: usize,
    /// Keep the best neighbor only if `best < ratio · second`.
    pub ratio: f32,
}

impl Default for RatioTestParams {
    fn default() -> Self {
        Self { k: 2, ratio: 0.75 }
    }
}

/// Lowe's ratio test on the two closest distances.
#[inline]
pub fn passes_ratio_test(best: f32, second: f32, ratio: f32) -> bool {
    best < ratio * second
}

/// Matches surviving the ratio test, one per query at most.
///
/// Queries with fewer than two neighbors are skipped.
pub fn match_ratio_test<M: KnnMatcher + ?Sized>(
    matcher: &M,
    query: &Descriptors,
    train: &Descriptors,
    params: &RatioTestParams,
) -> Result<Vec<Match>, KeypointError> {
    let k = params.k.max(2);
    let lists = matcher.knn_match(query, train, k)?;
    let matches: Vec<Match> = lists
        .iter()
        .enumerate()
        .filter_map(|(q, nn)| match nn.as_slice() {
            [best, second, ..] if passes_ratio_test(best.distance, second.distance, params.ratio) => {
                Some(Match {
                    query: q,
                    train: best.index,
                    distance: best.distance,
                })
            }
            _ => None,
        })
        .collect();
    debug!(
        "ratio test kept {} of {} queries (ratio {})",
        matches.len(),
        lists.len(),
        params.ratio
    );
    Ok(matches)
}

/// The closest train descriptor for every query, no filtering.
pub fn match_best<M: KnnMatcher + ?Sized>(
    matcher: &M,
    query: &Descriptors,
    train: &Descriptors,
) -> Result<Vec<Match>, KeypointError> {
    let lists = matcher.knn_match(query, train, 1)?;
    Ok(lists
        .iter()
        .enumerate()
        .filter_map(|(q, nn)| {
            nn.first().map(|best| Match {
                query: q,
                train: best.index,
                distance: best.distance,
            })
        })
        .collect())
}

fn check_lengths(query: &Descriptors, train: &Descriptors) -> Result<(), KeypointError> {
    if !query.is_empty() && !train.is_empty() && query.descriptor_len() != train.descriptor_len()
    {
        return Err(KeypointError::DescriptorLength {
            expected: train.descriptor_len(),
            got: query.descriptor_len(),
        });
    }
    Ok(())
}

/// Exact Euclidean k-NN by exhaustive search.
#[derive(Clone, Copy, Debug, Default)]
pub struct BruteForceMatcher;

impl KnnMatcher for BruteForceMatcher {
    fn knn_match(
        &self,
        query: &Descriptors,
        train: &Descriptors,
        k: usize,
    ) -> Result<Vec<Vec<Neighbor>>, KeypointError> {
        check_lengths(query, train)?;
        Ok(query
            .rows()
            .map(|q| {
                let mut all: Vec<Neighbor> = train
                    .rows()
                    .enumerate()
                    .map(|(index, t)| Neighbor {
                        index,
                        distance: euclidean(q, t),
                    })
                    .collect();
                all.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.index.cmp(&b.index)));
                all.truncate(k);
                all
            })
            .collect())
    }
}

#[inline]
fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// k-NN through a kd-tree over `D`-dimensional descriptors.
///
/// The tree is rebuilt per call from the train set.
#[derive(Clone, Copy, Debug, Default)]
pub struct KdTreeMatcher<const D: usize>;

impl<const D: usize> KdTreeMatcher<D> {
    fn to_array(row: &[f32]) -> Result<[f32; D], KeypointError> {
        row.try_into().map_err(|_| KeypointError::DescriptorLength {
            expected: D,
            got: row.len(),
        })
    }
}

impl<const D: usize> KnnMatcher for KdTreeMatcher<D> {
    fn knn_match(
        &self,
        query: &Descriptors,
        train: &Descriptors,
        k: usize,
    ) -> Result<Vec<Vec<Neighbor>>, KeypointError> {
        if train.is_empty() || k == 0 {
            return Ok(vec![Vec::new(); query.len()]);
        }
        let coords = train
            .rows()
            .map(Self::to_array)
            .collect::<Result<Vec<_>, _>>()?;
        let tree: KdTree<f32, D> = (&coords).into();

        query
            .rows()
            .map(|row| {
                let q = Self::to_array(row)?;
                Ok(tree
                    .nearest_n::<SquaredEuclidean>(&q, k)
                    .into_iter()
                    .map(|nn| Neighbor {
                        index: nn.item as usize,
                        distance: nn.distance.sqrt(),
                    })
                    .collect())
            })
            .collect()
    }
}
