//! Keypoints, descriptors and matches exchanged with feature providers.

use crate::KeypointError;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// An oriented, scaled image feature.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    /// Pixel position.
    pub position: Point2<f32>,
    /// Diameter of the feature's support region.
    pub size: f32,
    /// Orientation in degrees.
    pub angle: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, size: f32, angle: f32) -> Self {
        Self {
            position: Point2::new(x, y),
            size,
            angle,
        }
    }
}

/// Row-major descriptor matrix: one fixed-length vector per keypoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Descriptors {
    length: usize,
    data: Vec<f32>,
}

impl Descriptors {
    pub fn new(length: usize, data: Vec<f32>) -> Result<Self, KeypointError> {
        if length == 0 || data.len() % length != 0 {
            return Err(KeypointError::DescriptorLength {
                expected: length,
                got: data.len(),
            });
        }
        Ok(Self { length, data })
    }

    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, KeypointError> {
        let length = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * length);
        for r in rows {
            if r.len() != length {
                return Err(KeypointError::DescriptorLength {
                    expected: length,
                    got: r.len(),
                });
            }
            data.extend_from_slice(r);
        }
        Ok(Self { length, data })
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        if self.length == 0 {
            0
        } else {
            self.data.len() / self.length
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Entries per descriptor.
    pub fn descriptor_len(&self) -> usize {
        self.length
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.length..(i + 1) * self.length]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> + '_ {
        (0..self.len()).map(move |i| self.row(i))
    }

    /// Subset by row indices, in order.
    pub fn select(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.length);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Self {
            length: self.length,
            data,
        }
    }
}

/// Extracted features: keypoints with order-aligned descriptors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Descriptors,
}

impl Features {
    pub fn new(keypoints: Vec<Keypoint>, descriptors: Descriptors) -> Result<Self, KeypointError> {
        if !descriptors.is_empty() && keypoints.len() != descriptors.len() {
            return Err(KeypointError::DescriptorCount {
                keypoints: keypoints.len(),
                descriptors: descriptors.len(),
            });
        }
        Ok(Self {
            keypoints,
            descriptors,
        })
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Keep the features whose mask entry is set.
    pub fn filter(&self, mask: &[bool]) -> Self {
        let keep: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i))
            .filter(|&i| i < self.keypoints.len())
            .collect();
        Self {
            keypoints: keep.iter().map(|&i| self.keypoints[i]).collect(),
            descriptors: self.descriptors.select(&keep),
        }
    }
}

/// A query-to-train correspondence.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Index into the query keypoints/descriptors.
    pub query: usize,
    /// Index into the train keypoints/descriptors.
    pub train: usize,
    pub distance: f32,
}

/// Look up both keypoints of a match.
pub(crate) fn matched_pair<'a>(
    query: &'a [Keypoint],
    train: &'a [Keypoint],
    m: &Match,
) -> Result<(&'a Keypoint, &'a Keypoint), KeypointError> {
    match (query.get(m.query), train.get(m.train)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(KeypointError::InvalidMatch {
            query: m.query,
            train: m.train,
        }),
    }
}
