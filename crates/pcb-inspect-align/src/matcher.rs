use crate::features::Feature;
use serde::{Deserialize, Serialize};

/// A reference-to-test descriptor correspondence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    /// Index into the reference feature list.
    pub reference_idx: usize,
    /// Index into the test feature list.
    pub test_idx: usize,
    pub distance: u32,
}

/// Brute-force two-nearest-neighbour matching with a ratio test.
///
/// For each reference feature the two closest test descriptors (Hamming
/// distance) are found; the best one is kept only when
/// `best < ratio * second_best`. Reference features with fewer than two test
/// candidates produce no match.
pub fn match_features(reference: &[Feature], test: &[Feature], ratio: f32) -> Vec<Match> {
    if test.len() < 2 {
        return Vec::new();
    }

    reference
        .iter()
        .enumerate()
        .filter_map(|(reference_idx, r)| {
            let mut best = (u32::MAX, usize::MAX);
            let mut second = u32::MAX;
            for (j, t) in test.iter().enumerate() {
                let d = r.descriptor.hamming(&t.descriptor);
                if d < best.0 {
                    second = best.0;
                    best = (d, j);
                } else if d < second {
                    second = d;
                }
            }
            ((best.0 as f32) < ratio * second as f32).then_some(Match {
                reference_idx,
                test_idx: best.1,
                distance: best.0,
            })
        })
        .collect()
}
