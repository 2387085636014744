//! Blends a user's taste into candidate distances.

use super::SearchError;

/// Added to norms before dividing
const NORM_EPS: f32 = 1e-12;

/// Mean of the liked vectors; `None` when there are none
pub fn preference_vector<V: AsRef<[f32]>>(liked: &[V]) -> Result<Option<Vec<f32>>, SearchError> {
    let Some(first) = liked.first() else {
        return Ok(None);
    };
    let dims = first.as_ref().len();
    let mut mean = vec![0.0f32; dims];
    for vector in liked {
        let vector = vector.as_ref();
        if vector.len() != dims {
            return Err(SearchError::InvalidParameters(format!(
                "liked vectors have mixed dimensions {} and {}",
                dims,
                vector.len()
            )));
        }
        for (m, x) in mean.iter_mut().zip(vector) {
            *m += x;
        }
    }
    let count = liked.len() as f32;
    mean.iter_mut().for_each(|m| *m /= count);
    Ok(Some(mean))
}

/// Blends `1 - cos(candidate, preference)` into base distances
#[derive(Debug, Clone, Copy)]
pub struct Personalizer {
    blend_weight: f32,
}

impl Personalizer {
    pub fn new(blend_weight: f32) -> Result<Self, SearchError> {
        if !(0.0..=1.0).contains(&blend_weight) {
            return Err(SearchError::InvalidParameters(format!(
                "blend weight must be within [0, 1], got {}",
                blend_weight
            )));
        }
        Ok(Self { blend_weight })
    }

    pub fn blend_weight(&self) -> f32 {
        self.blend_weight
    }

    /// `(1 - w) * base + w * (1 - cos)` for each candidate, in input order.
    ///
    /// With no liked vectors the base distances come back unchanged.
    pub fn blend<C, L>(
        &self,
        candidates: &[C],
        base_distances: &[f32],
        liked: &[L],
    ) -> Result<Vec<f32>, SearchError>
    where
        C: AsRef<[f32]>,
        L: AsRef<[f32]>,
    {
        if candidates.len() != base_distances.len() {
            return Err(SearchError::InvalidParameters(format!(
                "{} candidates but {} distances",
                candidates.len(),
                base_distances.len()
            )));
        }
        let Some(preference) = preference_vector(liked)? else {
            return Ok(base_distances.to_vec());
        };

        let pref_norm = norm(&preference) + NORM_EPS;
        let preference: Vec<f32> = preference.iter().map(|x| x / pref_norm).collect();
        let w = self.blend_weight;

        candidates
            .iter()
            .zip(base_distances)
            .map(|(candidate, &base)| {
                let candidate = candidate.as_ref();
                if candidate.len() != preference.len() {
                    return Err(SearchError::InvalidParameters(format!(
                        "candidate has {} dimensions, preference has {}",
                        candidate.len(),
                        preference.len()
                    )));
                }
                let candidate_norm = norm(candidate) + NORM_EPS;
                let similarity: f32 = candidate
                    .iter()
                    .zip(&preference)
                    .map(|(c, p)| c / candidate_norm * p)
                    .sum();
                Ok((1.0 - w) * base + w * (1.0 - similarity))
            })
            .collect()
    }
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_likes_is_a_noop() {
        let candidates = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let base = vec![0.4, 0.9];
        let liked: Vec<Vec<f32>> = Vec::new();

        let blended = Personalizer::new(0.3)
            .unwrap()
            .blend(&candidates, &base, &liked)
            .unwrap();
        assert_eq!(blended, base);
    }

    #[test]
    fn test_unnormalized_inputs_blend_by_direction() {
        let candidates = vec![vec![5.0, 5.0], vec![0.0, -4.0]];
        let base = vec![0.5, 0.5];
        let liked = vec![vec![10.0, 10.0]];

        let blended = Personalizer::new(1.0)
            .unwrap()
            .blend(&candidates, &base, &liked)
            .unwrap();

        assert!(blended[0].abs() < 1e-5);
        assert!((blended[1] - (1.0 + 1.0 / 2f32.sqrt())).abs() < 1e-5);
    }

    #[test]
    fn test_blend_formula() {
        let candidates = vec![vec![2.0, 0.0], vec![0.0, 3.0]];
        let base = vec![1.0, 1.0];
        let liked = vec![vec![1.0, 0.0], vec![3.0, 0.0]];

        let blended = Personalizer::new(0.3)
            .unwrap()
            .blend(&candidates, &base, &liked)
            .unwrap();

        assert!((blended[0] - 0.7).abs() < 1e-5);
        assert!((blended[1] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_blending_keeps_input_order() {
        let candidates = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        let base = vec![0.1, 0.2];
        let liked = vec![vec![1.0, 0.0]];

        let blended = Personalizer::new(1.0)
            .unwrap()
            .blend(&candidates, &base, &liked)
            .unwrap();

        assert_eq!(blended.len(), 2);
        assert!(blended[0] > blended[1]);
    }

    #[test]
    fn test_preference_vector_is_mean() {
        let liked = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        assert_eq!(preference_vector(&liked).unwrap(), Some(vec![2.0, 3.0]));

        let mixed = vec![vec![1.0], vec![1.0, 2.0]];
        assert!(preference_vector(&mixed).is_err());
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(Personalizer::new(-0.5).is_err());
        let personalizer = Personalizer::new(0.5).unwrap();
        assert!(personalizer
            .blend(&[vec![1.0]], &[0.1, 0.2], &[vec![1.0]])
            .is_err());
        assert!(personalizer
            .blend(&[vec![1.0, 0.0]], &[0.1], &[vec![1.0]])
            .is_err());
    }
}
