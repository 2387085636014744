//! Maximal marginal relevance.
//!
//! Greedy selection that trades similarity to the query against similarity
//! to what has already been picked.

use super::SearchError;

/// Norm floor used when normalizing
const NORM_EPS: f32 = 1e-12;

/// MMR parameters
#[derive(Debug, Clone, Copy)]
pub struct Diversifier {
    /// Relevance weight in `[0, 1]`; 1 is pure relevance
    pub lambda: f32,
    pub top_k: usize,
    /// Only the `fetch_k` candidates most similar to the query are eligible
    pub fetch_k: usize,
}

impl Diversifier {
    pub fn new(lambda: f32, top_k: usize, fetch_k: usize) -> Result<Self, SearchError> {
        if !(0.0..=1.0).contains(&lambda) {
            return Err(SearchError::InvalidParameters(format!(
                "lambda must be within [0, 1], got {}",
                lambda
            )));
        }
        Ok(Self {
            lambda,
            top_k,
            fetch_k,
        })
    }

    /// Positions in `candidates` of the selected items, in pick order.
    ///
    /// Returns `min(top_k, fetch_k, candidates.len())` distinct positions.
    /// Ties go to the lower position.
    pub fn select<V: AsRef<[f32]>>(&self, query: &[f32], candidates: &[V]) -> Vec<usize> {
        let n = candidates.len();
        let fk = self.fetch_k.min(n);
        let k = self.top_k.min(fk);
        if k == 0 {
            return Vec::new();
        }

        let q = normalized(query);
        let rows: Vec<Vec<f32>> = candidates.iter().map(|c| normalized(c.as_ref())).collect();
        let sim_q: Vec<f32> = rows.iter().map(|r| dot(r, &q)).collect();

        let mut pool: Vec<usize> = (0..n).collect();
        if fk < n {
            pool.select_nth_unstable_by(fk - 1, |&a, &b| {
                sim_q[b].total_cmp(&sim_q[a]).then(a.cmp(&b))
            });
            pool.truncate(fk);
            pool.sort_unstable();
        }

        let mut sim_q_c: Vec<f32> = pool.iter().map(|&i| sim_q[i]).collect();
        let mut s_max = vec![f32::NEG_INFINITY; fk];
        let mut alive = vec![true; fk];
        let mut picked = Vec::with_capacity(k);
        let mut last: Option<usize> = None;

        for _ in 0..k {
            if let Some(last) = last {
                let newest = &rows[pool[last]];
                for (j, &i) in pool.iter().enumerate() {
                    if alive[j] {
                        s_max[j] = s_max[j].max(dot(&rows[i], newest));
                    }
                }
            }

            let mut best: Option<(usize, f32)> = None;
            for j in (0..fk).filter(|&j| alive[j]) {
                let score = match last {
                    None => sim_q_c[j],
                    Some(_) => self.lambda * sim_q_c[j] - (1.0 - self.lambda) * s_max[j],
                };
                if best.is_none_or(|(_, top)| score > top) {
                    best = Some((j, score));
                }
            }
            let Some((j, _)) = best else { break };

            picked.push(pool[j]);
            alive[j] = false;
            sim_q_c[j] = f32::NEG_INFINITY;
            s_max[j] = f32::INFINITY;
            last = Some(j);
        }
        picked
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalized(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(NORM_EPS);
    v.iter().map(|x| x / norm).collect()
}
