//! Edge connectivity and the dense propagation matrices built from it.
//!
//! Edges are directed, stored as two parallel index lists (`sources`,
//! `targets`), and messages flow source → target. This is the same layout as
//! a `2 x E` edge-index tensor, `[sources; targets]`.
//!
//! The convolution layers consume an `N x N` propagation matrix `P` and compute
//! `P · X`, so `P[t, s]` holds the weight of the message from `s` to `t`.
//!
//! | Matrix | Formula | Used by |
//! |--------|---------|---------|
//! | [`EdgeIndex::gcn_normalized`] | `D^{-1/2} (A + I) D^{-1/2}` | GCN |
//! | [`EdgeIndex::mean_aggregation`] | `D^{-1} A` | GraphSAGE (mean) |

use candle_core::{DType, Device, Tensor};

use crate::error::{Error, Result};

/// Directed edge list over `0..num_nodes`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeIndex {
    sources: Vec<usize>,
    targets: Vec<usize>,
}

impl EdgeIndex {
    /// Build from parallel source / target lists.
    pub fn new(sources: Vec<usize>, targets: Vec<usize>) -> Result<Self> {
        if sources.len() != targets.len() {
            return Err(Error::InvalidConfig(format!(
                "edge lists differ in length: {} sources, {} targets",
                sources.len(),
                targets.len()
            )));
        }
        Ok(Self { sources, targets })
    }

    /// Build from a `2 x E` integer tensor, row 0 = sources, row 1 = targets.
    pub fn from_tensor(edge_index: &Tensor) -> Result<Self> {
        let (rows, _) = edge_index.dims2()?;
        if rows != 2 {
            return Err(Error::DimensionMismatch {
                expected: 2,
                got: rows,
            });
        }
        let rows = edge_index.to_dtype(DType::I64)?.to_vec2::<i64>()?;
        let to_index = |v: &i64| {
            usize::try_from(*v).map_err(|_| {
                Error::InvalidConfig(format!("negative node index {v} in edge index"))
            })
        };
        let sources = rows[0].iter().map(to_index).collect::<Result<Vec<_>>>()?;
        let targets = rows[1].iter().map(to_index).collect::<Result<Vec<_>>>()?;
        Self::new(sources, targets)
    }

    /// Bidirectional ring `0 - 1 - ... - (n-1) - 0`.
    ///
    /// Each undirected edge appears once per direction: two nodes get a single
    /// edge pair, one node gets none.
    pub fn ring(num_nodes: usize) -> Self {
        // The wrap-around edge (n-1, 0) repeats (0, 1) when n == 2.
        let num_pairs = if num_nodes > 2 {
            num_nodes
        } else {
            num_nodes.saturating_sub(1)
        };
        let mut sources = Vec::with_capacity(2 * num_pairs);
        let mut targets = Vec::with_capacity(2 * num_pairs);
        for i in 0..num_pairs {
            let j = (i + 1) % num_nodes;
            sources.extend([i, j]);
            targets.extend([j, i]);
        }
        Self { sources, targets }
    }

    pub fn num_edges(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn sources(&self) -> &[usize] {
        &self.sources
    }

    pub fn targets(&self) -> &[usize] {
        &self.targets
    }

    /// Iterate `(source, target)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.sources.iter().copied().zip(self.targets.iter().copied())
    }

    /// Check every endpoint is `< num_nodes`.
    pub fn validate(&self, num_nodes: usize) -> Result<()> {
        match self
            .sources
            .iter()
            .chain(&self.targets)
            .find(|&&i| i >= num_nodes)
        {
            Some(&index) => Err(Error::InvalidEdge { index, num_nodes }),
            None => Ok(()),
        }
    }

    /// Dense adjacency `A[t, s]`; duplicate edges accumulate.
    fn dense_adjacency(&self, num_nodes: usize) -> Result<Vec<f32>> {
        self.validate(num_nodes)?;
        let mut adj = vec![0f32; num_nodes * num_nodes];
        for (s, t) in self.iter() {
            adj[t * num_nodes + s] += 1.0;
        }
        Ok(adj)
    }

    /// Symmetrically normalized adjacency with self-loops.
    ///
    /// ```text
    /// A_hat = A + I        (self-loops only where missing)
    /// D_hat = diag(rowsum(A_hat))
    /// P     = D_hat^{-1/2} A_hat D_hat^{-1/2}
    /// ```
    pub fn gcn_normalized(&self, num_nodes: usize, device: &Device) -> Result<Tensor> {
        let n = num_nodes;
        let mut adj = self.dense_adjacency(n)?;
        for i in 0..n {
            if adj[i * n + i] == 0.0 {
                adj[i * n + i] = 1.0;
            }
        }

        // Every row has at least its self-loop, so the degree is positive.
        let deg_inv_sqrt: Vec<f32> = adj
            .chunks(n.max(1))
            .take(n)
            .map(|row| row.iter().sum::<f32>().powf(-0.5))
            .collect();

        for t in 0..n {
            for s in 0..n {
                let w = &mut adj[t * n + s];
                if *w != 0.0 {
                    *w *= deg_inv_sqrt[t] * deg_inv_sqrt[s];
                }
            }
        }
        Ok(Tensor::from_vec(adj, (n, n), device)?)
    }

    /// Row-normalized adjacency without self-loops: each target averages its
    /// in-neighbors. Isolated nodes aggregate to zero.
    pub fn mean_aggregation(&self, num_nodes: usize, device: &Device) -> Result<Tensor> {
        let n = num_nodes;
        let mut adj = self.dense_adjacency(n)?;
        for row in adj.chunks_mut(n.max(1)).take(n) {
            let deg: f32 = row.iter().sum();
            if deg > 0.0 {
                row.iter_mut().for_each(|w| *w /= deg);
            }
        }
        Ok(Tensor::from_vec(adj, (n, n), device)?)
    }
}
