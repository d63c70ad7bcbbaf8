//! Linear probe for evaluating frozen embeddings.

use candle_core::Tensor;
use candle_nn::{Init, Linear, Module, VarBuilder};

use crate::error::{Error, Result};
use crate::ops::xavier_uniform;

/// Logistic-regression head: one linear layer, raw class scores out.
///
/// Weights are Xavier-uniform, bias starts at zero. Pair with
/// `candle_nn::loss::cross_entropy` for training.
pub struct LogReg {
    fc: Linear,
}

impl LogReg {
    /// Parameters: `fc.weight` (nb_classes x ft_in), `fc.bias` (nb_classes).
    pub fn new(ft_in: usize, nb_classes: usize, vb: VarBuilder) -> Result<Self> {
        if ft_in == 0 || nb_classes == 0 {
            return Err(Error::InvalidConfig(format!(
                "logreg dimensions must be > 0, got in={ft_in} classes={nb_classes}"
            )));
        }
        let vb = vb.pp("fc");
        let weight = xavier_uniform(ft_in, nb_classes, "weight", &vb)?;
        let bias = vb.get_with_hints(nb_classes, "bias", Init::Const(0.0))?;
        Ok(Self {
            fc: Linear::new(weight, Some(bias)),
        })
    }

    /// Class scores, (N x nb_classes).
    pub fn forward(&self, seq: &Tensor) -> Result<Tensor> {
        Ok(self.fc.forward(seq)?)
    }
}
