//! Small tensor helpers shared by the layers and the loss.

use candle_core::{Result, Tensor, D};
use candle_nn::{Init, VarBuilder};

/// Lower bound on row norms, so zero rows normalize to zero instead of NaN.
pub const NORM_EPS: f64 = 1e-12;

/// L2-normalize each row: `x_i / max(||x_i||, eps)`.
///
/// The floor is applied to the squared norm before `sqrt`, so a zero row
/// never backpropagates through `sqrt(0)` and its gradient stays finite.
pub fn l2_normalize(x: &Tensor) -> Result<Tensor> {
    let sq_norm = x.sqr()?.sum_keepdim(D::Minus1)?;
    let floor = (sq_norm.zeros_like()? + NORM_EPS * NORM_EPS)?;
    x.broadcast_div(&sq_norm.maximum(&floor)?.sqrt()?)
}

/// Diagonal of a square matrix, as a vector.
///
/// Masks with the identity and reduces rows, which keeps the op differentiable.
pub fn diagonal(m: &Tensor) -> Result<Tensor> {
    let (rows, cols) = m.dims2()?;
    if rows != cols {
        candle_core::bail!("diagonal expects a square matrix, got {rows}x{cols}")
    }
    let eye = Tensor::eye(rows, m.dtype(), m.device())?;
    m.mul(&eye)?.sum(D::Minus1)
}

/// Xavier/Glorot uniform bound: `sqrt(6 / (fan_in + fan_out))`.
pub fn xavier_bound(fan_in: usize, fan_out: usize) -> f64 {
    (6.0 / (fan_in + fan_out) as f64).sqrt()
}

/// `(fan_out, fan_in)` weight drawn from `U(-a, a)` with the Xavier bound.
pub fn xavier_uniform(fan_in: usize, fan_out: usize, name: &str, vb: &VarBuilder) -> Result<Tensor> {
    let a = xavier_bound(fan_in, fan_out);
    vb.get_with_hints((fan_out, fan_in), name, Init::Uniform { lo: -a, up: a })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_l2_normalize_unit_rows() {
        let device = Device::Cpu;
        let x = Tensor::from_vec(vec![3f32, 4.0, 0.0, 0.0, -1.0, 0.0], (3, 2), &device).unwrap();
        let out = l2_normalize(&x).unwrap().to_vec2::<f32>().unwrap();
        assert!((out[0][0] - 0.6).abs() < 1e-6);
        assert!((out[0][1] - 0.8).abs() < 1e-6);
        // Zero row stays zero.
        assert_eq!(out[1], vec![0.0, 0.0]);
        assert_eq!(out[2], vec![-1.0, 0.0]);
    }

    #[test]
    fn test_l2_normalize_zero_row_gradient_is_finite() {
        let device = Device::Cpu;
        let x = candle_core::Var::from_vec(
            vec![1f32, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.5, 2.0, 1.0],
            (3, 4),
            &device,
        )
        .unwrap();
        let weights = Tensor::randn(0f32, 1f32, (3, 4), &device).unwrap();
        let loss = l2_normalize(x.as_tensor())
            .unwrap()
            .mul(&weights)
            .unwrap()
            .sum_all()
            .unwrap();

        let grads = loss.backward().unwrap();
        let grad = grads.get(x.as_tensor()).unwrap().to_vec2::<f32>().unwrap();
        assert!(grad.iter().flatten().all(|g| g.is_finite()), "{grad:?}");
    }

    #[test]
    fn test_diagonal() {
        let device = Device::Cpu;
        let m = Tensor::from_vec(vec![1f32, 2.0, 3.0, 4.0], (2, 2), &device).unwrap();
        assert_eq!(diagonal(&m).unwrap().to_vec1::<f32>().unwrap(), vec![1.0, 4.0]);
    }

    #[test]
    fn test_diagonal_rejects_rectangular() {
        let device = Device::Cpu;
        let m = Tensor::zeros((2, 3), candle_core::DType::F32, &device).unwrap();
        assert!(diagonal(&m).is_err());
    }
}
