//! Encoder nonlinearities.

use std::fmt;
use std::str::FromStr;

use candle_core::Tensor;
use candle_nn::Module;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Activation applied after every encoder layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Relu,
    /// ELU with alpha = 1.
    Elu,
    /// LeakyReLU with slope 0.01.
    LeakyRelu,
    Gelu,
    Tanh,
}

impl Module for Activation {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Relu => xs.relu(),
            Self::Elu => xs.elu(1.0),
            Self::LeakyRelu => candle_nn::ops::leaky_relu(xs, 0.01),
            Self::Gelu => xs.gelu_erf(),
            Self::Tanh => xs.tanh(),
        }
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relu" => Ok(Self::Relu),
            "elu" => Ok(Self::Elu),
            "leaky_relu" | "leakyrelu" => Ok(Self::LeakyRelu),
            "gelu" => Ok(Self::Gelu),
            "tanh" => Ok(Self::Tanh),
            other => Err(Error::InvalidConfig(format!("unknown activation `{other}`"))),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Relu => "relu",
            Self::Elu => "elu",
            Self::LeakyRelu => "leaky_relu",
            Self::Gelu => "gelu",
            Self::Tanh => "tanh",
        };
        f.write_str(name)
    }
}
