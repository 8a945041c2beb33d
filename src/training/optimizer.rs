/// SGD optimizer with momentum
///
/// Update rule per parameter `p` with gradient `g`:
///
/// ```text
/// buf = g                      (first step)
/// buf = momentum * buf + g     (afterwards)
/// p   = p - lr * buf
/// ```
///
/// With `momentum == 0` no buffers are kept and this is plain SGD.
use candle_core::backprop::GradStore;
use candle_core::{Result, Tensor, Var};
use candle_nn::VarMap;
use std::collections::HashMap;

use crate::VolAEError;

/// SGD configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamsSgd {
    /// Learning rate
    pub lr: f64,
    /// Momentum factor
    pub momentum: f64,
}

impl Default for ParamsSgd {
    fn default() -> Self {
        Self {
            lr: 0.1,
            momentum: 0.9,
        }
    }
}

impl ParamsSgd {
    /// Learning rate must be finite and > 0, momentum finite in `[0, 1)`
    pub fn validate(&self) -> crate::Result<()> {
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(VolAEError::Config(format!(
                "learning_rate must be a positive number, got {}",
                self.lr
            )));
        }
        if !(self.momentum.is_finite() && (0.0..1.0).contains(&self.momentum)) {
            return Err(VolAEError::Config(format!(
                "momentum must be in [0, 1), got {}",
                self.momentum
            )));
        }
        Ok(())
    }
}

/// SGD with momentum over the named parameters of a `VarMap`
pub struct Sgd {
    params: ParamsSgd,
    vars: Vec<(String, Var)>,
    /// Momentum buffers keyed by parameter name
    buffers: HashMap<String, Tensor>,
}

impl Sgd {
    /// Create new optimizer over every variable currently in `varmap`
    pub fn new(varmap: &VarMap, params: ParamsSgd) -> crate::Result<Self> {
        params.validate()?;

        let mut vars: Vec<(String, Var)> = varmap
            .data()
            .lock()
            .map_err(|_| VolAEError::Config("parameter map lock poisoned".to_string()))?
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self {
            params,
            vars,
            buffers: HashMap::new(),
        })
    }

    /// Apply one update from already computed gradients
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        for (name, var) in &self.vars {
            let grad = match grads.get(var.as_tensor()) {
                Some(grad) => grad,
                None => continue,
            };

            let update = if self.params.momentum > 0.0 {
                let buf = match self.buffers.get(name) {
                    Some(buf) => buf.affine(self.params.momentum, 0.0)?.add(grad)?,
                    None => grad.copy()?,
                };
                self.buffers.insert(name.clone(), buf.clone());
                buf
            } else {
                grad.clone()
            };

            var.set(&var.as_tensor().sub(&update.affine(self.params.lr, 0.0)?)?)?;
        }
        Ok(())
    }

    /// Backpropagate `loss` and apply one update
    ///
    /// Gradients are computed into a fresh store on every call, so there is no
    /// accumulated state to zero between steps.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward()?;
        self.step(&grads)
    }

    /// Get current learning rate
    pub fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    /// Set learning rate
    pub fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr;
    }

    pub fn momentum(&self) -> f64 {
        self.params.momentum
    }

    /// Names of the optimized parameters, sorted
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|(name, _)| name.as_str())
    }

    /// Momentum buffers keyed by parameter name
    pub fn state(&self) -> HashMap<String, Tensor> {
        self.buffers.clone()
    }

    /// Replace momentum buffers with `state`
    ///
    /// Every entry must name an optimized parameter and match its shape.
    pub fn load_state(&mut self, state: HashMap<String, Tensor>) -> crate::Result<()> {
        let mut buffers = HashMap::with_capacity(state.len());

        for (name, buf) in state {
            let var = self
                .vars
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, var)| var)
                .ok_or_else(|| {
                    VolAEError::Restore(format!("optimizer state for unknown parameter '{}'", name))
                })?;

            if buf.shape() != var.shape() {
                return Err(VolAEError::Restore(format!(
                    "optimizer state '{}' has shape {:?}, parameter has {:?}",
                    name,
                    buf.dims(),
                    var.dims()
                )));
            }

            let buf = buf.to_device(var.device())?.to_dtype(var.dtype())?;
            buffers.insert(name, buf);
        }

        self.buffers = buffers;
        Ok(())
    }
}
