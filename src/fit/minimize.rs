//! Bounded minimisation of smooth scalar objectives.
//!
//! [`Minimizer`] is the seam between the 3D track fit and the numerical
//! engine. [`DampedNewton`] is the built-in engine: Newton steps on a
//! central-difference gradient and Hessian, stabilised with Levenberg-style
//! damping whose strength follows the ratio of actual to predicted decrease.
//! Convergence is declared when the estimated distance to the minimum
//! (`0.5 * g^T H^-1 g`) drops below `edm_tolerance` with a positive definite
//! Hessian. Failed runs are retried from perturbed seeds.

use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Result of one minimisation.
#[derive(Clone, Debug, PartialEq)]
pub struct Minimum {
    pub params: Vec<f64>,
    pub value: f64,
    pub converged: bool,
    pub iterations: usize,
}

pub trait Minimizer: Send + Sync {
    /// Minimises `objective` starting at `initial`, keeping every parameter
    /// inside its `(lower, upper)` bound.
    fn minimize(
        &self,
        objective: &(dyn Fn(&[f64]) -> f64 + Sync),
        initial: &[f64],
        bounds: &[(f64, f64)],
    ) -> Minimum;
}

/// Parameters of [`DampedNewton`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DampedNewtonParams {
    /// Newton iterations per start.
    pub max_iterations: usize,
    /// Estimated distance to minimum below which a start counts as converged.
    pub edm_tolerance: f64,
    /// Relative finite-difference step.
    pub step_scale: f64,
    pub initial_lambda: f64,
    pub lambda_factor: f64,
    pub max_lambda: f64,
    /// Additional starts tried when the first one does not converge.
    pub restarts: usize,
    /// Relative size of the seed perturbation used by restarts.
    pub restart_spread: f64,
}

impl Default for DampedNewtonParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            edm_tolerance: 1e-6,
            step_scale: 1e-5,
            initial_lambda: 1e-3,
            lambda_factor: 10.0,
            max_lambda: 1e10,
            restarts: 2,
            restart_spread: 0.05,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DampedNewton {
    pub params: DampedNewtonParams,
}

impl DampedNewton {
    pub fn new(params: DampedNewtonParams) -> Self {
        Self { params }
    }

    fn run(
        &self,
        objective: &(dyn Fn(&[f64]) -> f64 + Sync),
        initial: &[f64],
        bounds: &[(f64, f64)],
    ) -> Minimum {
        let p = &self.params;
        let n = initial.len();
        let mut x = initial.to_vec();
        clamp_in_place(&mut x, bounds);
        let mut f = objective(x.as_slice());
        let mut lambda = p.initial_lambda;
        let mut scratch = Scratch::new(n);

        for iter in 0..p.max_iterations {
            scratch.derivatives(objective, &x, f, p.step_scale);
            if let Some(edm) = estimated_distance(&scratch.grad, &scratch.hess) {
                if edm < p.edm_tolerance {
                    return Minimum {
                        params: x,
                        value: f,
                        converged: true,
                        iterations: iter,
                    };
                }
            }

            let mut accepted = false;
            while lambda < p.max_lambda {
                let Scratch {
                    grad,
                    hess,
                    damped,
                    trial,
                    ..
                } = &mut scratch;
                damped.copy_from(&*hess);
                for i in 0..n {
                    damped[(i, i)] += lambda * hess[(i, i)].abs().max(1e-12);
                }
                let Some(chol) = damped.clone().cholesky() else {
                    lambda *= p.lambda_factor;
                    continue;
                };
                let step = -chol.solve(&*grad);
                for i in 0..n {
                    trial[i] = x[i] + step[i];
                }
                clamp_in_place(trial, bounds);
                let f_new = objective(trial.as_slice());
                let predicted = -(grad.dot(&step) + 0.5 * step.dot(&(&*hess * &step)));
                if f_new.is_finite() && f_new < f {
                    let rho = if predicted > 0.0 {
                        (f - f_new) / predicted
                    } else {
                        0.0
                    };
                    if rho > 0.75 {
                        lambda = (lambda / p.lambda_factor).max(1e-12);
                    } else if rho > 0.25 {
                        lambda = (lambda / p.lambda_factor.sqrt()).max(1e-12);
                    }
                    x.copy_from_slice(&trial[..]);
                    f = f_new;
                    accepted = true;
                    break;
                }
                lambda *= p.lambda_factor;
            }
            if !accepted {
                // No downhill step left; accept the point only if it is a minimum.
                scratch.derivatives(objective, &x, f, p.step_scale);
                let converged = estimated_distance(&scratch.grad, &scratch.hess)
                    .is_some_and(|edm| edm < p.edm_tolerance);
                return Minimum {
                    params: x,
                    value: f,
                    converged,
                    iterations: iter + 1,
                };
            }
        }

        Minimum {
            params: x,
            value: f,
            converged: false,
            iterations: p.max_iterations,
        }
    }

    fn perturbed_seed(&self, initial: &[f64], bounds: &[(f64, f64)], restart: usize) -> Vec<f64> {
        let sign = if restart % 2 == 0 { 1.0 } else { -1.0 };
        let magnitude = self.params.restart_spread * restart.div_ceil(2) as f64;
        let mut seed: Vec<f64> = initial
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let alternate = if i % 2 == 0 { sign } else { -sign };
                v + alternate * magnitude * v.abs().max(1.0)
            })
            .collect();
        clamp_in_place(&mut seed, bounds);
        seed
    }
}

impl Minimizer for DampedNewton {
    fn minimize(
        &self,
        objective: &(dyn Fn(&[f64]) -> f64 + Sync),
        initial: &[f64],
        bounds: &[(f64, f64)],
    ) -> Minimum {
        let first = self.run(objective, initial, bounds);
        if first.converged || self.params.restarts == 0 {
            return first;
        }
        debug!(
            "minimiser did not converge after {} iterations (value {:.4e}), trying {} restarts",
            first.iterations, first.value, self.params.restarts
        );

        #[cfg(feature = "parallel")]
        let retries: Vec<Minimum> = (1..=self.params.restarts)
            .into_par_iter()
            .map(|r| self.run(objective, &self.perturbed_seed(initial, bounds, r), bounds))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let retries: Vec<Minimum> = (1..=self.params.restarts)
            .map(|r| self.run(objective, &self.perturbed_seed(initial, bounds, r), bounds))
            .collect();

        let mut iterations = first.iterations;
        let mut best = first;
        for m in retries {
            iterations += m.iterations;
            let better = match (m.converged, best.converged) {
                (true, false) => true,
                (false, true) => false,
                _ => m.value < best.value,
            };
            if better {
                best = m;
            }
        }
        best.iterations = iterations;
        best
    }
}

fn clamp_in_place(x: &mut [f64], bounds: &[(f64, f64)]) {
    for (v, &(lo, hi)) in x.iter_mut().zip(bounds) {
        *v = v.clamp(lo, hi);
    }
}

/// Buffers of one minimisation, sized once per start.
struct Scratch {
    steps: Vec<f64>,
    probe: Vec<f64>,
    trial: Vec<f64>,
    grad: DVector<f64>,
    hess: DMatrix<f64>,
    damped: DMatrix<f64>,
}

impl Scratch {
    fn new(n: usize) -> Self {
        Self {
            steps: vec![0.0; n],
            probe: vec![0.0; n],
            trial: vec![0.0; n],
            grad: DVector::zeros(n),
            hess: DMatrix::zeros(n, n),
            damped: DMatrix::zeros(n, n),
        }
    }

    /// Central-difference gradient and Hessian at `x`, where
    /// `fx = objective(x)`.
    fn derivatives(
        &mut self,
        objective: &(dyn Fn(&[f64]) -> f64 + Sync),
        x: &[f64],
        fx: f64,
        step_scale: f64,
    ) {
        let n = x.len();
        for (h, v) in self.steps.iter_mut().zip(x) {
            *h = step_scale * v.abs().max(1.0);
        }
        self.probe.copy_from_slice(x);
        let h = &self.steps;
        let probe = &mut self.probe;
        let mut eval = |moves: &[(usize, f64)]| {
            for &(i, d) in moves {
                probe[i] = x[i] + d;
            }
            let v = objective(probe.as_slice());
            for &(i, _) in moves {
                probe[i] = x[i];
            }
            v
        };

        for i in 0..n {
            let fp = eval(&[(i, h[i])]);
            let fm = eval(&[(i, -h[i])]);
            self.grad[i] = (fp - fm) / (2.0 * h[i]);
            self.hess[(i, i)] = (fp - 2.0 * fx + fm) / (h[i] * h[i]);
        }
        for i in 0..n {
            for j in (i + 1)..n {
                let fpp = eval(&[(i, h[i]), (j, h[j])]);
                let fpm = eval(&[(i, h[i]), (j, -h[j])]);
                let fmp = eval(&[(i, -h[i]), (j, h[j])]);
                let fmm = eval(&[(i, -h[i]), (j, -h[j])]);
                let v = (fpp - fpm - fmp + fmm) / (4.0 * h[i] * h[j]);
                self.hess[(i, j)] = v;
                self.hess[(j, i)] = v;
            }
        }
    }
}

/// `0.5 * g^T H^-1 g`, or `None` when `H` is not positive definite.
fn estimated_distance(grad: &DVector<f64>, hess: &DMatrix<f64>) -> Option<f64> {
    let chol = hess.clone().cholesky()?;
    let edm = 0.5 * grad.dot(&chol.solve(grad));
    edm.is_finite().then_some(edm)
}
