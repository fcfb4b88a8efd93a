use log::trace;
use nalgebra as na;
use na::{DMatrix, DVector};

pub trait LMProblem {
    fn residual(&self, p: &DVector<f64>) -> DVector<f64>;
    fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64>;
}

#[derive(Debug, Clone, Copy)]
pub struct LmOptions {
    pub max_iter: usize,
    /// Stop once an accepted step improves the residual norm by less than this.
    pub tol: f64,
    pub lambda: f64,
    pub gamma: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-8,
            lambda: 1e-3,
            gamma: 10.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LmReport {
    pub params: DVector<f64>,
    /// Squared residual norm at `params`.
    pub cost: f64,
    pub iterations: usize,
    pub converged: bool,
}

const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e16;

/// Damped Gauss-Newton with an additive damping term on the normal equations.
///
/// A zero Jacobian column yields a zero step for that parameter, which is how
/// callers hold parameters fixed.
pub fn levenberg_marquardt<P>(problem: &P, init_param: DVector<f64>, options: &LmOptions) -> LmReport
where
    P: LMProblem,
{
    let mut x = init_param;
    let mut lambda = options.lambda;
    let mut fx = problem.residual(&x);
    let mut cost = fx.norm_squared();
    let mut j = problem.jacobian(&x);
    let mut iteration = 0;
    let mut converged = false;

    while iteration < options.max_iter {
        iteration += 1;
        if cost < f64::EPSILON * f64::EPSILON {
            converged = true;
            break;
        }

        let jt = j.transpose();
        let mut jtj = &jt * &j;
        for i in 0..jtj.nrows() {
            jtj[(i, i)] += lambda;
        }
        let rhs = -(&jt * &fx);

        match jtj.lu().solve(&rhs) {
            Some(dx) => {
                let new_x = &x + &dx;
                let fx_new = problem.residual(&new_x);
                let new_cost = fx_new.norm_squared();
                trace!("iter {iteration}: cost {cost:e} -> {new_cost:e}, lambda {lambda:e}");

                if new_cost.is_finite() && new_cost < cost {
                    let improvement = cost.sqrt() - new_cost.sqrt();
                    x = new_x;
                    fx = fx_new;
                    cost = new_cost;
                    lambda = (lambda / options.gamma).max(LAMBDA_MIN);
                    if improvement < options.tol {
                        converged = true;
                        break;
                    }
                    j = problem.jacobian(&x);
                } else {
                    lambda *= options.gamma;
                    if lambda > LAMBDA_MAX {
                        // no descent direction left at this damping
                        converged = true;
                        break;
                    }
                }
            }
            None => {
                lambda *= options.gamma;
            }
        }
    }

    LmReport {
        params: x,
        cost,
        iterations: iteration,
        converged,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    /// y = a * exp(b * t)
    struct ExpFit {
        t: Vec<f64>,
        y: Vec<f64>,
    }

    impl LMProblem for ExpFit {
        fn residual(&self, p: &DVector<f64>) -> DVector<f64> {
            DVector::from_iterator(
                self.t.len(),
                self.t
                    .iter()
                    .zip(&self.y)
                    .map(|(t, y)| p[0] * (p[1] * t).exp() - y),
            )
        }

        fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64> {
            let mut j = DMatrix::zeros(self.t.len(), 2);
            for (i, t) in self.t.iter().enumerate() {
                j[(i, 0)] = (p[1] * t).exp();
                j[(i, 1)] = p[0] * t * (p[1] * t).exp();
            }
            j
        }
    }

    #[test]
    fn fits_exponential() {
        let t: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let y = t.iter().map(|t| 2.5 * (-1.3 * t).exp()).collect();
        let problem = ExpFit { t, y };

        let report =
            levenberg_marquardt(&problem, DVector::from_vec(vec![1.0, 0.0]), &LmOptions::default());
        assert!(report.converged);
        assert_relative_eq!(report.params[0], 2.5, epsilon = 1e-6);
        assert_relative_eq!(report.params[1], -1.3, epsilon = 1e-6);
    }

    #[test]
    fn zero_column_holds_parameter() {
        struct Masked(ExpFit);
        impl LMProblem for Masked {
            fn residual(&self, p: &DVector<f64>) -> DVector<f64> {
                self.0.residual(p)
            }
            fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64> {
                let mut j = self.0.jacobian(p);
                j.column_mut(0).fill(0.0);
                j
            }
        }

        let t: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let y = t.iter().map(|t| 2.0 * (-0.5 * t).exp()).collect();
        let problem = Masked(ExpFit { t, y });

        let report =
            levenberg_marquardt(&problem, DVector::from_vec(vec![2.0, 0.3]), &LmOptions::default());
        assert_eq!(report.params[0], 2.0);
        assert_relative_eq!(report.params[1], -0.5, epsilon = 1e-6);
    }
}
