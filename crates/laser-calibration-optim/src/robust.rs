use laser_calibration_core::Real;
use serde::{Deserialize, Serialize};

/// Robust loss applied to the norm of each observation's residual.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RobustLoss {
    /// Plain least squares.
    #[default]
    None,
    /// Quadratic up to `scale`, linear beyond.
    Huber { scale: Real },
    /// `scale^2 * ln(1 + r^2 / scale^2)`.
    Cauchy { scale: Real },
}

impl RobustLoss {
    /// Loss `rho(r^2)` and IRLS weight `w` for a squared residual norm.
    pub fn rho_and_weight(self, r2: Real) -> (Real, Real) {
        match self {
            RobustLoss::None => (r2, 1.0),
            RobustLoss::Huber { scale } => {
                let r = r2.sqrt();
                if r <= scale {
                    (r2, 1.0)
                } else {
                    (2.0 * scale * r - scale * scale, scale / r)
                }
            }
            RobustLoss::Cauchy { scale } => {
                let c2 = scale * scale;
                let t = r2 / c2;
                (c2 * (1.0 + t).ln(), 1.0 / (1.0 + t))
            }
        }
    }

    pub fn is_valid(self) -> bool {
        match self {
            RobustLoss::None => true,
            RobustLoss::Huber { scale } | RobustLoss::Cauchy { scale } => {
                scale.is_finite() && scale > 0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huber_is_quadratic_then_linear() {
        let huber = RobustLoss::Huber { scale: 1.0 };
        assert_eq!(huber.rho_and_weight(0.25), (0.25, 1.0));
        let (rho, w) = huber.rho_and_weight(25.0);
        assert!((rho - 9.0).abs() < 1e-12);
        assert!((w - 0.2).abs() < 1e-12);
    }

    #[test]
    fn cauchy_downweights_large_residuals() {
        let cauchy = RobustLoss::Cauchy { scale: 1.0 };
        let (_, near) = cauchy.rho_and_weight(0.01);
        let (_, far) = cauchy.rho_and_weight(100.0);
        assert!(near > 0.99 && far < 0.01);
        assert!(!RobustLoss::Cauchy { scale: 0.0 }.is_valid());
        assert!(RobustLoss::None.is_valid());
    }
}
