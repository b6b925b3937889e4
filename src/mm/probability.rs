use std::f64::consts::PI;

/// 转移概率的默认尺度参数
pub const DEFAULT_BETA: f64 = 2.0;

/// Log-probability scoring of the HMM.
///
/// ## Emission
///
/// ```math
/// emission(d) = ln(1 / (sqrt(2π)·σ)) − 0.5·(d/σ)²
/// ```
///
/// σ 为搜索半径, d 为GPS点到投影点的距离
///
/// ## Transition
///
/// ```math
/// transition(g, l) = ln(1/β) − |g − l| / β
/// ```
///
/// g 为路网距离, l 为两个GPS点的直线距离
#[derive(Debug, Clone, Copy)]
pub struct HmmProbability {
    sigma: f64,
    beta: f64,
}

impl HmmProbability {
    pub fn new(sigma: f64) -> Self {
        HmmProbability {
            sigma,
            beta: DEFAULT_BETA,
        }
    }

    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    pub fn emission(&self, distance: f64) -> f64 {
        let normalized = distance / self.sigma;
        (1.0 / ((2.0 * PI).sqrt() * self.sigma)).ln() - 0.5 * normalized * normalized
    }

    pub fn transition(&self, graph_distance: f64, linear_distance: f64) -> f64 {
        (1.0 / self.beta).ln() - (graph_distance - linear_distance).abs() / self.beta
    }
}
