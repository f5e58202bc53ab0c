//! Composite Gauss-Legendre quadrature.
//!
//! Window integrals over activation-delay densities are smooth on each panel,
//! so a fixed 32-point rule per panel with the panel count as the only knob
//! is accurate well below the tolerances used downstream.

use num_traits::Zero;
use std::ops::Mul;

/// Points per panel.
pub const GL_POINTS: usize = 32;

/// Positive abscissae of the 32-point rule on `[-1, 1]`.
const GL32_NODES: [f64; 16] = [
    0.04830766568773831,
    0.14447196158279649,
    0.23928736225213707,
    0.33186860228212767,
    0.42135127613063534,
    0.50689990893222942,
    0.58771575724076233,
    0.66304426693021520,
    0.73218211874028968,
    0.79448379596794241,
    0.84936761373256997,
    0.89632115576605212,
    0.93490607593773969,
    0.96476225558750643,
    0.98561151154526834,
    0.99726386184948156,
];

/// Weights matching [`GL32_NODES`].
const GL32_WEIGHTS: [f64; 16] = [
    0.09654008851472780,
    0.09563872007927486,
    0.09384439908080457,
    0.09117387869576389,
    0.08765209300440381,
    0.08331192422694676,
    0.07819389578707031,
    0.07234579410884851,
    0.06582222277636185,
    0.05868409347853555,
    0.05099805926237618,
    0.04283589802222668,
    0.03427386291302143,
    0.02539206530926206,
    0.01627439473090567,
    0.00701861000947009,
];

/// Nodes and weights of the composite rule on `[a, b]` with `panels` equal panels.
///
/// Returns empty vectors when `b <= a`.
pub fn gauss_legendre(a: f64, b: f64, panels: usize) -> (Vec<f64>, Vec<f64>) {
    if panels == 0 || a.is_nan() || b.is_nan() || b <= a {
        return (Vec::new(), Vec::new());
    }
    let h = (b - a) / panels as f64;
    let half = 0.5 * h;
    let mut nodes = Vec::with_capacity(panels * GL_POINTS);
    let mut weights = Vec::with_capacity(panels * GL_POINTS);
    for p in 0..panels {
        let mid = a + (p as f64 + 0.5) * h;
        for (&x, &w) in GL32_NODES.iter().zip(&GL32_WEIGHTS) {
            nodes.push(mid - half * x);
            weights.push(half * w);
            nodes.push(mid + half * x);
            weights.push(half * w);
        }
    }
    (nodes, weights)
}

/// `∫_a^b f(t) dt` for real- or complex-valued `f`.
pub fn integrate<T, F>(f: F, a: f64, b: f64, panels: usize) -> T
where
    T: Zero + Mul<f64, Output = T>,
    F: Fn(f64) -> T,
{
    let (nodes, weights) = gauss_legendre(a, b, panels);
    nodes.iter().zip(&weights).fold(T::zero(), |acc, (&t, &w)| acc + f(t) * w)
}
