// Coordinate transformations between phase currents and the stationary frame

use crate::phase::PhaseTriple;

const ONE_DIV_SQRT3: f32 = 0.577350269; // 1 / sqrt(3)

/// Clarke transformation (abc → αβ)
///
/// Amplitude-invariant form. Only valid if `a + b + c = 0`, which holds for
/// offset-corrected phase currents.
///
/// # Arguments
/// * `currents` - Phase currents
///
/// # Returns
/// Tuple of (i_alpha, i_beta)
pub fn clarke(currents: PhaseTriple<f32>) -> (f32, f32) {
    let i_alpha = currents.a;
    let i_beta = ONE_DIV_SQRT3 * (currents.b - currents.c);
    (i_alpha, i_beta)
}
