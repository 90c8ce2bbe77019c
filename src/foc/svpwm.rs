// Space Vector Modulation (SVM)

use crate::phase::PhaseTriple;

const ONE_DIV_SQRT3: f32 = 0.577350269; // 1 / sqrt(3)
const TWO_DIV_SQRT3: f32 = 1.154700538; // 2 / sqrt(3)

/// Calculate three-phase timings from a modulation vector
///
/// Timings are fractions of the PWM period where 0 drives the phase to DC+
/// and 1 drives it to DC-. The zero vector is split equally between both
/// ends, so a zero modulation vector yields 50% on every phase.
///
/// # Arguments
/// * `mod_alpha` - Alpha-axis modulation (voltage / (2/3 × v_bus))
/// * `mod_beta` - Beta-axis modulation
///
/// # Returns
/// Phase timings, or `None` if the vector lies outside the SVM hexagon
pub fn svm(mod_alpha: f32, mod_beta: f32) -> Option<PhaseTriple<f32>> {
    let sextant = if mod_beta >= 0.0 {
        if mod_alpha >= 0.0 {
            if ONE_DIV_SQRT3 * mod_beta > mod_alpha { 2 } else { 1 }
        } else if -ONE_DIV_SQRT3 * mod_beta > mod_alpha {
            3
        } else {
            2
        }
    } else if mod_alpha >= 0.0 {
        if -ONE_DIV_SQRT3 * mod_beta > mod_alpha { 5 } else { 6 }
    } else if ONE_DIV_SQRT3 * mod_beta > mod_alpha {
        4
    } else {
        5
    };

    let (ta, tb, tc) = match sextant {
        // v1-v2
        1 => {
            let t1 = mod_alpha - ONE_DIV_SQRT3 * mod_beta;
            let t2 = TWO_DIV_SQRT3 * mod_beta;
            let ta = (1.0 - t1 - t2) * 0.5;
            let tb = ta + t1;
            (ta, tb, tb + t2)
        }
        // v2-v3
        2 => {
            let t2 = mod_alpha + ONE_DIV_SQRT3 * mod_beta;
            let t3 = -mod_alpha + ONE_DIV_SQRT3 * mod_beta;
            let tb = (1.0 - t2 - t3) * 0.5;
            let ta = tb + t3;
            (ta, tb, ta + t2)
        }
        // v3-v4
        3 => {
            let t3 = TWO_DIV_SQRT3 * mod_beta;
            let t4 = -mod_alpha - ONE_DIV_SQRT3 * mod_beta;
            let tb = (1.0 - t3 - t4) * 0.5;
            let tc = tb + t3;
            (tc + t4, tb, tc)
        }
        // v4-v5
        4 => {
            let t4 = -mod_alpha + ONE_DIV_SQRT3 * mod_beta;
            let t5 = -TWO_DIV_SQRT3 * mod_beta;
            let tc = (1.0 - t4 - t5) * 0.5;
            let tb = tc + t5;
            (tb + t4, tb, tc)
        }
        // v5-v6
        5 => {
            let t5 = -mod_alpha - ONE_DIV_SQRT3 * mod_beta;
            let t6 = mod_alpha - ONE_DIV_SQRT3 * mod_beta;
            let tc = (1.0 - t5 - t6) * 0.5;
            let ta = tc + t5;
            (ta, ta + t6, tc)
        }
        // v6-v1
        _ => {
            let t6 = -TWO_DIV_SQRT3 * mod_beta;
            let t1 = mod_alpha + ONE_DIV_SQRT3 * mod_beta;
            let tc = (1.0 - t6 - t1) * 0.5;
            let ta = tc + t1;
            (ta, ta + t6, tc)
        }
    };

    let timings = PhaseTriple::new(ta, tb, tc);
    let in_range = |t: f32| (0.0..=1.0).contains(&t);
    if in_range(ta) && in_range(tb) && in_range(tc) {
        Some(timings)
    } else {
        None
    }
}
