//! Three-phase value container.

/// One value per motor phase (A, B, C).
///
/// Used for raw ADC codes, phase currents and DC-offset estimates. For a
/// correctly wired motor the three currents sum to zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhaseTriple<T> {
    pub a: T,
    pub b: T,
    pub c: T,
}

impl<T> PhaseTriple<T> {
    pub const fn new(a: T, b: T, c: T) -> Self {
        Self { a, b, c }
    }

    /// Apply `f` to each phase.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> PhaseTriple<U> {
        PhaseTriple {
            a: f(self.a),
            b: f(self.b),
            c: f(self.c),
        }
    }

    /// Combine two triples phase by phase.
    pub fn zip_with<U, V>(self, other: PhaseTriple<U>, mut f: impl FnMut(T, U) -> V) -> PhaseTriple<V> {
        PhaseTriple {
            a: f(self.a, other.a),
            b: f(self.b, other.b),
            c: f(self.c, other.c),
        }
    }

    pub fn into_array(self) -> [T; 3] {
        [self.a, self.b, self.c]
    }
}

impl<T: Copy> PhaseTriple<T> {
    pub const fn splat(value: T) -> Self {
        Self {
            a: value,
            b: value,
            c: value,
        }
    }
}

impl<T> From<[T; 3]> for PhaseTriple<T> {
    fn from([a, b, c]: [T; 3]) -> Self {
        Self { a, b, c }
    }
}

impl PhaseTriple<f32> {
    /// 全相が未測定（NaN）
    pub const NAN: Self = Self::splat(f32::NAN);

    pub const ZERO: Self = Self::splat(0.0);

    /// Sum of the three phases (the leakage for currents).
    pub fn sum(&self) -> f32 {
        self.a + self.b + self.c
    }

    /// 全相が有効な数値か
    pub fn is_valid(&self) -> bool {
        !self.a.is_nan() && !self.b.is_nan() && !self.c.is_nan()
    }

    /// Sum of squares of the three phases.
    pub fn sum_of_squares(&self) -> f32 {
        self.a * self.a + self.b * self.b + self.c * self.c
    }
}
