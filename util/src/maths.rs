//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where 
    T: Float 
{
    target_range.0 
        + ((value - source_range.0) 
        * (target_range.1 - target_range.0) 
        / (source_range.1 - source_range.0))
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
/// 
/// This function is taken from the std library as num is missing it.
///
/// In particular, the return value `r` satisfies `0.0 <= r < rhs.abs()` in
/// most cases. However, due to a floating point round-off error it can
/// result in `r == rhs.abs()` if `lhs` is much smaller than `rhs.abs()` in
/// magnitude and `lhs < 0.0`.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float
{
    let r = lhs % rhs;
    if r < T::zero() { r + rhs.abs() } else { r }
}

/// Fold an angle in degrees into the range [0, 180).
///
/// A line has no forward or backward, so any direction and its opposite map to the same value.
pub fn fold_half_turn_deg<T>(angle_deg: T) -> T
where
    T: Float
{
    let full = T::from(360.0).unwrap();
    let half = T::from(180.0).unwrap();

    let angle = if angle_deg < T::zero() {
        full + angle_deg
    }
    else {
        angle_deg
    };

    // Negative inputs beyond a full turn still need folding, as does the round-off case where the
    // remainder lands exactly on 180.
    let folded = rem_euclid(angle, half);
    if folded >= half { T::zero() } else { folded }
}

/// Wrap an angle in degrees into the range [0, 360).
pub fn wrap_deg_360<T>(angle_deg: T) -> T
where
    T: Float
{
    let full = T::from(360.0).unwrap();
    let wrapped = rem_euclid(angle_deg, full);
    if wrapped >= full { T::zero() } else { wrapped }
}
