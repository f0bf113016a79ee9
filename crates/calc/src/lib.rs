//! Integer arithmetic built from bitwise addition.
//!
//! Every operation wraps on overflow instead of panicking.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

/// Errors returned by [`div`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CalcError {
    /// The divisor is zero.
    #[error("division by zero")]
    DivisionByZero,
    /// The divisor is negative while the dividend is not smaller than it.
    #[error("negative divisor {0} is not supported")]
    NegativeDivisor(i64),
}

/// Adds two integers with a carry loop.
#[must_use]
pub const fn sum(first: i64, second: i64) -> i64 {
    let mut a = first;
    let mut b = second;
    while b != 0 {
        let carry = a & b;
        a ^= b;
        b = carry << 1;
    }
    a
}

/// Subtracts `second` from `first`.
#[must_use]
pub const fn sub(first: i64, second: i64) -> i64 {
    sum(first, second.wrapping_neg())
}

/// Multiplies by repeated addition. A non-positive `second` yields 0.
#[must_use]
pub const fn mul(first: i64, second: i64) -> i64 {
    let mut product = 0;
    let mut i = 0;
    while i < second {
        product = sum(product, first);
        i += 1;
    }
    product
}

/// Counts how many times `second` is subtracted from `first` before the
/// remainder drops to zero or below, which rounds positive quotients up.
///
/// Returns 0 whenever `second > first`.
///
/// # Errors
///
/// Returns [`CalcError::DivisionByZero`] for a zero divisor and
/// [`CalcError::NegativeDivisor`] when a negative divisor would never
/// exhaust the remainder.
pub const fn div(first: i64, second: i64) -> Result<i64, CalcError> {
    if second == 0 {
        return Err(CalcError::DivisionByZero);
    }
    if second > first {
        return Ok(0);
    }
    if second < 0 && first > 0 {
        return Err(CalcError::NegativeDivisor(second));
    }
    let mut quotient = 0;
    let mut rest = first;
    while rest > 0 {
        quotient += 1;
        rest -= second;
    }
    Ok(quotient)
}

/// Raises `base` to `exponent`. A negative exponent yields 0.
#[must_use]
pub const fn pow(base: i64, exponent: i64) -> i64 {
    if exponent < 0 {
        return 0;
    }
    let mut result: i64 = 1;
    let mut i = 0;
    while i < exponent {
        result = result.wrapping_mul(base);
        i += 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_adds_with_carry() {
        for (a, b, expected) in [(0, 10, 10), (10, 0, 10), (2, 5, 7), (1, 10, 11), (-4, 3, -1)] {
            assert_eq!(sum(a, b), expected, "{a} + {b}");
        }
    }

    #[test]
    fn sum_wraps_on_overflow() {
        assert_eq!(sum(i64::MAX, 1), i64::MIN);
    }

    #[test]
    fn sub_subtracts() {
        assert_eq!(sub(10, 0), 10);
        assert_eq!(sub(0, 10), -10);
        assert_eq!(sub(7, 5), 2);
    }

    #[test]
    fn mul_repeats_addition() {
        assert_eq!(mul(3, 4), 12);
        assert_eq!(mul(-3, 4), -12);
        assert_eq!(mul(7, 1), 7);
    }

    #[test]
    fn mul_with_non_positive_multiplier_is_zero() {
        assert_eq!(mul(3, 0), 0);
        assert_eq!(mul(3, -2), 0);
    }

    #[test]
    fn div_by_zero_fails() {
        assert_eq!(div(10, 0), Err(CalcError::DivisionByZero));
    }

    #[test]
    fn div_counts_subtractions() {
        assert_eq!(div(10, 2), Ok(5));
        assert_eq!(div(10, 10), Ok(1));
        assert_eq!(div(7, 2), Ok(4));
        assert_eq!(div(0, -1), Ok(0));
    }

    #[test]
    fn div_with_larger_divisor_is_zero() {
        assert_eq!(div(2, 10), Ok(0));
        assert_eq!(div(-5, -1), Ok(0));
    }

    #[test]
    fn div_with_negative_divisor_fails() {
        assert_eq!(div(10, -2), Err(CalcError::NegativeDivisor(-2)));
    }

    #[test]
    fn pow_raises() {
        assert_eq!(pow(2, 0), 1);
        assert_eq!(pow(2, 1), 2);
        assert_eq!(pow(2, 10), 1024);
        assert_eq!(pow(-3, 3), -27);
    }

    #[test]
    fn pow_with_negative_exponent_is_zero() {
        assert_eq!(pow(2, -1), 0);
    }
}
