use num_bigint_dig::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};

/// Square-and-multiply modular exponentiation.
///
/// `base == 0` or a modulus of 0 or 1 yields 0; a zero exponent yields 1.
/// Every intermediate product is reduced by `modulus`.
pub fn mod_pow(base: &BigUint, exponent: &BigUint, modulus: &BigUint) -> BigUint {
    if base.is_zero() || modulus.is_zero() || modulus.is_one() {
        return BigUint::zero();
    }
    if exponent.is_zero() {
        return BigUint::one();
    }

    let mut result = BigUint::one();
    let mut b = base % modulus;
    let mut e = exponent.clone();
    while !e.is_zero() {
        if e.is_odd() {
            result = (&result * &b) % modulus;
        }
        e >>= 1usize;
        b = (&b * &b) % modulus;
    }
    result
}

/// Signed entry point used where exponents arrive from untrusted text.
pub fn mod_pow_signed(
    base: &BigUint,
    exponent: &num_bigint_dig::BigInt,
    modulus: &BigUint,
) -> crate::CryptoResult<BigUint> {
    let exponent = exponent.to_biguint().ok_or_else(|| {
        crate::CryptoError::InvalidArgument(format!("negative exponent: {exponent}"))
    })?;
    Ok(mod_pow(base, &exponent, modulus))
}

/// Reverses `bytes` on big-endian hosts so that native-order integer exports
/// serialize identically everywhere.
pub fn ensure_little_endian_byte_order(mut bytes: Vec<u8>) -> Vec<u8> {
    if cfg!(target_endian = "big") {
        bytes.reverse();
    }
    bytes
}
