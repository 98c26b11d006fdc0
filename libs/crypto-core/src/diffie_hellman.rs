//! Finite-field Diffie–Hellman with the one-shot session semantics the key
//! endpoints rely on.

use crate::digit_cipher::{normalize_key, Digits};
use crate::modular::{ensure_little_endian_byte_order, mod_pow};
use crate::{CryptoError, CryptoResult};
use num_bigint_dig::{BigUint, RandPrime};
use num_traits::Zero;
use rand::rngs::OsRng;
use rand::Rng;
use std::fmt;
use tracing::debug;

/// Generators handed out with a modulus, picked uniformly.
pub const GENERATOR_CANDIDATES: [u32; 8] = [2, 3, 5, 7, 11, 13, 17, 19];

/// Size of the private exponent draw.
pub const DEFAULT_EXPONENT_BITS: usize = 332;

const MIN_PRIME_BITS: usize = 16;

/// Public group parameters `(p, g)` offered to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhParameters {
    pub p: BigUint,
    pub g: BigUint,
}

impl DhParameters {
    pub fn generate(prime_bits: usize) -> CryptoResult<Self> {
        Self::generate_with_rng(&mut OsRng, prime_bits)
    }

    /// The modulus is a probable prime (Miller–Rabin plus Lucas) with exactly
    /// `prime_bits` bits.
    pub fn generate_with_rng<R: Rng>(rng: &mut R, prime_bits: usize) -> CryptoResult<Self> {
        if prime_bits < MIN_PRIME_BITS {
            return Err(CryptoError::InvalidArgument(format!(
                "prime size {prime_bits} is below {MIN_PRIME_BITS} bits"
            )));
        }
        let g = GENERATOR_CANDIDATES[rng.gen_range(0..GENERATOR_CANDIDATES.len())];
        let p = rng.gen_prime(prime_bits);
        debug!(prime_bits, generator = g, "generated diffie-hellman parameters");
        Ok(Self {
            p,
            g: BigUint::from(g),
        })
    }

    /// Runs prime generation on the blocking pool.
    pub async fn generate_async(prime_bits: usize) -> CryptoResult<Self> {
        tokio::task::spawn_blocking(move || Self::generate(prime_bits))
            .await
            .map_err(|e| CryptoError::Server(format!("parameter generation task failed: {e}")))?
    }
}

#[derive(Clone)]
enum Slot<T> {
    Unset,
    Set(T),
}

impl<T> Slot<T> {
    fn get(&self) -> Option<&T> {
        match self {
            Slot::Unset => None,
            Slot::Set(value) => Some(value),
        }
    }

    fn is_set(&self) -> bool {
        matches!(self, Slot::Set(_))
    }
}

/// Server side of one handshake.
///
/// The private exponent may be redrawn until the shared secret is derived;
/// after that the session is spent and a new one must replace it.
#[derive(Clone)]
pub struct DiffieHellmanSession {
    p: BigUint,
    g: BigUint,
    exponent_bits: usize,
    a: Slot<BigUint>,
    big_a: Option<BigUint>,
    big_b: Option<BigUint>,
    k: Slot<BigUint>,
}

impl DiffieHellmanSession {
    pub fn new(p: BigUint, g: BigUint) -> CryptoResult<Self> {
        if p.is_zero() {
            return Err(CryptoError::InvalidArgument(format!("p: {p} is invalid")));
        }
        if g.is_zero() {
            return Err(CryptoError::InvalidArgument(format!("g: {g} is invalid")));
        }
        Ok(Self {
            p,
            g,
            exponent_bits: DEFAULT_EXPONENT_BITS,
            a: Slot::Unset,
            big_a: None,
            big_b: None,
            k: Slot::Unset,
        })
    }

    pub fn from_parameters(params: &DhParameters) -> CryptoResult<Self> {
        Self::new(params.p.clone(), params.g.clone())
    }

    pub fn with_exponent_bits(mut self, bits: usize) -> CryptoResult<Self> {
        if bits == 0 {
            return Err(CryptoError::InvalidArgument(
                "exponent size must be positive".into(),
            ));
        }
        self.exponent_bits = bits;
        Ok(self)
    }

    pub fn p(&self) -> &BigUint {
        &self.p
    }

    pub fn g(&self) -> &BigUint {
        &self.g
    }

    pub fn has_private_exponent(&self) -> bool {
        self.a.is_set()
    }

    pub fn has_shared_secret(&self) -> bool {
        self.k.is_set()
    }

    pub fn peer_public_value(&self) -> Option<&BigUint> {
        self.big_b.as_ref()
    }

    /// Draws `a` from the OS entropy source on the blocking pool.
    pub async fn generate_private_exponent(&mut self) -> CryptoResult<()> {
        self.ensure_not_spent()?;
        let bits = self.exponent_bits;
        let a = tokio::task::spawn_blocking(move || draw_exponent(&mut OsRng, bits))
            .await
            .map_err(|e| CryptoError::Server(format!("entropy task failed: {e}")))?;
        self.install_exponent(a);
        Ok(())
    }

    pub fn generate_private_exponent_with<R: Rng>(
        &mut self,
        rng: &mut R,
    ) -> CryptoResult<()> {
        self.ensure_not_spent()?;
        let a = draw_exponent(rng, self.exponent_bits);
        self.install_exponent(a);
        Ok(())
    }

    /// `A = g^a mod p`, memoized until `a` changes.
    pub fn public_value(&mut self) -> CryptoResult<BigUint> {
        if let Some(big_a) = &self.big_a {
            return Ok(big_a.clone());
        }
        let a = self
            .a
            .get()
            .ok_or_else(|| CryptoError::InvalidArgument("a is not defined".into()))?;
        let big_a = mod_pow(&self.g, a, &self.p);
        self.big_a = Some(big_a.clone());
        Ok(big_a)
    }

    /// `K = B^a mod p`. One-shot per session. `B` must lie in `[2, p - 2]`;
    /// anything else pins `K` to a trivial value.
    pub fn compute_shared_secret(&mut self, big_b: BigUint) -> CryptoResult<BigUint> {
        self.ensure_not_spent()?;
        let two = BigUint::from(2u32);
        if big_b < two || &big_b + &two > self.p {
            return Err(CryptoError::KeyBad(
                "peer public value is outside [2, p - 2]".into(),
            ));
        }
        let a = self
            .a
            .get()
            .ok_or_else(|| CryptoError::InvalidArgument("a is not defined".into()))?;
        let k = mod_pow(&big_b, a, &self.p);
        self.big_b = Some(big_b);
        self.k = Slot::Set(k.clone());
        Ok(k)
    }

    pub fn shared_secret(&self) -> CryptoResult<&BigUint> {
        self.k
            .get()
            .ok_or_else(|| CryptoError::InvalidArgument("k is not initialized".into()))
    }

    /// The shared secret reduced to a digit key: each big-endian byte mod 10.
    pub fn shared_secret_key(&self) -> CryptoResult<Digits> {
        Ok(normalize_key(&self.shared_secret()?.to_bytes_be()))
    }

    fn ensure_not_spent(&self) -> CryptoResult<()> {
        if self.k.is_set() {
            return Err(CryptoError::InvalidArgument("K is ready".into()));
        }
        Ok(())
    }

    fn install_exponent(&mut self, a: BigUint) {
        self.a = Slot::Set(a);
        self.big_a = None;
    }
}

impl fmt::Debug for DiffieHellmanSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffieHellmanSession")
            .field("p_bits", &self.p.bits())
            .field("g", &self.g)
            .field("has_a", &self.a.is_set())
            .field("has_k", &self.k.is_set())
            .finish()
    }
}

fn draw_exponent<R: Rng>(rng: &mut R, bits: usize) -> BigUint {
    let words = (bits + 63) / 64;
    let excess = words * 64 - bits;
    loop {
        let mut bytes = Vec::with_capacity(words * 8);
        for _ in 0..words {
            bytes.extend(ensure_little_endian_byte_order(
                rng.next_u64().to_ne_bytes().to_vec(),
            ));
        }
        let a = BigUint::from_bytes_le(&bytes) >> excess;
        if !a.is_zero() {
            return a;
        }
    }
}
