//! Repeating-key digit cipher over the alphabet `[a-z ]`.
//!
//! Text is first encoded into base-10 digits through a frequency table, then
//! each digit is shifted by the matching key digit modulo 10.

use crate::{CryptoError, CryptoResult};
use once_cell::sync::Lazy;

/// A sequence of base-10 digits, one per byte.
pub type Digits = Vec<u8>;

// a t o n e s i r
const FREQUENT_CHARS: [u8; 8] = [b'a', b't', b'o', b'n', b'e', b's', b'i', b'r'];
// 100 would encode as "00" and collide with the space.
const RESERVED_CODES: [u16; 1] = [100];

struct CharTable {
    codes: Vec<(u8, u16)>,
}

impl CharTable {
    fn build() -> Self {
        let mut codes = vec![(b' ', 0u16)];
        let start = FREQUENT_CHARS.len() as u16 * 10 + 11;

        for c in b'a'..=b'z' {
            if let Some(rank) = FREQUENT_CHARS.iter().position(|&f| f == c) {
                codes.push((c, rank as u16 + 1));
                continue;
            }
            let frequent_before = FREQUENT_CHARS.iter().filter(|&&f| f < c).count() as u16;
            let mut code = start + u16::from(c - b'a') - frequent_before;
            code += RESERVED_CODES.iter().filter(|&&r| r <= code).count() as u16;
            codes.push((c, code));
        }

        Self { codes }
    }

    fn by_char(&self, c: u8) -> Option<u16> {
        self.codes.iter().find(|(ch, _)| *ch == c).map(|(_, code)| *code)
    }

    fn by_code(&self, code: u16) -> Option<u8> {
        self.codes.iter().find(|(_, co)| *co == code).map(|(ch, _)| *ch)
    }

    fn is_one_digit_code(&self, code: u16) -> bool {
        (1..=FREQUENT_CHARS.len() as u16).contains(&code)
    }
}

static CHAR_TABLE: Lazy<CharTable> = Lazy::new(CharTable::build);

/// Knobs for [`encrypt_encoded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherOptions {
    /// Require the message to be strictly longer than the key.
    pub strict_key: bool,
    /// Zero-pad the message up to a multiple of the key length.
    pub fit_to_key: bool,
}

impl Default for CipherOptions {
    fn default() -> Self {
        Self {
            strict_key: false,
            fit_to_key: true,
        }
    }
}

/// Reduces raw key bytes to digits (`byte % 10`).
pub fn normalize_key(bytes: &[u8]) -> Digits {
    bytes.iter().map(|b| b % 10).collect()
}

pub fn is_numeric_key(key: &[u8]) -> bool {
    key.iter().all(|d| *d <= 9)
}

fn check_key(key: &[u8]) -> CryptoResult<()> {
    if key.is_empty() {
        return Err(CryptoError::InvalidArgument("key is empty".into()));
    }
    if !is_numeric_key(key) {
        return Err(CryptoError::InvalidArgument(
            "key is not numeric array".into(),
        ));
    }
    Ok(())
}

fn check_strict(message_len: usize, key_len: usize, strict_key: bool) -> CryptoResult<()> {
    if strict_key && message_len <= key_len {
        return Err(CryptoError::MsgBad(format!(
            "strict key: message length {message_len} must exceed key length {key_len}"
        )));
    }
    Ok(())
}

/// Encodes `text` into digits. Frequent letters take one digit, everything
/// else (space included) takes two.
pub fn prepare_encode(text: &str) -> CryptoResult<Digits> {
    let mut encoded = Vec::with_capacity(text.len() * 2);
    for c in text.bytes() {
        let code = match c {
            b'a'..=b'z' | b' ' => CHAR_TABLE.by_char(c),
            _ => None,
        }
        .ok_or_else(|| CryptoError::MsgBad("Invalid message".into()))?;

        if CHAR_TABLE.is_one_digit_code(code) {
            encoded.push(code as u8);
        } else {
            encoded.push((code % 100 / 10) as u8);
            encoded.push((code % 10) as u8);
        }
    }
    Ok(encoded)
}

/// Inverse of [`prepare_encode`].
///
/// A lone trailing `0` is treated as key padding. With `trim_trailing_spaces`
/// the spaces produced by padding pairs are dropped as well.
pub fn finalize_decode(digits: &[u8], trim_trailing_spaces: bool) -> CryptoResult<String> {
    let mut decoded = String::with_capacity(digits.len());
    let mut i = 0;
    while i < digits.len() {
        let tens = u16::from(digits[i]);
        if tens > 9 {
            return Err(CryptoError::MsgBad(format!("not a digit: {tens}")));
        }
        if CHAR_TABLE.is_one_digit_code(tens) {
            decoded.push(char::from(CHAR_TABLE.by_code(tens).unwrap_or(b' ')));
            i += 1;
            continue;
        }

        let units = match digits.get(i + 1) {
            Some(&u) if u <= 9 => u16::from(u),
            Some(&u) => return Err(CryptoError::MsgBad(format!("not a digit: {u}"))),
            None if tens == 0 => break,
            None => return Err(CryptoError::MsgBad("truncated code".into())),
        };

        let mut code = tens * 10 + units;
        if code <= 10 && code != 0 {
            code += 100;
        }
        let c = CHAR_TABLE
            .by_code(code)
            .ok_or_else(|| CryptoError::MsgBad(format!("Invalid code: {code}")))?;
        decoded.push(char::from(c));
        i += 2;
    }

    if trim_trailing_spaces {
        let trimmed = decoded.trim_end_matches(' ').len();
        decoded.truncate(trimmed);
    }
    Ok(decoded)
}

pub fn encrypt_encoded(digits: &[u8], key: &[u8], options: CipherOptions) -> CryptoResult<Digits> {
    check_key(key)?;
    check_strict(digits.len(), key.len(), options.strict_key)?;
    if !is_numeric_key(digits) {
        return Err(CryptoError::MsgBad("message is not a digit sequence".into()));
    }

    let mut buffer = digits.to_vec();
    if options.fit_to_key {
        let remainder = buffer.len() % key.len();
        if remainder != 0 {
            buffer.resize(buffer.len() + key.len() - remainder, 0);
        }
    }

    for (i, d) in buffer.iter_mut().enumerate() {
        *d = (*d + key[i % key.len()]) % 10;
    }
    Ok(buffer)
}

pub fn decrypt_encoded(digits: &[u8], key: &[u8], strict_key: bool) -> CryptoResult<Digits> {
    check_key(key)?;
    check_strict(digits.len(), key.len(), strict_key)?;
    if !is_numeric_key(digits) {
        return Err(CryptoError::MsgBad("message is not a digit sequence".into()));
    }

    Ok(digits
        .iter()
        .enumerate()
        .map(|(i, d)| (d + 10 - key[i % key.len()]) % 10)
        .collect())
}

pub fn encrypt(text: &str, key: &[u8], options: CipherOptions) -> CryptoResult<Digits> {
    encrypt_encoded(&prepare_encode(text)?, key, options)
}

/// Decrypts and decodes, dropping the trailing spaces left by key padding.
pub fn decrypt(digits: &[u8], key: &[u8], strict_key: bool) -> CryptoResult<String> {
    finalize_decode(&decrypt_encoded(digits, key, strict_key)?, true)
}
