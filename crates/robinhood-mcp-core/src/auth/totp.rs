//! Time-based one-time codes (RFC 6238, HMAC-SHA1, 30 second step, 6 digits).

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::config::ConfigError;

type HmacSha1 = Hmac<Sha1>;

/// Length of one code window in seconds
pub const TIME_STEP_SECS: u64 = 30;

/// Digits per code
const DIGITS: u32 = 6;

/// Windows of clock drift tolerated on either side when verifying
const DRIFT_STEPS: u64 = 1;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

#[derive(Clone)]
pub struct Totp {
    mac: HmacSha1,
}

impl Totp {
    /// Decode a base32 secret. Whitespace and `=` padding are ignored and
    /// lowercase letters are accepted.
    pub fn from_base32(secret: &str) -> Result<Self, ConfigError> {
        let key = decode_base32(secret).map_err(ConfigError::InvalidTotpSecret)?;
        let mac = HmacSha1::new_from_slice(&key)
            .map_err(|e| ConfigError::InvalidTotpSecret(e.to_string()))?;
        Ok(Self { mac })
    }

    /// Code for the window containing `unix_secs`.
    pub fn code_at(&self, unix_secs: u64) -> String {
        self.hotp(unix_secs / TIME_STEP_SECS)
    }

    /// Code for the current window.
    pub fn now(&self) -> String {
        self.code_at(unix_now())
    }

    /// Accepts codes from the current window and one window either side.
    pub fn verify_at(&self, code: &str, unix_secs: u64) -> bool {
        let counter = unix_secs / TIME_STEP_SECS;
        let first = counter.saturating_sub(DRIFT_STEPS);
        (first..=counter + DRIFT_STEPS).any(|c| self.hotp(c) == code)
    }

    fn hotp(&self, counter: u64) -> String {
        let mut mac = self.mac.clone();
        mac.update(&counter.to_be_bytes());
        let hash = mac.finalize().into_bytes();

        // Dynamic truncation
        let offset = (hash[hash.len() - 1] & 0x0f) as usize;
        let binary = u32::from_be_bytes([
            hash[offset] & 0x7f,
            hash[offset + 1],
            hash[offset + 2],
            hash[offset + 3],
        ]);
        format!("{:0width$}", binary % 10u32.pow(DIGITS), width = DIGITS as usize)
    }
}

impl fmt::Debug for Totp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Totp(<redacted>)")
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// RFC 4648 base32 without padding requirements. Error messages never
/// include the input.
fn decode_base32(input: &str) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;

    let cleaned = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>();
    let cleaned = cleaned.trim_end_matches('=');
    if cleaned.is_empty() {
        return Err("secret is empty".to_string());
    }

    for (position, c) in cleaned.chars().enumerate() {
        let upper = c.to_ascii_uppercase() as u8;
        let value = BASE32_ALPHABET
            .iter()
            .position(|&a| c.is_ascii() && a == upper)
            .ok_or_else(|| format!("invalid character at position {}", position + 1))?;
        buffer = (buffer << 5) | value as u32;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }

    // 1, 3 and 6 trailing characters cannot end an RFC 4648 encoding
    if matches!(cleaned.len() % 8, 1 | 3 | 6) {
        return Err(format!("invalid length of {} characters", cleaned.len()));
    }
    if buffer != 0 {
        return Err("non-zero trailing bits".to_string());
    }
    if out.is_empty() {
        return Err("secret decodes to no bytes".to_string());
    }
    Ok(out)
}
