//! WebSocket admission tickets
//!
//! A ticket is `timestamp.nonce.signature` where the signature is an
//! HMAC-SHA256 over `"{timestamp}.{nonce}"` under a shared secret,
//! URL-safe base64 without padding. Tickets are time-boxed and single
//! use: a short-lived replay cache keyed by (timestamp, nonce) holds
//! entries for twice the acceptance window.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::TicketError;

type HmacSha256 = Hmac<Sha256>;

/// Verifies (and, for tests and tooling, mints) admission tickets.
pub struct TicketVerifier {
    secret: Vec<u8>,
    ttl: Duration,
    skew: Duration,
    /// Replay cache: (timestamp_ms, nonce) -> timestamp_ms, pruned lazily.
    seen: Mutex<HashMap<(u64, String), u64>>,
}

impl TicketVerifier {
    pub fn new(secret: &[u8], ttl: Duration, skew: Duration) -> Self {
        Self {
            secret: secret.to_vec(),
            ttl,
            skew,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Verify a ticket against the current wall clock.
    pub fn verify(&self, ticket: &str) -> Result<(), TicketError> {
        self.verify_at(ticket, now_ms())
    }

    /// Verify a ticket as of `now_ms`. Checks, in order: shape, expiry,
    /// signature (constant-time), replay. The replay check-and-insert is
    /// atomic under the cache lock.
    pub fn verify_at(&self, ticket: &str, now_ms: u64) -> Result<(), TicketError> {
        let mut parts = ticket.split('.');
        let (ts_part, nonce, sig) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(ts), Some(nonce), Some(sig), None) => (ts, nonce, sig),
            _ => return Err(TicketError::Malformed),
        };

        let timestamp: u64 = ts_part.parse().map_err(|_| TicketError::Malformed)?;
        if timestamp == 0 || nonce.len() < 8 || sig.len() < 16 {
            return Err(TicketError::Malformed);
        }

        let window = (self.ttl + self.skew).as_millis() as u64;
        if now_ms.abs_diff(timestamp) > window {
            return Err(TicketError::Expired);
        }

        let sig_bytes = general_purpose::URL_SAFE_NO_PAD
            .decode(sig)
            .map_err(|_| TicketError::Malformed)?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| TicketError::InvalidSignature)?;
        mac.update(format!("{}.{}", ts_part, nonce).as_bytes());
        mac.verify_slice(&sig_bytes)
            .map_err(|_| TicketError::InvalidSignature)?;

        let mut seen = self.seen.lock().unwrap();
        let retention = window.saturating_mul(2);
        seen.retain(|_, ts| now_ms.saturating_sub(*ts) <= retention);
        if seen
            .insert((timestamp, nonce.to_string()), timestamp)
            .is_some()
        {
            return Err(TicketError::Replayed);
        }

        Ok(())
    }

    /// Mint a fresh ticket for the current wall clock.
    pub fn mint(&self) -> String {
        self.mint_at(now_ms())
    }

    /// Mint a ticket with an explicit timestamp.
    pub fn mint_at(&self, timestamp_ms: u64) -> String {
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = general_purpose::URL_SAFE_NO_PAD.encode(nonce_bytes);

        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC key");
        mac.update(format!("{}.{}", timestamp_ms, nonce).as_bytes());
        let sig = general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{}.{}.{}", timestamp_ms, nonce, sig)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
