use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{SessionConfig, SessionCookies};
use crate::error::SessionError;
use crate::facade::{AuthProvider, AuthSession};
use crate::identity::{Identity, SessionSlot};

/// Data stored in the server-side session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub slot: SessionSlot,
    pub identity: Identity,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix timestamp when the access token expires.
    pub expires_at: i64,
}

impl SessionRecord {
    pub fn new(slot: SessionSlot, identity: Identity, tokens: &AuthSession) -> Self {
        Self {
            slot,
            identity,
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_at: chrono::Utc::now().timestamp() + tokens.expires_in,
        }
    }
}

/// Server-side sessions, one cookie per session slot. Each cookie holds only
/// an encrypted session ID; the record lives in memory.
pub struct SessionManager {
    cipher: Aes256Gcm,
    store: Arc<RwLock<HashMap<String, SessionRecord>>>,
    cookies: SessionCookies,
    cookie_domain: String,
    max_age_seconds: u64,
    secure: bool,
}

impl SessionManager {
    pub fn new(config: &SessionConfig) -> Self {
        // Derive a 256-bit key from the secret using SHA-256
        let mut hasher = Sha256::new();
        hasher.update(config.secret.as_bytes());
        let key_bytes = hasher.finalize();
        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .expect("AES-256-GCM key must be 32 bytes");

        Self {
            cipher,
            store: Arc::new(RwLock::new(HashMap::new())),
            cookies: config.cookies.clone(),
            cookie_domain: config.cookie_domain.clone(),
            max_age_seconds: config.max_age_seconds,
            secure: config.secure,
        }
    }

    pub fn cookie_name(&self, slot: SessionSlot) -> &str {
        self.cookies.name(slot)
    }

    /// Extract and decrypt the session ID for `slot` from request cookies.
    /// Anything missing or malformed reads as no session.
    pub fn extract_session_id(&self, headers: &HeaderMap, slot: SessionSlot) -> Option<String> {
        let encoded = cookie_value(headers, self.cookie_name(slot))?;

        let payload = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        if payload.len() < 12 {
            return None;
        }

        let (nonce_bytes, ciphertext) = payload.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self.cipher.decrypt(nonce, ciphertext).ok()?;
        String::from_utf8(plaintext).ok()
    }

    /// Look up session data by session ID. Records stored under another slot
    /// are not returned.
    pub async fn get_session(&self, session_id: &str, slot: SessionSlot) -> Option<SessionRecord> {
        self.store
            .read()
            .await
            .get(session_id)
            .filter(|record| record.slot == slot)
            .cloned()
    }

    /// Store a new session and return its Set-Cookie header value.
    pub async fn create_session(&self, record: SessionRecord) -> Result<String, SessionError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let slot = record.slot;
        tracing::debug!(
            "Created {:?} session {} for user {}",
            slot,
            session_id,
            record.identity.id
        );
        self.store.write().await.insert(session_id.clone(), record);
        self.encrypt_cookie(slot, &session_id)
    }

    pub async fn update_session(&self, session_id: &str, record: SessionRecord) {
        self.store.write().await.insert(session_id.to_string(), record);
    }

    pub async fn destroy_session(&self, session_id: &str) {
        self.store.write().await.remove(session_id);
    }

    /// Resolve the current session for `slot`, refreshing an expired access
    /// token when a refresh token is available. Expired sessions that cannot
    /// be refreshed are destroyed.
    pub async fn load(
        &self,
        headers: &HeaderMap,
        slot: SessionSlot,
        provider: &dyn AuthProvider,
    ) -> Result<Option<SessionRecord>, SessionError> {
        let Some(session_id) = self.extract_session_id(headers, slot) else {
            return Ok(None);
        };
        let Some(mut record) = self.get_session(&session_id, slot).await else {
            return Ok(None);
        };

        if !Self::is_token_expired(&record) {
            return Ok(Some(record));
        }

        let Some(refresh_token) = record.refresh_token.clone() else {
            self.destroy_session(&session_id).await;
            return Ok(None);
        };

        match provider.refresh(&refresh_token).await {
            Ok(tokens) => {
                tracing::debug!("Token refreshed for user {}", record.identity.id);
                record.access_token = tokens.access_token;
                if let Some(new_refresh) = tokens.refresh_token {
                    record.refresh_token = Some(new_refresh);
                }
                record.expires_at = chrono::Utc::now().timestamp() + tokens.expires_in;
                self.update_session(&session_id, record.clone()).await;
                Ok(Some(record))
            }
            Err(e) => {
                self.destroy_session(&session_id).await;
                Err(SessionError::Refresh(e))
            }
        }
    }

    /// Return a Set-Cookie header value that clears the session cookie for `slot`.
    pub fn clear_cookie(&self, slot: SessionSlot) -> String {
        let mut cookie = format!(
            "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0",
            self.cookie_name(slot)
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        if !self.cookie_domain.is_empty() {
            cookie.push_str(&format!("; Domain={}", self.cookie_domain));
        }
        cookie
    }

    /// Check if the access token in the session is expired (or about to expire).
    pub fn is_token_expired(record: &SessionRecord) -> bool {
        let now = chrono::Utc::now().timestamp();
        // Consider expired if within 60 seconds of expiry
        record.expires_at <= now + 60
    }

    /// Start a background task to periodically clean up expired sessions.
    /// Sessions holding a refresh token are kept for one extra cookie lifetime.
    pub fn start_cleanup_task(&self, interval_secs: u64) {
        let store = Arc::clone(&self.store);
        let grace = self.max_age_seconds as i64;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval_secs)).await;
                let removed = purge_expired(&store, chrono::Utc::now().timestamp(), grace).await;
                if removed > 0 {
                    tracing::debug!("Session cleanup: removed {} expired sessions", removed);
                }
            }
        });
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn encrypt_cookie(&self, slot: SessionSlot, session_id: &str) -> Result<String, SessionError> {
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, session_id.as_bytes())
            .map_err(|e| SessionError::Encrypt(e.to_string()))?;

        let mut payload = Vec::with_capacity(12 + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        let encoded = URL_SAFE_NO_PAD.encode(&payload);

        let mut cookie = format!(
            "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
            self.cookie_name(slot),
            encoded,
            self.max_age_seconds
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        if !self.cookie_domain.is_empty() {
            cookie.push_str(&format!("; Domain={}", self.cookie_domain));
        }

        Ok(cookie)
    }
}

async fn purge_expired(
    store: &RwLock<HashMap<String, SessionRecord>>,
    now: i64,
    grace: i64,
) -> usize {
    let mut sessions = store.write().await;
    let before = sessions.len();
    sessions.retain(|_, s| {
        let deadline = if s.refresh_token.is_some() {
            s.expires_at + grace
        } else {
            s.expires_at
        };
        deadline > now
    });
    before - sessions.len()
}

/// Value of the named cookie, if present.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|header| header.split(';'))
        .map(|pair| pair.trim())
        .find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name).then_some(value)
        })
}
