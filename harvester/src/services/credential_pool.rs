use crate::error::ApiError;
use log::info;
use std::sync::Mutex;

/// The API keys that still have quota left.
///
/// Keys only ever leave the pool: once revoked, a key is never handed out
/// again for the lifetime of the process.
pub struct CredentialPool {
    keys: Mutex<Vec<String>>,
}

impl CredentialPool {
    pub fn new<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for key in keys {
            let key = key.trim().to_string();
            if !key.is_empty() && !unique.contains(&key) {
                unique.push(key);
            }
        }
        info!("Credential pool created with {} keys", unique.len());
        CredentialPool {
            keys: Mutex::new(unique),
        }
    }

    /// Any key that is still usable. Callers must not rely on which one.
    pub fn acquire(&self) -> Result<String, ApiError> {
        match self.keys.lock() {
            Ok(keys) => keys.first().cloned().ok_or(ApiError::PoolExhausted),
            Err(_) => Err(ApiError::PoolExhausted),
        }
    }

    /// Removes `key`. Returns false if it was already gone.
    pub fn revoke(&self, key: &str) -> bool {
        if let Ok(mut keys) = self.keys.lock() {
            if let Some(pos) = keys.iter().position(|k| k == key) {
                keys.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn available(&self) -> usize {
        if let Ok(keys) = self.keys.lock() {
            keys.len()
        } else {
            0
        }
    }
}
