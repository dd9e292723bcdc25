//! Shared application state passed to axum handlers.

use crate::error::ApiError;
use std::sync::Arc;
use tally_consensus::AuthorizedKeys;
use tally_core::Keypair;
use tally_ledger::{DataDir, Ledger, LedgerConfig};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub data: Arc<DataDir>,
    pub config: Arc<LedgerConfig>,
    /// Identity whose public key `/api/get_pubkey` serves; the first local
    /// identity when unset.
    pub identity: Option<String>,
}

impl AppState {
    pub fn new(
        data: DataDir,
        config: LedgerConfig,
        ledger: Ledger,
        identity: Option<String>,
    ) -> Self {
        Self {
            ledger: Arc::new(ledger),
            data: Arc::new(data),
            config: Arc::new(config),
            identity,
        }
    }

    pub fn required_signatures(&self) -> usize {
        self.config.required_signatures
    }

    /// Snapshot of the authorized registry, re-read on every call so key
    /// changes on disk apply without a restart.
    pub fn authorized(&self) -> Result<AuthorizedKeys, ApiError> {
        Ok(self.data.authorized_keys()?)
    }

    /// Every local signing identity; server-side updates are signed by all
    /// of them.
    pub fn identities(&self) -> Result<Vec<Keypair>, ApiError> {
        let identities: Vec<Keypair> = self
            .data
            .key_store()
            .load_identities()
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .into_iter()
            .map(|(_, keypair)| keypair)
            .collect();
        if identities.is_empty() {
            return Err(ApiError::NotFound("no local signing identity".into()));
        }
        Ok(identities)
    }

    /// PEM public key of the serving identity.
    pub fn public_key_pem(&self) -> Result<String, ApiError> {
        let keys = self.data.key_store();
        let name = match &self.identity {
            Some(name) => name.clone(),
            None => keys
                .list_identities()
                .map_err(|e| ApiError::Internal(e.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| ApiError::NotFound("no local signing identity".into()))?,
        };
        let keypair = keys
            .load_identity(&name)
            .map_err(|e| ApiError::NotFound(format!("identity {name}: {e}")))?;
        keypair
            .public_key_pem()
            .map_err(|e| ApiError::Internal(e.to_string()))
    }
}
