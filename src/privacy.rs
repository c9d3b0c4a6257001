//! Pseudonymous agent handles and result sealing.

use blake3::Hasher;
use rand::RngCore;
use serde_json::Value;

use crate::capabilities::PseudonymResolver;
use crate::result::MatchingResult;

const HANDLE_PREFIX: &str = "agent_";
const HANDLE_HEX_LEN: usize = 32;

/// Derives `agent_<32 hex>` handles from a keyed BLAKE3 hash of the entity id.
/// Handles are stable for a given key and unlinkable without it.
#[derive(Clone)]
pub struct Blake3PseudonymResolver {
    key: [u8; 32],
}

impl Blake3PseudonymResolver {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Stretches an operator secret into a resolver key.
    pub fn from_secret(secret: impl AsRef<[u8]>) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(b"entangled-matching/agent-handle");
        hasher.update(secret.as_ref());
        let mut key = [0u8; 32];
        key.copy_from_slice(hasher.finalize().as_bytes());
        Self { key }
    }

    /// Fresh random key; handles do not survive a restart.
    pub fn ephemeral() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }
}

impl std::fmt::Debug for Blake3PseudonymResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blake3PseudonymResolver").finish_non_exhaustive()
    }
}

impl PseudonymResolver for Blake3PseudonymResolver {
    fn agent_handle(&self, entity_id: &str) -> String {
        let mut hasher = Hasher::new_keyed(&self.key);
        hasher.update(entity_id.as_bytes());
        let hex = hasher.finalize().to_hex();
        format!("{HANDLE_PREFIX}{}", &hex.as_str()[..HANDLE_HEX_LEN])
    }
}

/// Characteristics that carry a user id and must leave the engine as handles.
const USER_ID_CHARACTERISTICS: [&str; 1] = ["host_id"];

/// Replaces the querying user's id with its agent handle in `result`, drops
/// the user's display name, pseudonymizes event hosts and records the handle
/// in the metadata. Returns the handle.
pub fn seal_result(
    result: &mut MatchingResult,
    user_id: &str,
    resolver: &dyn PseudonymResolver,
) -> String {
    let agent_handle = resolver.agent_handle(user_id);
    for state in result.entities.iter_mut() {
        if state.is_user() && state.entity_id == user_id {
            state.entity_id = agent_handle.clone();
            state.characteristics.remove("display_name");
        }
        for key in USER_ID_CHARACTERISTICS {
            let sealed = match state.characteristics.get(key) {
                Some(Value::String(id)) => resolver.agent_handle(id),
                _ => continue,
            };
            state.characteristics.insert(key.to_string(), Value::String(sealed));
        }
    }
    result
        .metadata
        .insert("agent_handle".into(), Value::String(agent_handle.clone()));
    agent_handle
}
