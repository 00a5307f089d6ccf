//! Authentication selection for the control-plane client: the first
//! configured method wins, in the priority order from §4.2.
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentKey {
    pub key: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MtlsMaterial {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub ca_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserApiKey {
    pub api_key: String,
}

/// Everything the client might authenticate with. A client instance selects
/// exactly one path; later fields never override an earlier one that's
/// present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Credentials {
    pub agent_key: Option<AgentKey>,
    pub mtls: Option<MtlsMaterial>,
    pub user_key: Option<UserApiKey>,
}

/// Selected authentication method for one client instance. Priority, first
/// match wins: agent key, then mTLS (if the cert file exists on disk), then
/// the legacy user key.
#[derive(Debug, Clone)]
pub enum Authenticator {
    AgentKey(AgentKey),
    Mtls(MtlsMaterial),
    UserKey(UserApiKey),
}

impl Authenticator {
    pub fn select(credentials: &Credentials, mtls_cert_exists: impl Fn(&MtlsMaterial) -> bool) -> Option<Self> {
        if let Some(agent_key) = &credentials.agent_key {
            return Some(Authenticator::AgentKey(agent_key.clone()));
        }
        if let Some(mtls) = &credentials.mtls {
            if mtls_cert_exists(mtls) {
                return Some(Authenticator::Mtls(mtls.clone()));
            }
        }
        credentials.user_key.clone().map(Authenticator::UserKey)
    }

    /// `Authorization` header value for request transports that speak
    /// bearer auth (agent key and legacy user key); mTLS authenticates at
    /// the transport layer instead and returns `None` here.
    pub fn bearer_header(&self) -> Option<String> {
        match self {
            Authenticator::AgentKey(k) => Some(format!("Bearer {}", k.key)),
            Authenticator::UserKey(k) => Some(format!("Bearer {}", k.api_key)),
            Authenticator::Mtls(_) => None,
        }
    }

    pub fn key_prefix(&self) -> Option<&str> {
        match self {
            Authenticator::AgentKey(k) => Some(k.prefix.as_str()),
            _ => None,
        }
    }
}

/// Rotation state shared by the polling and sync loops: the server signals
/// rotation is needed via an out-of-band header; the actual `RotateAgentKey`
/// call happens on the next natural boundary (after heartbeat or config
/// sync), never mid-request.
pub struct RotationState {
    needs_rotation: AtomicBool,
    current: Mutex<Authenticator>,
}

impl RotationState {
    pub fn new(initial: Authenticator) -> Self {
        Self {
            needs_rotation: AtomicBool::new(false),
            current: Mutex::new(initial),
        }
    }

    pub fn mark_rotation_needed(&self) {
        self.needs_rotation.store(true, Ordering::SeqCst);
    }

    pub fn needs_rotation(&self) -> bool {
        self.needs_rotation.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> Authenticator {
        self.current.lock().expect("authenticator lock poisoned").clone()
    }

    /// Atomically swaps in the rotated key and clears the rotation flag.
    pub fn apply_rotation(&self, new_key: AgentKey) {
        let mut guard = self.current.lock().expect("authenticator lock poisoned");
        *guard = Authenticator::AgentKey(new_key);
        drop(guard);
        self.needs_rotation.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RotationGrace {
    pub old_key_valid_until: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_key_wins_over_mtls_and_user_key() {
        let creds = Credentials {
            agent_key: Some(AgentKey {
                key: "a".into(),
                prefix: "nrak_a".into(),
            }),
            mtls: Some(MtlsMaterial {
                cert_file: "/tmp/c".into(),
                key_file: "/tmp/k".into(),
                ca_file: "/tmp/ca".into(),
            }),
            user_key: Some(UserApiKey { api_key: "u".into() }),
        };
        let selected = Authenticator::select(&creds, |_| true).unwrap();
        assert!(matches!(selected, Authenticator::AgentKey(_)));
    }

    #[test]
    fn mtls_used_only_if_cert_file_exists() {
        let creds = Credentials {
            agent_key: None,
            mtls: Some(MtlsMaterial {
                cert_file: "/tmp/c".into(),
                key_file: "/tmp/k".into(),
                ca_file: "/tmp/ca".into(),
            }),
            user_key: Some(UserApiKey { api_key: "u".into() }),
        };
        let selected = Authenticator::select(&creds, |_| false).unwrap();
        assert!(matches!(selected, Authenticator::UserKey(_)));

        let selected = Authenticator::select(&creds, |_| true).unwrap();
        assert!(matches!(selected, Authenticator::Mtls(_)));
    }

    #[test]
    fn rotation_swap_is_atomic_and_clears_flag() {
        let state = RotationState::new(Authenticator::AgentKey(AgentKey {
            key: "old".into(),
            prefix: "nrak_old".into(),
        }));
        state.mark_rotation_needed();
        assert!(state.needs_rotation());

        state.apply_rotation(AgentKey {
            key: "new".into(),
            prefix: "nrak_new".into(),
        });

        assert!(!state.needs_rotation());
        assert_eq!(state.current().key_prefix(), Some("nrak_new"));
    }
}
