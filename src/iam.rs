//! Credential store and policy gate.
//!
//! [`Iam`] is built once from configuration and is read-only afterwards,
//! so it is shared across request tasks behind an `Arc` without locking.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use crate::config::AuthConfig;

/// S3 actions a policy can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Action {
    #[serde(rename = "s3:ListAllMyBuckets")]
    ListAllMyBuckets,
    #[serde(rename = "s3:CreateBucket")]
    CreateBucket,
    #[serde(rename = "s3:DeleteBucket")]
    DeleteBucket,
    #[serde(rename = "s3:ListBucket")]
    ListBucket,
    #[serde(rename = "s3:PutObject")]
    PutObject,
    #[serde(rename = "s3:GetObject")]
    GetObject,
    #[serde(rename = "s3:DeleteObject")]
    DeleteObject,
}

impl Action {
    /// The wire name, e.g. `s3:GetObject`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ListAllMyBuckets => "s3:ListAllMyBuckets",
            Action::CreateBucket => "s3:CreateBucket",
            Action::DeleteBucket => "s3:DeleteBucket",
            Action::ListBucket => "s3:ListBucket",
            Action::PutObject => "s3:PutObject",
            Action::GetObject => "s3:GetObject",
            Action::DeleteObject => "s3:DeleteObject",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A closed set of authorization strategies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Policy {
    /// Every action on every resource.
    AllowAll,
    /// Only the listed actions, optionally restricted to listed buckets.
    AllowListed {
        #[serde(default)]
        actions: Vec<Action>,
        /// Empty means any resource.
        #[serde(default)]
        buckets: Vec<String>,
    },
    #[default]
    DenyAll,
}

impl Policy {
    /// Evaluate the policy for `action` on `resource` (a bucket name or "").
    pub fn allows(&self, resource: &str, action: Action) -> bool {
        match self {
            Policy::AllowAll => true,
            Policy::DenyAll => false,
            Policy::AllowListed { actions, buckets } => {
                actions.contains(&action)
                    && (buckets.is_empty() || buckets.iter().any(|b| b == resource))
            }
        }
    }
}

struct Identity {
    secret_key: String,
    policy: Policy,
}

/// Access keys, their secrets, and their policies.
pub struct Iam {
    identities: HashMap<String, Identity>,
}

impl fmt::Debug for Iam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.identities.keys().collect();
        keys.sort();
        f.debug_struct("Iam").field("access_keys", &keys).finish()
    }
}

impl Iam {
    /// Build the store from the `auth` config section.
    ///
    /// The admin identity always receives [`Policy::AllowAll`].  A repeated
    /// access key is rejected.
    pub fn from_config(auth: &AuthConfig) -> anyhow::Result<Self> {
        let mut identities = HashMap::new();
        identities.insert(
            auth.access_key.clone(),
            Identity {
                secret_key: auth.secret_key.clone(),
                policy: Policy::AllowAll,
            },
        );

        for user in &auth.users {
            if identities.contains_key(&user.access_key) {
                anyhow::bail!("duplicate access key in configuration: {}", user.access_key);
            }
            identities.insert(
                user.access_key.clone(),
                Identity {
                    secret_key: user.secret_key.clone(),
                    policy: user.policy.clone(),
                },
            );
        }

        tracing::debug!(identities = identities.len(), "IAM loaded");
        Ok(Self { identities })
    }

    /// Secret key for `access_key`, if known.
    pub fn secret_key(&self, access_key: &str) -> Option<&str> {
        self.identities
            .get(access_key)
            .map(|identity| identity.secret_key.as_str())
    }

    /// Policy gate.  Unknown access keys are always denied.
    pub fn authorize(&self, access_key: &str, resource: &str, action: Action) -> bool {
        let allowed = self
            .identities
            .get(access_key)
            .is_some_and(|identity| identity.policy.allows(resource, action));
        tracing::debug!(access_key, resource, action = %action, allowed, "policy decision");
        allowed
    }
}
