//! Access-control policy: who may invoke the deployed services.

use crate::Principal;
use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The shape of the invoker allowlist applied by the hardening stage.
///
/// `AllAuthenticated` is an ordinary policy value: it goes through the
/// same desired-member reconciliation as the narrow kinds rather than a
/// separate restore path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessControlKind {
    Domain,
    Group,
    Users,
    #[serde(alias = "all-authenticated", alias = "allAuthenticatedUsers")]
    AllAuthenticated,
}

impl FromStr for AccessControlKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "domain" => Ok(AccessControlKind::Domain),
            "group" => Ok(AccessControlKind::Group),
            "users" => Ok(AccessControlKind::Users),
            "all_authenticated" | "all-authenticated" | "allAuthenticatedUsers" => {
                Ok(AccessControlKind::AllAuthenticated)
            }
            other => Err(ConfigError::UnknownAccessKind(other.to_string())),
        }
    }
}

/// (kind, value) pair as supplied by `ACCESS_CONTROL_TYPE` /
/// `ACCESS_CONTROL_VALUE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    #[serde(rename = "type")]
    pub kind: AccessControlKind,
    #[serde(default)]
    pub value: String,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            kind: AccessControlKind::AllAuthenticated,
            value: String::new(),
        }
    }
}

impl AccessPolicy {
    pub fn new(kind: AccessControlKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    /// Derive the desired invoker members for this policy.
    ///
    /// The full set is computed (and the value validated) before the
    /// reconciler touches any binding, so an invalid value can never
    /// leave an ACL half-rewritten.
    pub fn members(&self) -> Result<Vec<Principal>, ConfigError> {
        match self.kind {
            AccessControlKind::Domain => {
                let value = self.require_value("a domain name")?;
                Ok(vec![Principal::Domain(value)])
            }
            AccessControlKind::Group => {
                let value = self.require_value("a group address")?;
                Ok(vec![Principal::Group(value)])
            }
            AccessControlKind::Users => {
                let users: Vec<String> = self
                    .value
                    .split(',')
                    .map(str::trim)
                    .map(str::to_string)
                    .collect();
                if users.iter().any(|u| u.is_empty()) {
                    return Err(ConfigError::InvalidPolicyValue(
                        "users policy needs a comma-separated list of non-empty addresses"
                            .to_string(),
                    ));
                }
                Ok(users.into_iter().map(Principal::User).collect())
            }
            AccessControlKind::AllAuthenticated => Ok(vec![Principal::AllAuthenticatedUsers]),
        }
    }

    fn require_value(&self, what: &str) -> Result<String, ConfigError> {
        let value = self.value.trim();
        if value.is_empty() {
            return Err(ConfigError::InvalidPolicyValue(format!(
                "{} policy needs {}",
                kind_name(self.kind),
                what
            )));
        }
        Ok(value.to_string())
    }
}

fn kind_name(kind: AccessControlKind) -> &'static str {
    match kind {
        AccessControlKind::Domain => "domain",
        AccessControlKind::Group => "group",
        AccessControlKind::Users => "users",
        AccessControlKind::AllAuthenticated => "all-authenticated",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kinds() {
        assert_eq!(
            "domain".parse::<AccessControlKind>().unwrap(),
            AccessControlKind::Domain
        );
        assert_eq!(
            "all-authenticated".parse::<AccessControlKind>().unwrap(),
            AccessControlKind::AllAuthenticated
        );
        assert_eq!(
            "allAuthenticatedUsers".parse::<AccessControlKind>().unwrap(),
            AccessControlKind::AllAuthenticated
        );
        assert!("nonsense".parse::<AccessControlKind>().is_err());
    }

    #[test]
    fn domain_members() {
        let policy = AccessPolicy::new(AccessControlKind::Domain, "example.com");
        assert_eq!(
            policy.members().unwrap(),
            vec![Principal::Domain("example.com".into())]
        );
    }

    #[test]
    fn users_members_split_and_trimmed() {
        let policy = AccessPolicy::new(
            AccessControlKind::Users,
            "alice@example.com, bob@example.com",
        );
        assert_eq!(
            policy.members().unwrap(),
            vec![
                Principal::User("alice@example.com".into()),
                Principal::User("bob@example.com".into()),
            ]
        );
    }

    #[test]
    fn empty_domain_value_rejected() {
        let policy = AccessPolicy::new(AccessControlKind::Domain, "  ");
        assert!(matches!(
            policy.members(),
            Err(ConfigError::InvalidPolicyValue(_))
        ));
    }

    #[test]
    fn dangling_comma_rejected() {
        let policy = AccessPolicy::new(AccessControlKind::Users, "alice@example.com,");
        assert!(policy.members().is_err());
    }

    #[test]
    fn all_authenticated_ignores_value() {
        let policy = AccessPolicy::new(AccessControlKind::AllAuthenticated, "");
        assert_eq!(
            policy.members().unwrap(),
            vec![Principal::AllAuthenticatedUsers]
        );
    }
}
