//! Platform credentials parsed from a Kubernetes secret

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use strata_common::Error;

/// Credentials for the remote platform API
///
/// Parsed from a key/value secret holding `url`, `username` and `password`,
/// optionally `org_username`/`org_password` for elevated workspace
/// creation. Absence or malformed content is a fetch error.
#[derive(Clone, Debug, PartialEq)]
pub struct Credentials {
    /// Base URL of the platform API
    pub url: String,
    /// Username used for space-level operations and developer grants
    pub username: String,
    /// Password for `username`
    pub password: String,
    /// Elevated username for organization-level operations
    pub org_username: Option<String>,
    /// Password for `org_username`
    pub org_password: Option<String>,
}

impl Credentials {
    /// Parse credentials from secret data
    pub fn from_secret_data(
        secret_name: &str,
        secret_namespace: &str,
        data: &BTreeMap<String, ByteString>,
    ) -> Result<Self, Error> {
        let field = |key: &str| -> Result<String, Error> {
            let bytes = data.get(key).ok_or_else(|| {
                Error::secret(secret_name, secret_namespace, format!("missing key {key}"))
            })?;
            String::from_utf8(bytes.0.clone()).map_err(|_| {
                Error::secret(
                    secret_name,
                    secret_namespace,
                    format!("key {key} is not valid UTF-8"),
                )
            })
        };

        let optional = |key: &str| -> Option<String> {
            data.get(key)
                .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
        };

        Ok(Self {
            url: field("url")?,
            username: field("username")?,
            password: field("password")?,
            org_username: optional("org_username"),
            org_password: optional("org_password"),
        })
    }

    /// Username and password used for organization-level calls
    ///
    /// Falls back to the space-level user when no elevated user is
    /// configured.
    pub fn org_auth(&self) -> (&str, &str) {
        match (&self.org_username, &self.org_password) {
            (Some(user), Some(pass)) => (user, pass),
            _ => (&self.username, &self.password),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> BTreeMap<String, ByteString> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
            .collect()
    }

    #[test]
    fn test_parses_required_keys() {
        let creds = Credentials::from_secret_data(
            "creds",
            "team-a",
            &data(&[
                ("url", "https://platform.example.com"),
                ("username", "alice"),
                ("password", "pw"),
            ]),
        )
        .unwrap();
        assert_eq!(creds.url, "https://platform.example.com");
        assert_eq!(creds.org_auth(), ("alice", "pw"));
    }

    #[test]
    fn test_missing_key_is_secret_error() {
        let err = Credentials::from_secret_data("creds", "team-a", &data(&[("url", "x")]))
            .unwrap_err();
        assert!(err.to_string().contains("missing key username"));
    }

    #[test]
    fn test_org_auth_prefers_elevated_user() {
        let creds = Credentials::from_secret_data(
            "creds",
            "team-a",
            &data(&[
                ("url", "https://platform.example.com"),
                ("username", "alice"),
                ("password", "pw"),
                ("org_username", "admin"),
                ("org_password", "admin-pw"),
            ]),
        )
        .unwrap();
        assert_eq!(creds.org_auth(), ("admin", "admin-pw"));
    }
}
