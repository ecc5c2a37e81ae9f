use reqwest::Url;

use super::error::{CouchDaoError, CouchResult};

const DEFAULT_DB: &str = "writing_arena";

/// Connection settings for the CouchDB session store.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    /// Server root without a trailing slash, e.g. `http://localhost:5984`.
    pub base_url: String,
    /// Database holding the `session::` documents.
    pub database_name: String,
    /// Basic-auth user and password, when the server requires them.
    pub credentials: Option<(String, String)>,
}

impl CouchConfig {
    /// Validate the server URL, falling back to the default database name.
    pub fn from_url(base_url: &str, db_name: Option<&str>) -> CouchResult<Self> {
        let invalid = |reason: String| CouchDaoError::InvalidUrl {
            url: base_url.to_owned(),
            reason,
        };
        let url = Url::parse(base_url).map_err(|err| invalid(err.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
        }

        let database_name = db_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_DB)
            .to_owned();

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            database_name,
            credentials: None,
        })
    }

    /// Attach basic-auth credentials. A user without a password, or the
    /// reverse, is a configuration error rather than an anonymous login.
    pub fn with_credentials(
        mut self,
        username: Option<String>,
        password: Option<String>,
    ) -> CouchResult<Self> {
        self.credentials = match (username, password) {
            (Some(username), Some(password)) => Some((username, password)),
            (None, None) => None,
            (Some(_), None) => {
                return Err(CouchDaoError::IncompleteCredentials {
                    missing: "COUCH_PASSWORD",
                });
            }
            (None, Some(_)) => {
                return Err(CouchDaoError::IncompleteCredentials {
                    missing: "COUCH_USERNAME",
                });
            }
        };
        Ok(self)
    }

    /// Read `COUCH_BASE_URL`, the optional `COUCH_DB` and the optional
    /// `COUCH_USERNAME`/`COUCH_PASSWORD` pair.
    pub fn from_env() -> CouchResult<Self> {
        let base_url = std::env::var("COUCH_BASE_URL").map_err(|_| {
            CouchDaoError::MissingEnvVar {
                var: "COUCH_BASE_URL",
            }
        })?;
        let db = std::env::var("COUCH_DB").ok();
        Self::from_url(&base_url, db.as_deref())?.with_credentials(
            std::env::var("COUCH_USERNAME").ok(),
            std::env::var("COUCH_PASSWORD").ok(),
        )
    }
}
