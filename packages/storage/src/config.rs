//! Object-store provider configuration.

use std::collections::BTreeMap;

use crate::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStoreKind {
    S3,
    Oss,
    Memory,
}

impl ObjectStoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectStoreKind::S3 => "s3",
            ObjectStoreKind::Oss => "oss",
            ObjectStoreKind::Memory => "memory",
        }
    }
}

/// Credentials and endpoint for one object-store provider.
///
/// Bucket and region are not part of the config: they arrive with each job.
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub kind: ObjectStoreKind,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Endpoint override, used path-style. Without it the provider default applies.
    pub endpoint: Option<String>,
    pub allow_http: bool,
    /// Headers applied to every upload unless the job overrides them.
    pub default_headers: BTreeMap<String, String>,
}

impl ObjectStoreConfig {
    fn new(kind: ObjectStoreKind) -> Self {
        Self {
            kind,
            access_key_id: None,
            secret_access_key: None,
            endpoint: None,
            allow_http: false,
            default_headers: BTreeMap::new(),
        }
    }

    pub fn s3() -> Self {
        Self::new(ObjectStoreKind::S3)
    }

    /// OSS uploads default to `Cache-Control: max-age=0`.
    pub fn oss() -> Self {
        let mut cfg = Self::new(ObjectStoreKind::Oss);
        cfg.default_headers
            .insert("Cache-Control".to_string(), "max-age=0".to_string());
        cfg
    }

    pub fn memory() -> Self {
        Self::new(ObjectStoreKind::Memory)
    }

    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.allow_http = endpoint
            .trim_start()
            .to_ascii_lowercase()
            .starts_with("http://");
        self.endpoint = Some(endpoint);
        self
    }

    /// Build the S3 config from environment variables.
    ///
    /// - `AWS_ACCESS`, `AWS_SECRET` (optional; the ambient AWS environment is used otherwise)
    /// - `S3_ENDPOINT` (optional, e.g. `http://localhost:9000`)
    /// - `S3_ALLOW_HTTP` (`true`/`false`, default: auto true if endpoint is http://)
    pub fn s3_from_env() -> Result<Self, StorageError> {
        Self::from_env(Self::s3(), "AWS_ACCESS", "AWS_SECRET", "S3_ENDPOINT", "S3_ALLOW_HTTP")
    }

    /// Build the OSS config from environment variables.
    ///
    /// - `OSS_ACCESS`, `OSS_SECRET`
    /// - `OSS_ENDPOINT` (optional; default `https://<bucket>.<region>.aliyuncs.com`)
    /// - `OSS_ALLOW_HTTP` (`true`/`false`)
    pub fn oss_from_env() -> Result<Self, StorageError> {
        Self::from_env(
            Self::oss(),
            "OSS_ACCESS",
            "OSS_SECRET",
            "OSS_ENDPOINT",
            "OSS_ALLOW_HTTP",
        )
    }

    fn from_env(
        mut cfg: Self,
        access_var: &str,
        secret_var: &str,
        endpoint_var: &str,
        allow_http_var: &str,
    ) -> Result<Self, StorageError> {
        cfg.access_key_id = std::env::var(access_var).ok().and_then(non_empty);
        cfg.secret_access_key = std::env::var(secret_var).ok().and_then(non_empty);
        if cfg.access_key_id.is_some() != cfg.secret_access_key.is_some() {
            return Err(StorageError::InvalidConfig(format!(
                "{access_var} and {secret_var} must be set together"
            )));
        }

        if let Some(endpoint) = std::env::var(endpoint_var).ok().and_then(non_empty) {
            cfg = cfg.with_endpoint(endpoint);
        }
        if let Some(allow_http) = parse_bool_env(allow_http_var)? {
            cfg.allow_http = allow_http;
        }

        Ok(cfg)
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool_env(var_name: &str) -> Result<Option<bool>, StorageError> {
    let v = match std::env::var(var_name) {
        Ok(v) => v,
        Err(std::env::VarError::NotPresent) => return Ok(None),
        Err(e) => {
            return Err(StorageError::InvalidConfig(format!(
                "failed reading {var_name}: {e}"
            )));
        }
    };

    let normalized = v.trim().to_ascii_lowercase();
    let parsed = match normalized.as_str() {
        "1" | "true" | "yes" | "y" => true,
        "0" | "false" | "no" | "n" => false,
        _ => {
            return Err(StorageError::InvalidConfig(format!(
                "invalid boolean for {var_name}={v} (expected true/false)"
            )));
        }
    };
    Ok(Some(parsed))
}
