//! Amazon S3 through the Hadoop `s3a` filesystem

use super::EngineConf;
use serde::{Deserialize, Serialize};

const TEMPORARY_CREDENTIALS_PROVIDER: &str =
    "org.apache.hadoop.fs.s3a.TemporaryAWSCredentialsProvider";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Connector {
    pub name: String,
    pub bucket: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub server_encryption_algorithm: Option<String>,
    pub server_encryption_key: Option<String>,
    pub session_token: Option<String>,
}

impl S3Connector {
    pub fn new(name: impl Into<String>, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            access_key: Some(access_key.into()),
            secret_key: Some(secret_key.into()),
            ..Default::default()
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_encryption(mut self, algorithm: impl Into<String>, key: impl Into<String>) -> Self {
        self.server_encryption_algorithm = Some(algorithm.into());
        self.server_encryption_key = Some(key.into());
        self
    }

    /// Install credentials and return the path with its `s3a` scheme
    pub(crate) fn configure(&self, path: &str, conf: &mut EngineConf) -> String {
        let settings = [
            ("fs.s3a.access.key", &self.access_key),
            ("fs.s3a.secret.key", &self.secret_key),
            (
                "fs.s3a.server-side-encryption-algorithm",
                &self.server_encryption_algorithm,
            ),
            ("fs.s3a.server-side-encryption-key", &self.server_encryption_key),
        ];
        for (key, value) in settings {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                conf.set(key, value);
            }
        }
        if let Some(token) = self.session_token.as_deref().filter(|t| !t.is_empty()) {
            conf.set("fs.s3a.aws.credentials.provider", TEMPORARY_CREDENTIALS_PROVIDER);
            conf.set("fs.s3a.session.token", token);
        }
        rewrite_scheme(path)
    }
}

/// `s3://bucket/key` becomes `s3a://bucket/key`; other paths are unchanged
pub fn rewrite_scheme(path: &str) -> String {
    match path.strip_prefix("s3://") {
        Some(rest) => format!("s3a://{}", rest),
        None => path.to_string(),
    }
}
