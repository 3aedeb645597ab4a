//! Azure Data Lake Storage, generation 1 and 2

use super::EngineConf;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdlsConnector {
    pub name: String,
    /// 1 for `adl://`, 2 for `abfss://`
    pub generation: u8,
    pub directory_id: String,
    pub application_id: String,
    pub service_credential: String,
    pub account_name: String,
    pub container_name: Option<String>,
    /// Additional options installed as they are
    pub extra: BTreeMap<String, String>,
}

impl Default for AdlsConnector {
    fn default() -> Self {
        Self {
            name: String::new(),
            generation: 2,
            directory_id: String::new(),
            application_id: String::new(),
            service_credential: String::new(),
            account_name: String::new(),
            container_name: None,
            extra: BTreeMap::new(),
        }
    }
}

impl AdlsConnector {
    fn token_endpoint(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/token",
            self.directory_id
        )
    }

    /// Filesystem options for this account
    pub fn spark_options(&self) -> BTreeMap<String, String> {
        let mut options = BTreeMap::new();
        if self.generation == 1 {
            options.insert(
                "fs.adl.oauth2.access.token.provider.type".to_string(),
                "ClientCredential".to_string(),
            );
            options.insert(
                "fs.adl.account.name".to_string(),
                self.account_name.clone(),
            );
            options.insert(
                "fs.adl.oauth2.client.id".to_string(),
                self.application_id.clone(),
            );
            options.insert(
                "fs.adl.oauth2.credential".to_string(),
                self.service_credential.clone(),
            );
            options.insert("fs.adl.oauth2.refresh.url".to_string(), self.token_endpoint());
        } else {
            let account = format!("{}.dfs.core.windows.net", self.account_name);
            let keyed = |prefix: &str| format!("{}.{}", prefix, account);
            options.insert(keyed("fs.azure.account.auth.type"), "OAuth".to_string());
            options.insert(
                keyed("fs.azure.account.oauth.provider.type"),
                "org.apache.hadoop.fs.azurebfs.oauth2.ClientCredsTokenProvider".to_string(),
            );
            options.insert(
                keyed("fs.azure.account.oauth2.client.id"),
                self.application_id.clone(),
            );
            options.insert(
                keyed("fs.azure.account.oauth2.client.secret"),
                self.service_credential.clone(),
            );
            options.insert(
                keyed("fs.azure.account.oauth2.client.endpoint"),
                self.token_endpoint(),
            );
        }
        options.extend(self.extra.clone());
        options
    }

    pub(crate) fn configure(&self, path: &str, conf: &mut EngineConf) -> String {
        for (key, value) in self.spark_options() {
            conf.set(key, value);
        }
        path.to_string()
    }
}
