//! Sink selection for a feature group write

use super::Storage;
use crate::error::{FeatureStoreError, Result};
use crate::featurestore::FeatureGroupDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sinks a write goes to, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePlan {
    OnlineOnly,
    OfflineOnly,
    /// Offline first; the online leg only runs after the offline leg succeeded
    OfflineThenOnline,
}

impl RoutePlan {
    /// Legs in execution order
    pub fn legs(&self) -> &'static [Storage] {
        match self {
            RoutePlan::OnlineOnly => &[Storage::Online],
            RoutePlan::OfflineOnly => &[Storage::Offline],
            RoutePlan::OfflineThenOnline => &[Storage::Offline, Storage::Online],
        }
    }

    pub fn writes_offline(&self) -> bool {
        self.legs().contains(&Storage::Offline)
    }

    pub fn writes_online(&self) -> bool {
        self.legs().contains(&Storage::Online)
    }
}

impl fmt::Display for RoutePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoutePlan::OnlineOnly => "online",
            RoutePlan::OfflineOnly => "offline",
            RoutePlan::OfflineThenOnline => "offline+online",
        };
        f.write_str(s)
    }
}

/// Decide which sinks a write goes to
///
/// Streaming sources always go online only. An explicit destination is
/// honored, except `online` for a group without online storage. Without a
/// destination, online-enabled groups are written offline then online.
pub fn route(
    feature_group: &FeatureGroupDescriptor,
    storage: Option<Storage>,
    has_streaming_source: bool,
) -> Result<RoutePlan> {
    if has_streaming_source || feature_group.stream {
        return Ok(RoutePlan::OnlineOnly);
    }
    match storage {
        Some(Storage::Online) if !feature_group.online_enabled => {
            Err(FeatureStoreError::Config(format!(
                "Online storage is not enabled for feature group {}",
                feature_group.table_name()
            )))
        }
        Some(Storage::Online) => Ok(RoutePlan::OnlineOnly),
        Some(Storage::Offline) => Ok(RoutePlan::OfflineOnly),
        None if feature_group.online_enabled => Ok(RoutePlan::OfflineThenOnline),
        None => Ok(RoutePlan::OfflineOnly),
    }
}
