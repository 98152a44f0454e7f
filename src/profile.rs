use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::{error::Result, types::ConnectionProfile};

/// JSON file holding the last connected device
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    /// Store backed by `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the profile file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a profile, replacing any previous one
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Io`](crate::F1Error::Io) if the file cannot be written.
    pub async fn save(&self, profile: &ConnectionProfile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(profile)?;
        tokio::fs::write(&self.path, json).await?;
        info!("Saved connection profile for {} to {}", profile.address, self.path.display());
        Ok(())
    }

    /// Load the saved profile, if any
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Io`](crate::F1Error::Io) if the file exists but cannot be
    /// read, or [`F1Error::Json`](crate::F1Error::Json) if it is malformed.
    pub async fn load(&self) -> Result<Option<ConnectionProfile>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No connection profile at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Delete the saved profile; a missing file is not an error
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Io`](crate::F1Error::Io) if the file cannot be removed.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::F1Error;

    fn profile() -> ConnectionProfile {
        ConnectionProfile {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            protocol_identifier: Some("F1SV2A".to_string()),
            display_name: Some("Bedroom".to_string()),
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("nested").join("profile.json"));

        assert!(store.load().await.unwrap().is_none());
        store.save(&profile()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(profile()));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_profile_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        tokio::fs::write(&path, b"{\"address\": 12}").await.unwrap();

        let err = ProfileStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, F1Error::Json(_)));
    }
}
