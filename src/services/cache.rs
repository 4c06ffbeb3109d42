use std::time::Duration;

use crate::models::PublicProfile;
use crate::services::profiles::{ProfileClient, ProfileError};

/// Cached view over the profile directory
///
/// Partner profiles are read on every session poll, so found profiles are
/// kept in an in-process cache for a short TTL. Misses and errors are not
/// cached.
pub struct ProfileDirectory {
    client: ProfileClient,
    cache: moka::future::Cache<String, PublicProfile>,
}

impl ProfileDirectory {
    pub fn new(client: ProfileClient, cache_size: u64, ttl_secs: u64) -> Self {
        let cache = moka::future::CacheBuilder::new(cache_size)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self { client, cache }
    }

    /// Look up a user's public profile; `Ok(None)` if the directory has no such user
    pub async fn lookup(&self, user_id: &str) -> Result<Option<PublicProfile>, ProfileError> {
        if let Some(profile) = self.cache.get(user_id).await {
            tracing::trace!("Profile cache hit: {}", user_id);
            return Ok(Some(profile));
        }

        match self.client.get_profile(user_id).await {
            Ok(profile) => {
                self.cache.insert(user_id.to_string(), profile.clone()).await;
                Ok(Some(profile))
            }
            Err(ProfileError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
