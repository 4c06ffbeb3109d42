use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::models::PublicProfile;

/// Errors that can occur when querying the profile directory
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("API returned error: {0}")]
    ApiError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: invalid API key")]
    Unauthorized,

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

/// Client for the user directory that owns account data
///
/// Only the public fields needed to introduce a partner are read.
pub struct ProfileClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl ProfileClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self, ProfileError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            base_url,
            api_key,
            client,
        })
    }

    /// Fetch the public profile of a user
    pub async fn get_profile(&self, user_id: &str) -> Result<PublicProfile, ProfileError> {
        let url = format!(
            "{}/users/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(user_id)
        );

        tracing::debug!("Fetching public profile for user: {}", user_id);

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }
        let response = request.send().await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(ProfileError::NotFound(format!("Profile not found for user {}", user_id)));
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ProfileError::Unauthorized);
            }
            status => {
                return Err(ProfileError::ApiError(format!("Failed to fetch profile: {}", status)));
            }
        }

        let json: Value = response.json().await?;

        // Some directory deployments wrap documents in a `data` envelope
        let data = json.get("data").unwrap_or(&json);

        serde_json::from_value(data.clone())
            .map_err(|e| ProfileError::InvalidResponse(format!("Failed to parse profile: {}", e)))
    }
}
