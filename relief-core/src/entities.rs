//! Domain entities served by the feed and need endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub type FeedId = i64;
pub type NeedId = i64;

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check that both coordinates are finite and within WGS84 bounds.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_latitude("latitude", self.latitude)?;
        check_longitude("longitude", self.longitude)
    }
}

fn check_latitude(field: &str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || !(-90.0..=90.0).contains(&value) {
        return Err(ValidationError::invalid(field, "must be between -90 and 90"));
    }
    Ok(())
}

fn check_longitude(field: &str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || !(-180.0..=180.0).contains(&value) {
        return Err(ValidationError::invalid(
            field,
            "must be between -180 and 180",
        ));
    }
    Ok(())
}

/// A geo-point on the relief map, backed by a [`Feed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedArea {
    pub id: FeedId,
    #[serde(flatten)]
    pub location: Location,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// The incident record behind a feed area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: FeedId,
    pub full_text: String,
    pub is_resolved: bool,
    pub channel: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_parameters: Option<serde_json::Value>,
}

/// A reported need (water, shelter, medical...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Need {
    pub id: NeedId,
    pub description: String,
    pub address: String,
    pub is_resolved: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

// ============================================================================
// QUERIES AND REQUESTS
// ============================================================================

/// Bounding-box listing of feed areas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedAreaQuery {
    pub sw_lat: f64,
    pub sw_lng: f64,
    pub ne_lat: f64,
    pub ne_lng: f64,
    /// Only areas newer than this unix timestamp (seconds).
    #[serde(default, rename = "time_stamp")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

impl FeedAreaQuery {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_latitude("sw_lat", self.sw_lat)?;
        check_latitude("ne_lat", self.ne_lat)?;
        check_longitude("sw_lng", self.sw_lng)?;
        check_longitude("ne_lng", self.ne_lng)?;
        if self.sw_lat > self.ne_lat {
            return Err(ValidationError::invalid("sw_lat", "must not exceed ne_lat"));
        }
        if self.sw_lng > self.ne_lng {
            return Err(ValidationError::invalid("sw_lng", "must not exceed ne_lng"));
        }
        Ok(())
    }

    pub fn contains(&self, location: &Location) -> bool {
        (self.sw_lat..=self.ne_lat).contains(&location.latitude)
            && (self.sw_lng..=self.ne_lng).contains(&location.longitude)
    }

    /// Whether an area passes the optional timestamp/reason/channel filters.
    pub fn matches(&self, area: &FeedArea) -> bool {
        if !self.contains(&area.location) {
            return false;
        }
        if let Some(since) = self.timestamp {
            if area.timestamp.timestamp() < since {
                return false;
            }
        }
        if let Some(reason) = self.reason.as_deref() {
            if area.reason.as_deref() != Some(reason) {
                return false;
            }
        }
        if let Some(channel) = self.channel.as_deref() {
            if area.channel.as_deref() != Some(channel) {
                return false;
            }
        }
        true
    }
}

/// Moves one feed area to a corrected location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedLocationUpdate {
    #[serde(rename = "id")]
    pub feed_id: FeedId,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateFeedLocationsRequest {
    pub feeds: Vec<FeedLocationUpdate>,
}

impl UpdateFeedLocationsRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.feeds.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "feeds".to_string(),
            });
        }
        for update in &self.feeds {
            update.location.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeedFilter {
    #[serde(default, rename = "only_not_resolved")]
    pub only_unresolved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNeedRequest {
    pub description: String,
    pub address: String,
    #[serde(default)]
    pub location: Option<Location>,
}

impl CreateNeedRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.description.trim().is_empty() {
            return Err(ValidationError::BlankField {
                field: "description".to_string(),
            });
        }
        if self.address.trim().is_empty() {
            return Err(ValidationError::BlankField {
                field: "address".to_string(),
            });
        }
        if let Some(location) = &self.location {
            location.validate()?;
        }
        Ok(())
    }
}
