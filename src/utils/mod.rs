use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::source::Photo;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Time zone used when a file name is derived from the upload date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeZonePolicy {
    #[default]
    Local,
    Utc,
}

/// Formats a Unix timestamp as `YYYY-MM-DD_HH-MM-SS`.
///
/// Returns `None` when the timestamp is outside the range chrono supports.
pub fn format_timestamp(timestamp: i64, policy: TimeZonePolicy) -> Option<String> {
    let utc = DateTime::<Utc>::from_timestamp(timestamp, 0)?;
    let formatted = match policy {
        TimeZonePolicy::Utc => utc.format(TIMESTAMP_FORMAT).to_string(),
        TimeZonePolicy::Local => utc
            .with_timezone(&Local)
            .format(TIMESTAMP_FORMAT)
            .to_string(),
    };
    Some(formatted)
}

/// Name under which a photo is stored: its like count when it has likes,
/// its upload time otherwise. Equal names are not disambiguated.
pub fn derive_file_name(photo: &Photo, policy: TimeZonePolicy) -> String {
    let likes = photo.likes_count();
    if likes > 0 {
        return format!("{likes}.jpg");
    }

    match format_timestamp(photo.date, policy) {
        Some(stamp) => format!("{stamp}.jpg"),
        None => format!("{}.jpg", photo.date),
    }
}
