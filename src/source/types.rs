use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    pub url: String,
    /// Size label reported by the API ("s", "m", "x", "z", "w", ...)
    #[serde(rename = "type")]
    pub kind: String,
}

impl PhotoSize {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Likes {
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct Photo {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub owner_id: Option<i64>,
    /// Upload time as a Unix timestamp
    pub date: i64,
    #[serde(default)]
    pub sizes: Vec<PhotoSize>,
    #[serde(default)]
    pub likes: Option<Likes>,
}

impl Photo {
    pub fn likes_count(&self) -> u64 {
        self.likes.as_ref().map_or(0, |likes| likes.count)
    }

    /// Returns the size with the largest pixel area.
    ///
    /// When several sizes share the maximal area the first one in API order
    /// is kept. `Iterator::max_by_key` keeps the last, so it is not used here.
    pub fn largest_size(&self) -> Option<&PhotoSize> {
        self.sizes.iter().fold(None, |best, size| match best {
            Some(current) if current.area() >= size.area() => Some(current),
            _ => Some(size),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PhotoPage {
    #[serde(default)]
    #[allow(dead_code)]
    pub count: u64,
    pub items: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    pub error_code: i64,
    pub error_msg: String,
}

/// Envelope of a `photos.get` answer. VK reports failures with HTTP 200 and
/// an `error` object instead of `response`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiResponse {
    Ok { response: PhotoPage },
    Err { error: ApiError },
}
