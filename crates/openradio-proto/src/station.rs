use serde::{Deserialize, Serialize};

/// Sort id of a station the user never reordered.
pub const UNSORTED: i32 = -1;

/// One playable rendition of a station's stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StreamVariant {
    pub bitrate: u32,
    pub url: String,
}

/// Stream renditions of a station.  Empty until the catalogue has been asked
/// for the station's details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MediaStream {
    #[serde(default)]
    variants: Vec<StreamVariant>,
}

impl MediaStream {
    pub fn with_variant(bitrate: u32, url: impl Into<String>) -> Self {
        let mut stream = Self::default();
        stream.set_variant(bitrate, url);
        stream
    }

    pub fn is_empty(&self) -> bool {
        self.variants.iter().all(|v| v.url.is_empty())
    }

    /// Add a rendition, replacing any existing one with the same bitrate.
    pub fn set_variant(&mut self, bitrate: u32, url: impl Into<String>) {
        let url = url.into();
        match self.variants.iter_mut().find(|v| v.bitrate == bitrate) {
            Some(existing) => existing.url = url,
            None => self.variants.push(StreamVariant { bitrate, url }),
        }
    }

    pub fn clear(&mut self) {
        self.variants.clear();
    }

    pub fn variants(&self) -> &[StreamVariant] {
        &self.variants
    }

    /// URL of the first usable rendition.
    pub fn url(&self) -> Option<&str> {
        self.variants
            .iter()
            .map(|v| v.url.as_str())
            .find(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Station {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub media_stream: MediaStream,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub thumb_url: String,
    #[serde(default)]
    pub status: i32,
    /// Added by the user rather than fetched from the catalogue.
    #[serde(default)]
    pub is_local: bool,
    #[serde(default = "default_sort_id")]
    pub sort_id: i32,
}

fn default_sort_id() -> i32 {
    UNSORTED
}

impl Default for Station {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            media_stream: MediaStream::default(),
            website: String::new(),
            country: String::new(),
            genre: String::new(),
            image_url: String::new(),
            thumb_url: String::new(),
            status: 0,
            is_local: false,
            sort_id: UNSORTED,
        }
    }
}

impl Station {
    /// Station entered by hand.
    pub fn local(
        id: u32,
        name: impl Into<String>,
        url: impl Into<String>,
        image_url: impl Into<String>,
        genre: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            media_stream: MediaStream::with_variant(0, url),
            image_url: image_url.into(),
            genre: genre.into(),
            country: country.into(),
            is_local: true,
            ..Self::default()
        }
    }

    /// Id used for this station in the browse tree and the play queue.
    pub fn media_id(&self) -> String {
        self.id.to_string()
    }

    pub fn stream_url(&self) -> Option<&str> {
        self.media_stream.url()
    }

    /// Best image for artwork, falling back to the thumbnail.
    pub fn artwork_url(&self) -> Option<&str> {
        [self.image_url.as_str(), self.thumb_url.as_str()]
            .into_iter()
            .find(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Category {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub amount: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Country {
    pub code: String,
    #[serde(default)]
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_variant_replaces_same_bitrate() {
        let mut stream = MediaStream::with_variant(128, "http://a");
        stream.set_variant(128, "http://b");
        stream.set_variant(64, "http://c");
        assert_eq!(stream.variants().len(), 2);
        assert_eq!(stream.url(), Some("http://b"));
    }

    #[test]
    fn test_empty_urls_count_as_empty_stream() {
        let stream = MediaStream::with_variant(0, "");
        assert!(stream.is_empty());
        assert_eq!(stream.url(), None);
    }

    #[test]
    fn test_missing_sort_id_deserializes_unsorted() {
        let station: Station = serde_json::from_str(r#"{"id": 7, "name": "Seven"}"#).unwrap();
        assert_eq!(station.sort_id, UNSORTED);
        assert!(station.media_stream.is_empty());
        assert!(!station.is_local);
    }

    #[test]
    fn test_local_station_is_flagged() {
        let station = Station::local(3, "Mine", "http://mine/stream", "", "jazz", "NL");
        assert!(station.is_local);
        assert_eq!(station.stream_url(), Some("http://mine/stream"));
        assert_eq!(station.media_id(), "3");
    }
}
