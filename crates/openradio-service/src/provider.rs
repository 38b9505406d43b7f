//! Station catalogue client: downloads raw bytes, parses them into stations,
//! categories and countries.
//!
//! Everything here is blocking and must run on the worker pool.

use std::sync::OnceLock;
use std::time::Duration;

use openradio_proto::config::{CatalogueConfig, NetworkConfig};
use openradio_proto::station::{Category, Country, MediaStream, Station, UNSORTED};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, ServiceError};

/// Fetches the body behind a URL.
pub trait Downloader: Send + Sync {
    fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// The blocking client is built on first use.  It runs its own runtime
/// thread and must be created outside the async runtime, i.e. on a worker.
pub struct HttpDownloader {
    connect_timeout: Duration,
    read_timeout: Duration,
    client: OnceLock<reqwest::blocking::Client>,
}

impl HttpDownloader {
    pub fn new(network: &NetworkConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(network.connect_timeout_secs),
            read_timeout: Duration::from_secs(network.read_timeout_secs),
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("openradio/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout)
            .build()?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, url: &str) -> Result<Vec<u8>> {
        info!("Request URL: {}", url);
        let response = self.client()?.get(url).send()?;
        if !response.status().is_success() {
            return Err(ServiceError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.bytes()?.to_vec())
    }
}

/// Turns downloaded bytes into catalogue records.
pub trait DataParser: Send + Sync {
    fn stations(&self, data: &[u8]) -> Result<Vec<Station>>;
    fn categories(&self, data: &[u8]) -> Result<Vec<Category>>;
    fn countries(&self, data: &[u8]) -> Result<Vec<Country>>;
}

/// Station record as served by the catalogue.  Kept apart from `Station` so
/// the wire schema can drift without touching the stored one.
#[derive(Debug, Deserialize)]
struct CatalogueStation {
    id: u32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    bitrate: Value,
    #[serde(default)]
    stream_url: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    genre: String,
    #[serde(default)]
    img_url: String,
    #[serde(default)]
    status: i32,
    #[serde(default)]
    thumb_url: String,
    #[serde(default)]
    website: String,
    #[serde(default)]
    is_local: bool,
    #[serde(default)]
    sort_id: Option<i32>,
}

impl From<CatalogueStation> for Station {
    fn from(s: CatalogueStation) -> Self {
        let media_stream = if s.stream_url.is_empty() {
            MediaStream::default()
        } else {
            MediaStream::with_variant(parse_bitrate(&s.bitrate), s.stream_url)
        };
        Station {
            id: s.id,
            name: s.name,
            media_stream,
            website: s.website,
            country: s.country,
            genre: s.genre,
            image_url: s.img_url,
            thumb_url: s.thumb_url,
            status: s.status,
            is_local: s.is_local,
            sort_id: s.sort_id.unwrap_or(UNSORTED),
        }
    }
}

/// Bitrate arrives as a number or a numeric string; anything else is 0.
fn parse_bitrate(value: &Value) -> u32 {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()).unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

pub struct JsonDataParser;

impl DataParser for JsonDataParser {
    fn stations(&self, data: &[u8]) -> Result<Vec<Station>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let records: Vec<Value> = serde_json::from_slice(data)?;
        let stations = records
            .into_iter()
            .filter_map(|record| match serde_json::from_value::<CatalogueStation>(record) {
                Ok(s) => Some(Station::from(s)),
                Err(e) => {
                    warn!("Skipping malformed station record: {}", e);
                    None
                }
            })
            .collect();
        Ok(stations)
    }

    fn categories(&self, data: &[u8]) -> Result<Vec<Category>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(data)?)
    }

    fn countries(&self, data: &[u8]) -> Result<Vec<Country>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(data)?)
    }
}

/// Catalogue endpoint layout.
#[derive(Debug, Clone)]
pub struct UrlBuilder {
    base_url: String,
}

impl UrlBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<String> {
        let raw = format!("{}/{}", self.base_url, path);
        let url = if params.is_empty() {
            reqwest::Url::parse(&raw)
        } else {
            reqwest::Url::parse_with_params(&raw, params)
        };
        url.map(|u| u.to_string())
            .map_err(|e| ServiceError::InvalidUrl(format!("{raw}: {e}")))
    }

    pub fn all_categories(&self) -> Result<String> {
        self.url("categories", &[])
    }

    pub fn stations_in_category(&self, category_id: u32) -> Result<String> {
        self.url(&format!("category/{category_id}/stations"), &[])
    }

    pub fn all_countries(&self) -> Result<String> {
        self.url("countries", &[])
    }

    pub fn stations_in_country(&self, country_code: &str) -> Result<String> {
        self.url(&format!("country/{country_code}/stations"), &[])
    }

    pub fn popular_stations(&self, page: u32, per_page: u32) -> Result<String> {
        self.url(
            "stations/popular",
            &[("page", page.to_string()), ("per_page", per_page.to_string())],
        )
    }

    pub fn recently_added_stations(&self, limit: Option<u32>) -> Result<String> {
        match limit {
            Some(limit) => self.url("stations/recent", &[("limit", limit.to_string())]),
            None => self.url("stations/recent", &[]),
        }
    }

    pub fn search(&self, query: &str) -> Result<String> {
        self.url("search", &[("query", query.to_string())])
    }

    pub fn station(&self, id: u32) -> Result<String> {
        self.url(&format!("station/{id}"), &[])
    }
}

/// Source of catalogue data for the browse handlers and the play pipeline.
pub trait StationSource: Send + Sync {
    fn categories(&self) -> Result<Vec<Category>>;
    fn stations_in_category(&self, category_id: u32) -> Result<Vec<Station>>;
    fn countries(&self) -> Result<Vec<Country>>;
    fn country_stations(&self, country_code: &str) -> Result<Vec<Station>>;
    fn popular(&self, page: u32) -> Result<Vec<Station>>;
    fn recently_added(&self, limit: Option<u32>) -> Result<Vec<Station>>;
    fn search(&self, query: &str) -> Result<Vec<Station>>;
    /// Full record of one station, including its stream renditions.
    fn station(&self, id: u32) -> Result<Option<Station>>;
}

pub struct CatalogueClient<D, P> {
    downloader: D,
    parser: P,
    urls: UrlBuilder,
    items_per_page: u32,
}

impl CatalogueClient<HttpDownloader, JsonDataParser> {
    pub fn from_config(catalogue: &CatalogueConfig, network: &NetworkConfig) -> Self {
        Self::new(
            HttpDownloader::new(network),
            JsonDataParser,
            UrlBuilder::new(&catalogue.base_url),
            catalogue.items_per_page,
        )
    }
}

impl<D: Downloader, P: DataParser> CatalogueClient<D, P> {
    pub fn new(downloader: D, parser: P, urls: UrlBuilder, items_per_page: u32) -> Self {
        Self {
            downloader,
            parser,
            urls,
            items_per_page,
        }
    }

    fn fetch_stations(&self, url: &str) -> Result<Vec<Station>> {
        let data = self.downloader.download(url)?;
        let stations = self.parser.stations(&data)?;
        debug!("catalogue: {} stations from {}", stations.len(), url);
        Ok(stations)
    }
}

impl<D: Downloader, P: DataParser> StationSource for CatalogueClient<D, P> {
    fn categories(&self) -> Result<Vec<Category>> {
        let data = self.downloader.download(&self.urls.all_categories()?)?;
        self.parser.categories(&data)
    }

    fn stations_in_category(&self, category_id: u32) -> Result<Vec<Station>> {
        self.fetch_stations(&self.urls.stations_in_category(category_id)?)
    }

    fn countries(&self) -> Result<Vec<Country>> {
        let data = self.downloader.download(&self.urls.all_countries()?)?;
        self.parser.countries(&data)
    }

    fn country_stations(&self, country_code: &str) -> Result<Vec<Station>> {
        self.fetch_stations(&self.urls.stations_in_country(country_code)?)
    }

    fn popular(&self, page: u32) -> Result<Vec<Station>> {
        self.fetch_stations(&self.urls.popular_stations(page, self.items_per_page)?)
    }

    fn recently_added(&self, limit: Option<u32>) -> Result<Vec<Station>> {
        self.fetch_stations(&self.urls.recently_added_stations(limit)?)
    }

    fn search(&self, query: &str) -> Result<Vec<Station>> {
        self.fetch_stations(&self.urls.search(query)?)
    }

    fn station(&self, id: u32) -> Result<Option<Station>> {
        let data = self.downloader.download(&self.urls.station(id)?)?;
        if data.is_empty() {
            return Ok(None);
        }
        let record: CatalogueStation = serde_json::from_slice(&data)?;
        Ok(Some(record.into()))
    }
}
