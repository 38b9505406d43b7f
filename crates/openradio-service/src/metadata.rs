//! Builders for browse entries and now-playing metadata, plus the user-facing
//! strings the session publishes.

use openradio_proto::media_id::NodeKind;
use openradio_proto::protocol::{EntryExtras, EntryKind, MediaEntry, NowPlaying};
use openradio_proto::station::{Category, Country, Station, UNSORTED};

/// Stream title shown while the engine buffers.  Never stored as a real title.
pub const BUFFERING_TITLE: &str = "Buffering...";

pub const NO_DATA: &str = "No data available";
pub const NO_SEARCH_RESULTS: &str = "No search results";
pub const MEDIA_PLAYER_ERROR: &str = "Media player error";
pub const CAN_NOT_SKIP: &str = "Can not skip";
pub const NO_METADATA: &str = "No metadata available";
pub const NO_CONNECTIVITY: &str = "No network connection";
pub const CATEGORY_EMPTY: &str = "Category is empty";
pub const FAVORITE_ACTION_NAME: &str = "Favorite";
pub const QUEUE_TITLE: &str = "Queue";

/// Playable entry for a station.
pub fn station_entry(station: &Station, is_favorite: bool) -> MediaEntry {
    MediaEntry {
        media_id: station.media_id(),
        title: station.name.clone(),
        subtitle: station.country.clone(),
        icon_url: station.artwork_url().map(str::to_string),
        kind: EntryKind::Playable,
        extras: EntryExtras {
            is_favorite,
            is_local: station.is_local,
            sort_id: (station.sort_id != UNSORTED).then_some(station.sort_id),
            ..EntryExtras::default()
        },
    }
}

pub fn browsable(media_id: impl Into<String>, title: &str, subtitle: &str) -> MediaEntry {
    MediaEntry {
        media_id: media_id.into(),
        title: title.to_string(),
        subtitle: subtitle.to_string(),
        icon_url: None,
        kind: EntryKind::Browsable,
        extras: EntryExtras::default(),
    }
}

/// Placeholder delivered in place of an empty child list.
pub fn empty_category_entry(parent_id: &str) -> MediaEntry {
    browsable(parent_id, CATEGORY_EMPTY, "")
}

pub fn category_entry(category: &Category) -> MediaEntry {
    let title = if category.title.is_empty() {
        &category.name
    } else {
        &category.title
    };
    browsable(
        NodeKind::StationsInCategory.with_param(&category.id.to_string()),
        title,
        &category.description,
    )
}

pub fn country_entry(country: &Country) -> MediaEntry {
    browsable(
        NodeKind::CountryStations.with_param(&country.code),
        &country.name,
        &country.code,
    )
}

/// Sort key placing assigned sort ids first, in ascending order.
pub fn sort_rank(sort_id: i32) -> (u8, i32) {
    if sort_id >= 0 {
        (0, sort_id)
    } else {
        (1, 0)
    }
}

/// Metadata for the station on air.  A stream title replaces the country as
/// subtitle.
pub fn now_playing(station: &Station, stream_title: &str) -> NowPlaying {
    let subtitle = if stream_title.is_empty() {
        station.country.clone()
    } else {
        stream_title.to_string()
    };
    NowPlaying {
        media_id: station.media_id(),
        title: station.name.clone(),
        subtitle,
        genre: station.genre.clone(),
        icon_url: station.artwork_url().map(str::to_string),
        website: station.website.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station() -> Station {
        Station {
            id: 4,
            name: "Four".into(),
            country: "PL".into(),
            genre: "rock".into(),
            ..Station::default()
        }
    }

    #[test]
    fn test_stream_title_replaces_country() {
        assert_eq!(now_playing(&station(), "").subtitle, "PL");
        assert_eq!(now_playing(&station(), "Artist - Song").subtitle, "Artist - Song");
    }

    #[test]
    fn test_sort_id_ordering_keeps_unsorted_last() {
        let mut stations: Vec<Station> = [(1, UNSORTED), (2, 5), (3, 1), (4, UNSORTED)]
            .into_iter()
            .map(|(id, sort_id)| Station {
                id,
                sort_id,
                ..Station::default()
            })
            .collect();
        stations.sort_by_key(|s| sort_rank(s.sort_id));
        let ids: Vec<u32> = stations.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![3, 2, 1, 4]);
    }

    #[test]
    fn test_country_entry_browses_country_stations() {
        let entry = country_entry(&Country {
            code: "FR".into(),
            name: "France".into(),
        });
        assert_eq!(entry.media_id, "__COUNTRY_STATIONS__FR");
        assert_eq!(entry.kind, EntryKind::Browsable);
        assert_eq!(entry.subtitle, "FR");
    }
}
