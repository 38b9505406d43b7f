use futures_util::future::{BoxFuture, FutureExt};
use openradio_proto::media_id::NodeKind;
use openradio_proto::protocol::MediaEntry;
use tracing::info;

use super::{CommandContext, MediaItemCommand};
use crate::core::ServiceEvent;
use crate::metadata::{browsable, station_entry};

/// Top level of the tree.  After delivering it hands the latest played
/// station to the core, which only starts it for non-car clients.
pub struct Root;

impl MediaItemCommand for Root {
    fn execute(&self, mut ctx: CommandContext) -> BoxFuture<'static, ()> {
        async move {
            let latest = ctx.storage.latest.get().await;
            let mut entries: Vec<MediaEntry> = Vec::new();

            {
                let mut catalogue = ctx.catalogue.lock().await;
                catalogue.replace_stations(Vec::new());
                if let Some(latest) = &latest {
                    catalogue.add_station(latest.clone());
                }
            }

            if let Some(latest) = latest.as_ref().filter(|_| ctx.car_mode) {
                if latest.stream_url().is_some() {
                    let is_favorite = ctx.storage.favorites.contains(&latest.media_id()).await;
                    let mut entry = station_entry(latest, is_favorite);
                    entry.extras.is_last_played = true;
                    entries.push(entry);
                }
            }

            if !ctx.storage.favorites.is_empty().await {
                entries.push(browsable(NodeKind::Favorites.prefix(), "Favorites", ""));
            }
            entries.push(browsable(
                NodeKind::RecentlyAdded.prefix(),
                "Recently added",
                "",
            ));
            entries.push(browsable(NodeKind::Popular.prefix(), "Popular", ""));

            if !ctx.car_mode {
                entries.push(browsable(
                    NodeKind::AllCategories.prefix(),
                    "All categories",
                    "",
                ));
                entries.push(browsable(NodeKind::CountriesList.prefix(), "Countries", ""));
                if !ctx.country_code.is_empty() {
                    entries.push(browsable(
                        NodeKind::CountryStations.with_param(&ctx.country_code),
                        "Country stations",
                        &ctx.country_code,
                    ));
                }
            }

            if !ctx.storage.locals.is_empty().await {
                entries.push(browsable(NodeKind::Locals.prefix(), "Local stations", ""));
            }

            ctx.result.send(entries);

            if let Some(latest) = latest {
                info!(
                    "root: resuming latest station {} (car mode {})",
                    latest.id, ctx.car_mode
                );
                let _ = ctx
                    .events
                    .send(ServiceEvent::PlayLatest {
                        media_id: latest.media_id(),
                        play_when_ready: !ctx.car_mode,
                    })
                    .await;
            }
        }
        .boxed()
    }
}
