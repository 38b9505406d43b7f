//! Nodes populated from the remote station catalogue.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use tracing::{debug, warn};

use super::{CommandContext, MediaItemCommand};
use crate::metadata::{self, category_entry, country_entry};

pub struct AllCategories;

impl MediaItemCommand for AllCategories {
    fn execute(&self, mut ctx: CommandContext) -> BoxFuture<'static, ()> {
        async move {
            let categories = ctx
                .fetch("categories", |source| source.categories())
                .await
                .unwrap_or_default();
            if categories.is_empty() {
                ctx.deliver_empty().await;
                return;
            }
            ctx.result
                .send(categories.iter().map(category_entry).collect());
        }
        .boxed()
    }
}

pub struct StationsInCategory;

impl MediaItemCommand for StationsInCategory {
    fn execute(&self, mut ctx: CommandContext) -> BoxFuture<'static, ()> {
        async move {
            if let Some(cached) = ctx.cached_stations().await {
                ctx.deliver_stations(cached, false).await;
                return;
            }
            let Ok(category_id) = ctx.param.parse::<u32>() else {
                warn!("browse: bad category id in {}", ctx.parent_id);
                ctx.deliver_empty().await;
                return;
            };
            let stations = ctx
                .fetch("category stations", move |source| {
                    source.stations_in_category(category_id)
                })
                .await
                .unwrap_or_default();
            ctx.deliver_stations(stations, false).await;
        }
        .boxed()
    }
}

pub struct CountriesList;

impl MediaItemCommand for CountriesList {
    fn execute(&self, mut ctx: CommandContext) -> BoxFuture<'static, ()> {
        async move {
            let mut countries = ctx
                .fetch("countries", |source| source.countries())
                .await
                .unwrap_or_default();
            if countries.is_empty() {
                ctx.deliver_empty().await;
                return;
            }
            countries.sort_by(|a, b| a.name.cmp(&b.name));
            ctx.result.send(countries.iter().map(country_entry).collect());
        }
        .boxed()
    }
}

/// Stations of the country named in the node id, or of the listener's
/// country when the id carries none.
pub struct CountryStations;

impl MediaItemCommand for CountryStations {
    fn execute(&self, mut ctx: CommandContext) -> BoxFuture<'static, ()> {
        async move {
            if let Some(cached) = ctx.cached_stations().await {
                ctx.deliver_stations(cached, false).await;
                return;
            }
            let code = if ctx.param.is_empty() {
                ctx.country_code.clone()
            } else {
                ctx.param.clone()
            };
            if code.is_empty() {
                warn!("browse: country unknown, nothing to list");
                ctx.deliver_empty().await;
                return;
            }
            let stations = ctx
                .fetch("country stations", move |source| source.country_stations(&code))
                .await
                .unwrap_or_default();
            ctx.deliver_stations(stations, false).await;
        }
        .boxed()
    }
}

/// Search results for the query carried in the node id.
pub struct Search;

impl MediaItemCommand for Search {
    fn execute(&self, mut ctx: CommandContext) -> BoxFuture<'static, ()> {
        async move {
            let query = ctx.param.trim().to_string();
            let stations = if query.is_empty() {
                Vec::new()
            } else {
                ctx.fetch("search", move |source| source.search(&query))
                    .await
                    .unwrap_or_default()
            };
            if stations.is_empty() {
                ctx.catalogue.lock().await.replace_stations(Vec::new());
                ctx.result.send(Vec::new());
                ctx.notice(metadata::NO_SEARCH_RESULTS).await;
                return;
            }
            ctx.deliver_stations(stations, true).await;
        }
        .boxed()
    }
}

/// Popular stations, one page per request.  Browsing the node again moves
/// to the next page; coming from another node starts over.
#[derive(Default)]
pub struct Popular {
    page: Arc<AtomicU32>,
}

impl MediaItemCommand for Popular {
    fn execute(&self, mut ctx: CommandContext) -> BoxFuture<'static, ()> {
        let page = if ctx.same_catalogue {
            self.page.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.page.store(0, Ordering::SeqCst);
            0
        };
        async move {
            debug!("browse: popular page {}", page);
            let stations = ctx
                .fetch("popular", move |source| source.popular(page))
                .await
                .unwrap_or_default();
            ctx.deliver_stations(stations, false).await;
        }
        .boxed()
    }
}

/// Recently added stations; car clients get a shorter list.
pub struct RecentlyAdded;

impl MediaItemCommand for RecentlyAdded {
    fn execute(&self, mut ctx: CommandContext) -> BoxFuture<'static, ()> {
        async move {
            if let Some(cached) = ctx.cached_stations().await {
                ctx.deliver_stations(cached, false).await;
                return;
            }
            let limit = ctx.car_mode.then_some(ctx.car_recent_limit);
            let stations = ctx
                .fetch("recently added", move |source| source.recently_added(limit))
                .await
                .unwrap_or_default();
            ctx.deliver_stations(stations, false).await;
        }
        .boxed()
    }
}
