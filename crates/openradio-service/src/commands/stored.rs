//! Nodes populated from the user's own stores.

use futures_util::future::{BoxFuture, FutureExt};

use super::{CommandContext, MediaItemCommand};

pub struct Favorites;

impl MediaItemCommand for Favorites {
    fn execute(&self, mut ctx: CommandContext) -> BoxFuture<'static, ()> {
        async move {
            let stations = ctx.storage.favorites.all().await;
            ctx.deliver_stations(stations, true).await;
        }
        .boxed()
    }
}

/// User-added stations, in the order the user arranged them.
pub struct Locals;

impl MediaItemCommand for Locals {
    fn execute(&self, mut ctx: CommandContext) -> BoxFuture<'static, ()> {
        async move {
            let stations = ctx.storage.locals.all().await;
            ctx.deliver_stations(stations, true).await;
        }
        .boxed()
    }
}
