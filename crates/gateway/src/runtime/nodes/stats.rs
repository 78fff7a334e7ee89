//! In-conversation operator stats.

use super::super::graph::RouteToken;
use super::super::metrics_view;
use super::super::TurnCtx;

pub(super) async fn provide(ctx: &mut TurnCtx<'_>) -> RouteToken {
    let stats = metrics_view::gather(
        &ctx.deps.metrics,
        ctx.deps.store.as_ref(),
        &ctx.deps.cache,
    )
    .await;

    match serde_json::to_string_pretty(&stats) {
        Ok(rendered) => ctx.reply(format!("Current agent stats:\n{rendered}")),
        Err(_) => ctx.reply("Stats are unavailable right now."),
    }
    RouteToken::Done
}
