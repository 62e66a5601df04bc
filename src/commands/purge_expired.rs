use tracing::info;

use crate::clock::Clock;
use crate::controllers::paste;
use crate::App;

pub async fn run(app: App) -> anyhow::Result<()> {
    let purged = paste::purge_unavailable(&app.store, Clock::System).await?;
    info!("purge finished, {purged} pastes removed");
    Ok(())
}
