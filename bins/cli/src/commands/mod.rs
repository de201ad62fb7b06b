//! CLI command handlers.

pub mod config;
pub mod daemon;
pub mod sync;

pub use config::{run_config_check, run_config_show};
pub use daemon::run_daemon;
pub use sync::{run_ensure_collection, run_sync};

use kb_sync_shared::RequestContext;
use tokio::task::JoinHandle;

/// Cancel `ctx` on Ctrl-C. Abort the handle once the command is done.
pub(crate) fn cancel_on_ctrl_c(ctx: &RequestContext) -> JoinHandle<()> {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; finishing the current batch");
            ctx.cancel();
        }
    })
}
