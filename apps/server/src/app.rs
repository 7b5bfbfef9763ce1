//! Server lifecycle: start, wait for Ctrl-C, shut down.

use std::sync::Arc;

use ferry_store::ChunkStore;
use ferry_upload_server::UploadServer;

use crate::config::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = config.store();
    tokio::fs::create_dir_all(&store.public_dir).await?;
    tokio::fs::create_dir_all(&store.temp_dir).await?;

    let server = UploadServer::new(config.server(), ChunkStore::new(store));
    let runner = Arc::clone(&server);
    let mut handle = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("received Ctrl-C, shutting down");
            server.shutdown();
            handle.await??;
        }
        // Bind failures end the server task on their own.
        result = &mut handle => result??,
    }
    Ok(())
}
