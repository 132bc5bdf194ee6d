use imagematch::{create_router, init, AppState, Config, Result};

#[tokio::main]
async fn main() -> Result<()> {
    init();

    let config = Config::from_env()?;
    let addr = config.bind_addr;
    let app = create_router(config.max_image_bytes);

    let state = AppState::new(config)?;
    log::info!(
        "Backends {:?}, search service {}",
        state.config.backends,
        state.search.base_url()
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Server listening on {}", addr);

    axum::serve(listener, app.with_state(state)).await?;

    Ok(())
}
