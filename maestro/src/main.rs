use args::Args;
use clap::Parser;
use config::Config;
use server::Gateway;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args.log);

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    if let Some(listen_address) = args.listen_address {
        config.server.listen_address = listen_address;
    }

    let listen_address = config.server.listen_address;
    let model_name = config.model.name.clone();

    let gateway = Gateway::from_config(config)?;
    let router = server::router(gateway);

    let listener = tokio::net::TcpListener::bind(listen_address).await?;
    log::info!("serving {model_name} on http://{listen_address}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        log::error!("failed to install ctrl-c handler: {error}");
        return;
    }

    log::info!("shutting down");
}
