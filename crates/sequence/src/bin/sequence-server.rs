//! Runs the Sequence lobby server.
//!
//! Environment:
//! - `RUST_LOG`: log filter, default `info`
//! - `SEQUENCE_BIND`: listen address, default `127.0.0.1:42069`
//! - `SEQUENCE_LOBBY`: code of a lobby to open at startup
//! - `SEQUENCE_SEATS`: seat count of that lobby, default 2

use std::env;

use sequence::prelude::*;

#[tokio::main]
async fn main() -> Result<(), SequenceError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let bind = env::var("SEQUENCE_BIND").unwrap_or_else(|_| sequence::DEFAULT_BIND.to_string());
    let server = SequenceServerBuilder::new()
        .bind(&bind)
        .build::<OpeningTable, _>(CookieAuthenticator::default())
        .await?;
    tracing::info!(addr = %bind, "listening");

    if let Ok(raw) = env::var("SEQUENCE_LOBBY") {
        let code = LobbyCode::parse(&raw)?;
        let defaults = Settings::default();
        let seats = match env::var("SEQUENCE_SEATS") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "SEQUENCE_SEATS is not a number, using default");
                defaults.num_of_players
            }),
            Err(_) => defaults.num_of_players,
        };
        let settings = Settings {
            num_of_players: seats,
            ..defaults
        };
        let code = server.handle().create_lobby(settings, Some(code)).await?;
        tracing::info!(lobby = %code, seats, "startup lobby open");
    }

    server.run().await
}
