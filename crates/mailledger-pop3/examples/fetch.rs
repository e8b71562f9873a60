//! Lists a maildrop and prints the headers of each message.
//!
//! ```text
//! POP3_PASSWORD=secret cargo run --example fetch -- pop.example.com bob
//! ```
//!
//! Set `RUST_LOG=mailledger_pop3=trace` to see the protocol exchange.

use std::env;

use mailledger_pop3::auth::{ClientProfile, StaticCredentials, create_session};
use mailledger_pop3::{Capability, Config, TlsUpgrader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> mailledger_pop3::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fetch=info,mailledger_pop3=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let username = args.next().unwrap_or_else(|| "anonymous".to_string());
    let password = env::var("POP3_PASSWORD").unwrap_or_default();

    let profile = ClientProfile::new(Config::new(&host))
        .username(&username)
        .sasl_mechanisms(["CRAM-MD5", "PLAIN", "LOGIN"]);
    let credentials = StaticCredentials::new(&username, password);

    let session = create_session(&profile, &credentials, &TlsUpgrader::new()).await?;
    info!(authority = %session.authority(), "logged in");

    let listings = session.list().await?.into_value().unwrap_or_default();
    info!(count = listings.len(), "maildrop listed");

    let can_top = session.capabilities().has(Capability::TOP);
    for listing in listings {
        let Ok(number) = u32::try_from(listing.message_number) else {
            continue;
        };
        println!("--- message {number} ({} octets)", listing.size);
        if can_top {
            if let Some(headers) = session.top(number, 0).await?.into_value() {
                print!("{}", String::from_utf8_lossy(&headers));
            }
        }
    }

    session.quit().await?;
    Ok(())
}
