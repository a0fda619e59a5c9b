// src/cli/discover.rs
// Handshake-only discovery: print capabilities and exit

use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::config::{BellwetherConfig, EnvCredentialResolver};
use crate::discovery::{discover, get_prompt, read_resource};
use crate::error::Result;
use crate::session::Session;
use crate::{report, transport};

/// `bellwether discover`: perform the handshake and list the server's
/// surface. With `--deep`, also fetch the first prompt and read the first
/// resource to confirm those endpoints answer.
pub async fn run_discover(config_path: &Path, deep: bool) -> Result<i32> {
    let config = BellwetherConfig::load(config_path)?;
    let resolver = EnvCredentialResolver::new(None);

    let (transport, events) = transport::connect(&config.server, &resolver).await?;
    let session = Session::new(transport, events);
    let timeout = Duration::from_millis(config.run.request_timeout_ms);

    let result = discover(&session, timeout).await;
    let discovered = match result {
        Ok(discovered) => discovered,
        Err(e) => {
            session.close().await;
            return Err(e);
        }
    };

    print!("{}", report::render_discovery(&discovered));

    if deep {
        if let Some(prompt) = discovered.prompts.first() {
            match get_prompt(&session, &prompt.name, timeout).await {
                Ok(_) => println!("prompts/get '{}' answered", prompt.name),
                Err(e) => println!("prompts/get '{}' failed: {}", prompt.name, e),
            }
        }
        if let Some(resource) = discovered.resources.first() {
            match read_resource(&session, &resource.uri, timeout).await {
                Ok(_) => println!("resources/read '{}' answered", resource.uri),
                Err(e) => println!("resources/read '{}' failed: {}", resource.uri, e),
            }
        }
    }

    debug!("closing discovery session");
    session.close().await;
    Ok(0)
}
