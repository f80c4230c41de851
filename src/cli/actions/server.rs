use crate::api;
use crate::cli::actions::Action;
use crate::gate::token::TokenFormat;
use anyhow::Result;
use secrecy::SecretString;

/// Validated server configuration produced by `dispatch::handler`.
#[derive(Debug, Clone)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub secret: SecretString,
    pub extractor_url: String,
    pub extractor_timeout: u64,
    pub threshold: f32,
    pub token_ttl: i64,
    pub token_format: TokenFormat,
}

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => api::new(args).await,
    }
}
