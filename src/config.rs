use std::env;
use std::path::PathBuf;

use anyhow::Context;

const DEFAULT_PORT: u16 = 9090;
const DEFAULT_HASH_ROUNDS: u32 = 10_000;
const DEFAULT_UPLOAD_DIR: &str = "uploads";

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub store_uri: String,
    pub token_secret: String,
    pub hash_rounds: u32,
    pub upload_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let http_port = match env::var("HTTP_PORT") {
            Ok(raw) => raw.parse().context("HTTP_PORT must be a port number")?,
            Err(_) => DEFAULT_PORT,
        };
        let store_uri = env::var("MONGODB_CONNECTION_STRING")
            .context("MONGODB_CONNECTION_STRING must be set")?;
        let token_secret = env::var("JWT_KEY").context("JWT_KEY must be set")?;
        let hash_rounds = match env::var("HASHROUNDS") {
            Ok(raw) => raw
                .parse()
                .context("HASHROUNDS must be a positive integer")?,
            Err(_) => DEFAULT_HASH_ROUNDS,
        };
        let upload_dir = env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_UPLOAD_DIR));

        Ok(Config {
            http_port,
            store_uri,
            token_secret,
            hash_rounds,
            upload_dir,
        })
    }
}
