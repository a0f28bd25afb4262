use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

mod backup;
mod config;
mod manifest;
mod source;
mod storage;
mod utils;

#[cfg(test)]
mod test_support;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<String>,

    /// VK user whose photos are backed up
    #[arg(short, long)]
    user_id: Option<String>,

    /// Album to fetch photos from
    #[arg(short, long)]
    album: Option<String>,

    /// Number of photos to back up
    #[arg(short = 'n', long)]
    count: Option<u32>,

    /// Where to write the manifest of transferred photos
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Fail on missing values instead of asking for them
    #[arg(long)]
    no_prompt: bool,
}

const APP_DIR: &str = "photo-backup";
const CONFIG_FILE_NAME: &str = "config.toml";

/// First `<base>/photo-backup/config.toml` that exists.
fn find_config(bases: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    bases
        .into_iter()
        .map(|base| base.join(APP_DIR).join(CONFIG_FILE_NAME))
        .find(|path| path.exists())
}

fn get_config_path(args: &Args) -> Option<String> {
    if let Some(path) = &args.config {
        return Some(path.clone());
    }

    if let Ok(path) = std::env::var("CONFIG_FILE") {
        return Some(path);
    }

    let xdg = std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from);
    let home = dirs::home_dir().map(|home| home.join(".config"));
    find_config(xdg.into_iter().chain(home)).map(|path| path.display().to_string())
}

fn load_config(args: &Args) -> Result<config::Config> {
    let mut config = match get_config_path(args) {
        Some(path) => config::Config::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => config::Config::default(),
    };

    if let Some(user_id) = &args.user_id {
        config.vk.user_id = Some(user_id.clone());
    }
    if let Some(album) = &args.album {
        config.vk.album_id = Some(album.clone());
    }
    if let Some(count) = args.count {
        config.vk.count = Some(count);
    }
    if let Some(manifest) = &args.manifest {
        config.transfer.manifest_path = manifest.clone();
    }
    config.apply_env(|key| std::env::var(key).ok());

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(&args)?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    if config.get_logging_format() == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    if let Some(path) = get_config_path(&args) {
        info!("Loaded config from: {}", path);
    }

    let stdin = std::io::stdin();
    config::Prompter::new(stdin.lock(), std::io::stdout(), !args.no_prompt)
        .fill_missing(&mut config)?;
    config.validate()?;

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .context("Failed to create HTTP client")?;

    info!(
        "Backing up {} photos of user {} from album {}",
        config.count(),
        config.vk.user_id.as_deref().unwrap_or_default(),
        config.album_id()
    );

    let report = backup::BackupJob::from_config(&config, http)?.run().await?;
    println!(
        "Photo information saved to {} ({} photos)",
        config.transfer.manifest_path.display(),
        report.entries.len()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_config_wins() {
        let args = Args::parse_from(["photo-backup", "--config", "custom.toml"]);

        assert_eq!(get_config_path(&args).as_deref(), Some("custom.toml"));
    }

    #[test]
    fn test_find_config_takes_first_existing_base() {
        let empty = TempDir::new().unwrap();
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        for dir in [&first, &second] {
            std::fs::create_dir_all(dir.path().join(APP_DIR)).unwrap();
            std::fs::write(dir.path().join(APP_DIR).join(CONFIG_FILE_NAME), "").unwrap();
        }

        let found = find_config([
            empty.path().to_path_buf(),
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ]);

        assert_eq!(found, Some(first.path().join("photo-backup").join("config.toml")));
        assert_eq!(find_config([empty.path().to_path_buf()]), None);
    }
}
