use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use lazyfs::cache::CacheStore;
use lazyfs::cli::{Cli, CommandName};
use lazyfs::fsadapter::{self, LazyFs};
use lazyfs::gate::FetchGate;
use lazyfs::index::IndexClient;
use lazyfs::listing;
use lazyfs::tree::LazyFolder;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if cli.fuse_version == "fuse" {
        tracing::warn!("--fuse-version=fuse requested; serving the fuse3-equivalent adapter anyway");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> lazyfs::Result<()> {
    let gate = FetchGate::new(cli.fetch_limit);
    let http = reqwest::Client::builder()
        .build()
        .expect("building the HTTP client cannot fail with no custom TLS config");
    let index = Arc::new(IndexClient::new(http.clone(), gate.clone(), &cli.root_url)?);
    let cache = Arc::new(CacheStore::new(cli.cache_dir.clone(), http, gate));
    let root = LazyFolder::new_root(cli.root_url.clone());

    match cli.command {
        CommandName::List => {
            let path = cli.arg.as_deref().unwrap_or("");
            let entries = listing::list(&root, path, &index).await?;
            for entry in entries {
                print_entry(&entry);
            }
        }
        CommandName::ListRecursive => {
            let path = cli.arg.as_deref().unwrap_or("");
            let entries = listing::list_recursive(&root, path, &index).await?;
            for (logical_path, entry) in entries {
                if entry.is_folder {
                    println!("{logical_path}/");
                } else if entry.special.is_some() {
                    println!("{logical_path}\t{}", entry.name);
                } else {
                    println!("{logical_path}\t{}", listing::human_size(entry.size_approx.unwrap_or(0)));
                }
            }
        }
        CommandName::DuApproximate => {
            let path = cli.arg.as_deref().unwrap_or("");
            let total = listing::du_approximate(&root, path, &index).await?;
            let label = if path.is_empty() { "folder" } else { path };
            println!("{label}  {}", listing::mib_string(total));
        }
        CommandName::PrefetchMeta => {
            let path = cli.arg.as_deref().unwrap_or("");
            listing::prefetch_meta(&root, path, &index).await?;
        }
        CommandName::PrefetchFiles => {
            let path = cli.arg.as_deref().unwrap_or("");
            listing::prefetch_files(&root, path, &index, &cache).await?;
        }
        CommandName::Mount => {
            let (subtree_path, mountpoint) = resolve_mount_args(cli.arg, cli.mountpoint)?;
            let root = match subtree_path {
                Some(path) => lazyfs::walk::walk_to_folder(&root, &path, &index).await?,
                None => root,
            };
            let runtime = tokio::runtime::Handle::current();
            let ttl = std::time::Duration::from_secs(cli.ttl_secs);
            let fs = LazyFs::new(root, index, cache, runtime, ttl, cli.max_open_handles);
            tracing::info!(mountpoint = %mountpoint.display(), "mounting");
            let result = tokio::task::spawn_blocking(move || fsadapter::mount(fs, &mountpoint)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(lazyfs::Error::Mount(e.to_string())),
                Err(e) => return Err(lazyfs::Error::Mount(e.to_string())),
            }
        }
    }
    Ok(())
}

/// `mount`'s single pinned positional (`arg`) is the mountpoint in the
/// common case. When a second positional follows, the first is instead a
/// subtree path and the second is the mountpoint (SPEC_FULL.md §5).
fn resolve_mount_args(arg: Option<String>, mountpoint: Option<PathBuf>) -> lazyfs::Result<(Option<String>, PathBuf)> {
    match (arg, mountpoint) {
        (Some(path), Some(mountpoint)) => Ok((Some(path), mountpoint)),
        (Some(arg), None) => Ok((None, PathBuf::from(arg))),
        (None, _) => Err(lazyfs::Error::Mount("mount requires a mountpoint argument".to_string())),
    }
}

fn print_entry(entry: &listing::Entry) {
    println!("{}", listing::format_entry(entry));
}
