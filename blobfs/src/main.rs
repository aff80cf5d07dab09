use anyhow::{Context, Result};
use blobfs::cadapter::localfs::LocalFsBackend;
use blobfs::cadapter::s3::{S3Backend, S3Config};
use blobfs::cadapter::ObjectClient;
use blobfs::config::FsConfig;
use blobfs::vfs::{ObjectFs, OpenOptions};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    Local,
    S3,
}

#[derive(Parser, Debug)]
#[command(name = "blobfs", version, about = "File operations on top of an object store", long_about = None)]
struct Cli {
    /// Object store backend
    #[arg(long, env = "BLOBFS_BACKEND", value_enum, default_value_t = Backend::Local)]
    backend: Backend,

    /// Root directory of the local backend (one sub-directory per container)
    #[arg(long, env = "BLOBFS_ROOT")]
    root: Option<PathBuf>,

    /// S3 endpoint, e.g. a MinIO gateway
    #[arg(long, env = "BLOBFS_S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    /// S3 region
    #[arg(long, env = "BLOBFS_S3_REGION", default_value = "us-east-1")]
    s3_region: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "List a directory: blobfs ls bucket/dir")]
    Ls {
        #[arg(value_name = "PATH")]
        path: String,
    },
    #[command(about = "Print a file to stdout")]
    Cat {
        #[arg(value_name = "PATH")]
        path: String,
    },
    #[command(about = "Upload a local file: blobfs put ./a.txt bucket/a.txt")]
    Put {
        #[arg(value_name = "LOCAL")]
        local: PathBuf,
        #[arg(value_name = "PATH")]
        path: String,
    },
    #[command(about = "Overwrite bytes in place: blobfs write-at bucket/a.txt 3 text")]
    WriteAt {
        #[arg(value_name = "PATH")]
        path: String,
        #[arg(value_name = "OFFSET")]
        offset: u64,
        #[arg(value_name = "DATA")]
        data: String,
    },
    #[command(about = "Create a directory")]
    Mkdir {
        #[arg(value_name = "PATH")]
        path: String,
        /// Create missing parents as well
        #[arg(short, long)]
        parents: bool,
    },
    #[command(about = "Remove a file or an empty directory")]
    Rm {
        #[arg(value_name = "PATH")]
        path: String,
        /// Remove a directory and everything below it
        #[arg(short, long)]
        recursive: bool,
    },
    #[command(about = "Rename a file (copy, then delete)")]
    Mv {
        #[arg(value_name = "FROM")]
        from: String,
        #[arg(value_name = "TO")]
        to: String,
    },
    #[command(about = "Show file or directory attributes")]
    Stat {
        #[arg(value_name = "PATH")]
        path: String,
    },
    #[command(about = "Shrink a file, or grow it padded with spaces")]
    Truncate {
        #[arg(value_name = "PATH")]
        path: String,
        #[arg(value_name = "SIZE", allow_hyphen_values = true)]
        size: i64,
    },
}

async fn build_fs(cli: &Cli) -> Result<ObjectFs> {
    let client = match cli.backend {
        Backend::Local => {
            let root = match &cli.root {
                Some(root) => root.clone(),
                None => dirs::data_dir()
                    .context("Failed to get user data directory")?
                    .join("blobfs"),
            };
            tokio::fs::create_dir_all(&root)
                .await
                .with_context(|| format!("Failed to create backend root at {root:?}"))?;
            tracing::info!(root = %root.display(), "using local backend");
            ObjectClient::new(LocalFsBackend::new(root))
        }
        Backend::S3 => {
            let config = S3Config {
                region: cli.s3_region.clone(),
                force_path_style: cli.s3_endpoint.is_some(),
                endpoint: cli.s3_endpoint.clone(),
                ..S3Config::default()
            };
            tracing::info!(region = %config.region, endpoint = ?config.endpoint, "using s3 backend");
            ObjectClient::new(S3Backend::new(config).await)
        }
    };
    Ok(ObjectFs::new(client, FsConfig::default()))
}

async fn run(fs: &ObjectFs, command: Commands) -> Result<()> {
    match command {
        Commands::Ls { path } => {
            for info in fs.read_dir(&path).await? {
                let kind = if info.is_dir() { 'd' } else { '-' };
                println!("{kind} {:o} {:>10} {}", info.permissions(), info.size, info.name);
            }
        }
        Commands::Cat { path } => {
            let mut file = fs.open(&path).await?;
            let mut data = Vec::new();
            file.read_to_end(&mut data).await?;
            file.close().await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await?;
            stdout.flush().await?;
        }
        Commands::Put { local, path } => {
            let data = tokio::fs::read(&local)
                .await
                .with_context(|| format!("Failed to read {local:?}"))?;
            let mut file = fs.create(&path).await?;
            file.write_all(&data).await?;
            file.close().await?;
            println!("{path}: {} bytes", data.len());
        }
        Commands::WriteAt { path, offset, data } => {
            let mut file = fs
                .open_file(&path, OpenOptions::new().write(true).create(true))
                .await?;
            file.write_at(data.as_bytes(), offset).await?;
            file.close().await?;
        }
        Commands::Mkdir { path, parents } => {
            if parents {
                fs.mkdir_all(&path).await?;
            } else {
                fs.mkdir(&path).await?;
            }
        }
        Commands::Rm { path, recursive } => {
            if recursive {
                fs.remove_all(&path).await?;
            } else {
                fs.remove(&path).await?;
            }
        }
        Commands::Mv { from, to } => fs.rename(&from, &to).await?,
        Commands::Stat { path } => {
            let info = fs.stat(&path).await?;
            let modified = info
                .modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            println!("name:     {}", info.name);
            println!("type:     {}", if info.is_dir() { "directory" } else { "file" });
            println!("size:     {}", info.size);
            println!("mode:     {:o}", info.permissions());
            println!("modified: {modified}");
        }
        Commands::Truncate { path, size } => {
            let mut file = fs
                .open_file(&path, OpenOptions::new().write(true))
                .await?;
            file.truncate(size).await?;
            file.close().await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let fs = build_fs(&cli).await?;
    run(&fs, cli.command).await
}
