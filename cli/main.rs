use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use lockstream::config::Config;
use lockstream::header::{read_header, HEADER_LEN};
use lockstream::server::{self, ServerState};
use lockstream::sizing::plaintext_size;
use lockstream::{Credential, StreamCipherPipeline, StreamSession};
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// lockstream - password-resolved file encryption and content serving
#[derive(Parser)]
#[command(name = "lockstream")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a file into a container
    Encrypt {
        /// Plaintext file
        input: PathBuf,

        /// Container to create
        output: PathBuf,

        /// Password (prompted when omitted)
        #[arg(short, long)]
        password: Option<OsString>,
    },

    /// Decrypt a container
    Decrypt {
        /// Container file
        input: PathBuf,

        /// Output file path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Candidate passwords, tried in order (prompted when omitted)
        #[arg(short, long)]
        password: Vec<OsString>,
    },

    /// Show container header information
    Inspect {
        /// Container file
        file: PathBuf,
    },

    /// Serve files over HTTP, decrypting containers on the fly
    Serve {
        /// Address to listen on (overrides config)
        #[arg(short, long)]
        bind: Option<String>,

        /// Extra passwords, registered after those from the config
        #[arg(short, long)]
        password: Vec<OsString>,
    },
}

impl Commands {
    /// Subcommand name for logging; arguments may carry passwords.
    fn name(&self) -> &'static str {
        match self {
            Commands::Encrypt { .. } => "encrypt",
            Commands::Decrypt { .. } => "decrypt",
            Commands::Inspect { .. } => "inspect",
            Commands::Serve { .. } => "serve",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Use RUST_LOG environment variable to control log level (e.g., RUST_LOG=info,lockstream=debug)
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    let cfg = Config::load_with_env(cli.config.as_deref())?;
    info!(command = cli.command.name(), "lockstream starting");

    match cli.command {
        Commands::Encrypt {
            input,
            output,
            password,
        } => cmd_encrypt(&cfg, &input, &output, password).await,

        Commands::Decrypt {
            input,
            output,
            password,
        } => cmd_decrypt(&cfg, &input, output.as_ref(), password).await,

        Commands::Inspect { file } => cmd_inspect(&file).await,

        Commands::Serve { bind, password } => cmd_serve(cfg, bind, password).await,
    }
}

/// Create a styled progress bar for file operations
fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message(message.to_string());
    pb
}

/// Drives `pb` from `session` until `operation` completes.
async fn with_progress<F, T>(pb: &ProgressBar, session: &StreamSession, operation: F) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(operation);
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            result = &mut operation => {
                pb.set_length(session.expected_size());
                pb.set_position(session.bytes_processed());
                return result;
            }
            _ = ticker.tick() => {
                pb.set_length(session.expected_size());
                pb.set_position(session.bytes_processed());
            }
        }
    }
}

fn prompt_password(prompt: &str) -> Result<Credential> {
    let password = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(Credential::from(password))
}

fn to_credentials(passwords: Vec<OsString>) -> Result<Vec<Credential>> {
    passwords
        .iter()
        .map(|p| Credential::from_os_str(p).map_err(Into::into))
        .collect()
}

/// Encrypt a file
async fn cmd_encrypt(cfg: &Config, input: &Path, output: &Path, password: Option<OsString>) -> Result<()> {
    let credential = match password {
        Some(p) => Credential::from_os_str(&p)?,
        None => {
            let first = prompt_password("Password: ")?;
            let confirm = prompt_password("Confirm password: ")?;
            if first.as_bytes() != confirm.as_bytes() {
                anyhow::bail!("passwords do not match");
            }
            first
        }
    };

    let pipeline = StreamCipherPipeline::new(cfg.chunk_size);
    let session = StreamSession::new();
    let pb = create_progress_bar("Encrypting");

    let bytes = with_progress(&pb, &session, pipeline.encrypt(input, output, &credential, &session))
        .await
        .with_context(|| format!("encrypting {:?}", input))?;

    pb.finish_with_message(format!("Encrypted {} bytes", bytes));
    println!("  {} -> {}", input.display(), output.display());
    Ok(())
}

/// Decrypt a container
async fn cmd_decrypt(
    cfg: &Config,
    input: &Path,
    output: Option<&PathBuf>,
    passwords: Vec<OsString>,
) -> Result<()> {
    let registry = cfg.build_registry();
    let credentials = if passwords.is_empty() && registry.is_empty() {
        vec![prompt_password("Password: ")?]
    } else {
        to_credentials(passwords)?
    };
    for credential in credentials {
        registry.register(credential);
    }

    let resolution = registry
        .require(input)
        .await
        .with_context(|| format!("opening {:?}", input))?;

    let pipeline = StreamCipherPipeline::new(cfg.chunk_size);
    let session = StreamSession::new();

    match output {
        Some(output_path) => {
            let pb = create_progress_bar("Decrypting");
            let bytes = with_progress(
                &pb,
                &session,
                pipeline.decrypt_to_file(input, output_path, Some(&resolution.key), &session),
            )
            .await?;
            pb.finish_with_message(format!("Decrypted {} bytes -> {:?}", bytes, output_path));
        }
        None => {
            let mut stdout = tokio::io::stdout();
            let bytes = pipeline
                .decrypt_to_sink(input, &mut stdout, Some(&resolution.key), &session)
                .await?;
            eprintln!("Decrypted {} bytes to stdout", bytes);
        }
    }

    Ok(())
}

/// Show container header information
async fn cmd_inspect(file: &Path) -> Result<()> {
    let header = read_header(file)
        .await
        .with_context(|| format!("reading header of {:?}", file))?;
    let file_len = fs::metadata(file).await?.len();

    println!("Container:       {}", file.display());
    println!("File size:       {} bytes", file_len);
    println!("Header size:     {} bytes", HEADER_LEN);
    println!("Salt size:       {} bytes", header.salt.len());
    println!("Padding marker:  {}", header.padding_marker);
    match plaintext_size(file_len, header.padding_marker) {
        Some(size) => println!("Plaintext size:  {} bytes", size),
        None => println!("Plaintext size:  inconsistent (not a valid container?)"),
    }

    Ok(())
}

/// Serve files over HTTP
async fn cmd_serve(mut cfg: Config, bind: Option<String>, passwords: Vec<OsString>) -> Result<()> {
    if let Some(bind) = bind {
        cfg.bind_addr = bind;
        cfg.validate()?;
    }

    let registry = cfg.build_registry();
    for credential in to_credentials(passwords)? {
        registry.register(credential);
    }

    let state = ServerState::new(Arc::new(registry), StreamCipherPipeline::new(cfg.chunk_size));
    server::serve(cfg.bind_addr.clone(), state).await
}
