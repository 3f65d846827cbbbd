use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{eyre, Result};
use fragments_convert::ConvertOptions;
use fragments_core::{
    hash_identity, FragmentListing, FragmentStore, OwnerId, TypeRegistry, DEFAULT_MAX_BODY_BYTES,
};
use fragments_proto::{
    ok, DeletedBody, ErrorResponse, FormatsBody, FragmentBody, FragmentInfo, ListBody,
};
use fragments_service::{FragmentService, ServiceError, ServiceOptions};
use fragments_storage_ephemeral::EphemeralStorage;
use fragments_storage_local::LocalStorage;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_ROOT: &str = "./fragments-data";

#[derive(Clone, Debug, ValueEnum, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
enum Backend {
    Local,
    Ephemeral,
}

#[derive(Parser, Debug)]
#[command(name = "fragments", version, about = "Store, read, and convert user-owned fragments")]
struct Cli {
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[arg(long, global = true)]
    config: Option<String>,
    #[arg(long, global = true, value_enum)]
    backend: Option<Backend>,
    #[arg(long, global = true)]
    root: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a new fragment from --file or stdin.
    Create(CreateArgs),
    List(ListArgs),
    /// Metadata and available formats.
    Info(IdArgs),
    /// Fragment data; `<id>.<ext>` converts to the type the extension names.
    Get(GetArgs),
    /// Replace a fragment's data. The type must match the stored type.
    Update(UpdateArgs),
    Delete(IdArgs),
    /// Types a given type can be converted to.
    Formats(FormatsArgs),
}

#[derive(Args, Debug)]
struct UserArg {
    /// Raw user identity; hashed before use and never stored.
    #[arg(long, env = "FRAGMENTS_USER", hide_env_values = true)]
    user: String,
}

#[derive(Args, Debug)]
struct CreateArgs {
    #[command(flatten)]
    user: UserArg,
    #[arg(long = "type", value_name = "CONTENT_TYPE")]
    media_type: String,
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ListArgs {
    #[command(flatten)]
    user: UserArg,
    #[arg(long, default_value_t = false)]
    expand: bool,
}

#[derive(Args, Debug)]
struct IdArgs {
    #[command(flatten)]
    user: UserArg,
    id: String,
}

#[derive(Args, Debug)]
struct GetArgs {
    #[command(flatten)]
    user: UserArg,
    #[arg(value_name = "ID[.EXT]")]
    id: String,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct UpdateArgs {
    #[command(flatten)]
    user: UserArg,
    id: String,
    #[arg(long = "type", value_name = "CONTENT_TYPE")]
    media_type: String,
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct FormatsArgs {
    #[arg(value_name = "CONTENT_TYPE")]
    media_type: String,
}

impl Commands {
    /// `Some(source)` for commands that upload data; `None` source is stdin.
    fn body_source(&self) -> Option<Option<&Path>> {
        match self {
            Commands::Create(a) => Some(a.file.as_deref()),
            Commands::Update(a) => Some(a.file.as_deref()),
            _ => None,
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let cfg = load_config(cli.config.as_deref())?;

    let backend = cli
        .backend
        .clone()
        .or(cfg.storage.backend.clone())
        .unwrap_or(Backend::Local);
    let options = ServiceOptions {
        max_body_bytes: cfg.limits.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
        convert: cfg.conversion,
    };
    if !(1..=100).contains(&options.convert.jpeg_quality) {
        return Err(eyre!(
            "conversion.jpeg_quality must be between 1 and 100; got {}",
            options.convert.jpeg_quality
        ));
    }
    let registry = TypeRegistry::standard();

    let succeeded = match backend {
        Backend::Ephemeral => {
            debug!("using ephemeral storage");
            let svc = FragmentService::new(EphemeralStorage::new(), registry, options);
            run(&svc, cli.command).await?
        }
        Backend::Local => {
            let root = cli
                .root
                .clone()
                .or(cfg.storage.root.clone())
                .unwrap_or_else(|| DEFAULT_ROOT.to_string());
            let root = expand_path(&root);
            let store = LocalStorage::open(&root)
                .map_err(|e| eyre!("failed to open local storage at {}: {}", root.display(), e))?;
            debug!(root = %root.display(), "using local storage");
            let svc = FragmentService::new(store, registry, options);
            run(&svc, cli.command).await?
        }
    };
    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

enum Outcome {
    Fragment(FragmentInfo),
    List(FragmentListing),
    Deleted(String),
    Formats { media_type: String, formats: Vec<String> },
    Bytes { bytes: Vec<u8>, out: Option<PathBuf> },
}

/// Execute one command and report it. Returns false when the operation
/// failed and an error envelope was printed.
async fn run<S>(svc: &FragmentService<S>, command: Commands) -> Result<bool>
where
    S: FragmentStore + Send + Sync + 'static,
{
    let body = match command.body_source() {
        Some(source) => read_body(source)?,
        None => Vec::new(),
    };
    match dispatch(svc, command, body).await {
        Ok(outcome) => {
            report(outcome)?;
            Ok(true)
        }
        Err(e) => {
            warn!(code = e.code(), error = %e, "command failed");
            print_json(&ErrorResponse::new(e.status(), e.code(), e.to_string()))?;
            Ok(false)
        }
    }
}

fn owner(user: &UserArg) -> Result<OwnerId, ServiceError> {
    Ok(hash_identity(&user.user)?)
}

async fn dispatch<S>(
    svc: &FragmentService<S>,
    command: Commands,
    body: Vec<u8>,
) -> Result<Outcome, ServiceError>
where
    S: FragmentStore + Send + Sync + 'static,
{
    match command {
        Commands::Create(a) => {
            let f = svc.create(&owner(&a.user)?, &a.media_type, body).await?;
            Ok(Outcome::Fragment(FragmentInfo::new(f, svc.registry())))
        }
        Commands::List(a) => Ok(Outcome::List(svc.list(&owner(&a.user)?, a.expand).await?)),
        Commands::Info(a) => Ok(Outcome::Fragment(svc.info(&owner(&a.user)?, &a.id).await?)),
        Commands::Get(a) => {
            let rendered = svc.read(&owner(&a.user)?, &a.id).await?;
            debug!(media_type = %rendered.media_type, bytes = rendered.bytes.len(), "read complete");
            Ok(Outcome::Bytes {
                bytes: rendered.bytes,
                out: a.out,
            })
        }
        Commands::Update(a) => {
            let f = svc
                .update(&owner(&a.user)?, &a.id, &a.media_type, body)
                .await?;
            Ok(Outcome::Fragment(FragmentInfo::new(f, svc.registry())))
        }
        Commands::Delete(a) => {
            svc.delete(&owner(&a.user)?, &a.id).await?;
            Ok(Outcome::Deleted(a.id))
        }
        Commands::Formats(a) => {
            let formats = svc.formats(&a.media_type)?;
            Ok(Outcome::Formats {
                media_type: a.media_type,
                formats,
            })
        }
    }
}

fn report(outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::Fragment(fragment) => print_json(&ok(FragmentBody { fragment })),
        Outcome::List(fragments) => print_json(&ok(ListBody { fragments })),
        Outcome::Deleted(id) => print_json(&ok(DeletedBody { id })),
        Outcome::Formats {
            media_type,
            formats,
        } => print_json(&ok(FormatsBody {
            media_type,
            formats,
        })),
        Outcome::Bytes {
            bytes,
            out: Some(path),
        } => {
            fs::write(&path, &bytes)?;
            info!(path = %path.display(), bytes = bytes.len(), "wrote fragment data");
            Ok(())
        }
        Outcome::Bytes { bytes, out: None } => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_body(source: Option<&Path>) -> Result<Vec<u8>> {
    match source {
        Some(path) => {
            let path = expand_path(&path.to_string_lossy());
            fs::read(&path).map_err(|e| eyre!("failed to read {}: {}", path.display(), e))
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin().lock().read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct StorageSection {
    backend: Option<Backend>,
    root: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct LimitsSection {
    max_body_bytes: Option<usize>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct AppConfig {
    #[serde(default)]
    storage: StorageSection,
    #[serde(default)]
    conversion: ConvertOptions,
    #[serde(default)]
    limits: LimitsSection,
}

fn load_config(path: Option<&str>) -> Result<AppConfig> {
    let mut builder = config::Config::builder()
        .add_source(config::Environment::with_prefix("FRAGMENTS").separator("__"));

    if let Some(raw) = path {
        let expanded = expand_path(raw);
        if !expanded.exists() {
            warn!(
                path = expanded.display().to_string(),
                "config file not found; continuing with defaults and env overrides"
            );
        }
        builder = builder.add_source(config::File::from(expanded).required(false));
    }

    let cfg = builder
        .build()
        .map_err(|e| eyre!("config load error: {}", e))?;
    cfg.try_deserialize()
        .map_err(|e| eyre!("config parse error: {}", e))
}

fn expand_path(input: &str) -> PathBuf {
    if input == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from(input));
    }
    if let Some(rest) = input.strip_prefix("~/") {
        return home_dir()
            .map(|mut base| {
                base.push(rest);
                base
            })
            .unwrap_or_else(|| PathBuf::from(rest));
    }
    PathBuf::from(input)
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("USERPROFILE").map(PathBuf::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "fragments",
            "get",
            "--user",
            "a@example.com",
            "abc.html",
            "--backend",
            "ephemeral",
        ])
        .unwrap();
        assert_eq!(cli.backend, Some(Backend::Ephemeral));
        match cli.command {
            Commands::Get(a) => assert_eq!(a.id, "abc.html"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn only_uploads_read_a_body() {
        let cli = Cli::try_parse_from([
            "fragments", "create", "--user", "u", "--type", "text/plain", "--file", "x.txt",
        ])
        .unwrap();
        assert_eq!(cli.command.body_source(), Some(Some(Path::new("x.txt"))));
        let cli = Cli::try_parse_from(["fragments", "formats", "text/plain"]).unwrap();
        assert_eq!(cli.command.body_source(), None);
    }

    #[test]
    fn tilde_expansion() {
        assert_eq!(expand_path("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = home_dir() {
            assert_eq!(expand_path("~/x"), home.join("x"));
        }
    }
}
