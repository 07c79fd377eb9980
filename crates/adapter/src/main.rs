use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use mcp_openapi_adapter::commands::{self, ServeOptions};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mcp-openapi-adapter", version, about)]
struct Cli {
    /// Log filter (`RUST_LOG` syntax), e.g. `info` or `mcp_openapi_tools=debug`.
    #[arg(long, global = true, env = "MCP_OPENAPI_LOG", default_value = "info")]
    log_level: String,

    #[arg(long, global = true, env = "MCP_OPENAPI_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build tools for every configured namespace and serve the inspection endpoint.
    Serve {
        #[arg(long, env = "MCP_OPENAPI_CONFIG")]
        config: PathBuf,

        #[arg(long, env = "MCP_OPENAPI_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Seconds between config/spec change checks; `0` disables hot reload.
        #[arg(long, env = "MCP_OPENAPI_WATCH_INTERVAL", default_value_t = 2.0)]
        watch_interval: f64,
    },

    /// Load one spec and print its documents and selected operations as JSON.
    Parse {
        /// Spec location: file path, `file://`, `http://` or `https://` URL.
        #[arg(long)]
        spec: String,

        /// Path regexes selecting operations; every operation when omitted.
        #[arg(long = "paths", num_args = 1..)]
        paths: Vec<String>,
    },

    /// Print the tools synthesized from one spec as JSON.
    Tools {
        /// Spec location: file path, `file://`, `http://` or `https://` URL.
        #[arg(long)]
        spec: String,

        /// Path regexes selecting operations.
        #[arg(long = "paths", num_args = 1.., required = true)]
        paths: Vec<String>,

        /// `HEADER=QUERY_KEY` pairs; those query parameters are hidden from the arguments.
        #[arg(long = "forward-query-param")]
        forward_query_params: Vec<String>,
    },

    /// Write a self-contained subset of a spec holding only the selected paths.
    Slim {
        #[arg(long)]
        spec: String,

        #[arg(long = "paths", num_args = 1.., required = true)]
        paths: Vec<String>,

        /// Output file; `.yaml`/`.yml` writes YAML, anything else JSON.
        #[arg(long, short)]
        output: PathBuf,
    },
}

fn init_tracing(level: &str, format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(level).with_context(|| format!("invalid log filter '{level}'"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format)?;

    match cli.command {
        Command::Serve {
            config,
            bind,
            watch_interval,
        } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received Ctrl-C, shutting down");
                }
                on_signal.cancel();
            });

            let watch_interval = (watch_interval.is_finite() && watch_interval > 0.0)
                .then(|| Duration::from_secs_f64(watch_interval));
            commands::serve(
                ServeOptions {
                    config_path: config,
                    bind,
                    watch_interval,
                },
                cancel,
            )
            .await
            .context("serve")?;
        }
        Command::Parse { spec, paths } => {
            let summary = commands::parse_spec(&spec, &paths)
                .await
                .with_context(|| format!("parse '{spec}'"))?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Tools {
            spec,
            paths,
            forward_query_params,
        } => {
            let forward = commands::parse_forward_pairs(&forward_query_params)?;
            let tools = commands::spec_tools(&spec, &paths, forward)
                .await
                .with_context(|| format!("build tools from '{spec}'"))?;
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }
        Command::Slim {
            spec,
            paths,
            output,
        } => {
            let kept = commands::slim_spec(&spec, &paths, &output)
                .await
                .with_context(|| format!("slim '{spec}'"))?;
            eprintln!("Kept {kept} paths -> {}", output.display());
        }
    }
    Ok(())
}
