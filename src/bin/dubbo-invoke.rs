use std::time::Duration;

use axum::http::HeaderMap;
use bytes::Bytes;
use clap::Parser;

use dubbo_bridge::bridge::{DubboBridge, RequestSource};
use dubbo_bridge::config::schema::{ArgumentSource, BridgeConfig, ContextConfig, ParameterConfig};
use dubbo_bridge::observability::logging;
use dubbo_bridge::upstream::{invoke, UpstreamTimeouts};

#[derive(Parser)]
#[command(name = "dubbo-invoke")]
#[command(about = "Issue one generic Dubbo invocation from the command line", long_about = None)]
struct Cli {
    /// Provider address, e.g. 127.0.0.1:20880
    #[arg(short, long)]
    upstream: String,

    #[arg(short, long)]
    service: String,

    #[arg(short, long)]
    method: String,

    #[arg(long, default_value = "")]
    version: String,

    #[arg(long, default_value = "")]
    group: String,

    /// Java type of each parameter, in order. Repeatable.
    #[arg(short, long = "param")]
    params: Vec<String>,

    /// Arguments as a JSON array, one element per parameter.
    #[arg(short, long, default_value = "[]")]
    args: String,

    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level);

    let bridge = DubboBridge::from_config(&BridgeConfig {
        protocol_error_code: 501,
        resp_exception_code: 503,
        context: Some(ContextConfig {
            service: cli.service,
            version: cli.version,
            method: cli.method,
            group: cli.group,
            source: ArgumentSource::Body,
            ignore_null_map_pair: false,
            parameters: cli
                .params
                .into_iter()
                .map(|type_name| ParameterConfig {
                    type_name,
                    name: String::new(),
                    required: false,
                    default: None,
                    generic: Vec::new(),
                })
                .collect(),
            attachments: Vec::new(),
        }),
        ..BridgeConfig::default()
    })?;

    let source = RequestSource::new(HeaderMap::new(), "/", Bytes::from(cli.args));
    let timeouts = UpstreamTimeouts {
        connect: Duration::from_secs(cli.timeout_secs),
        request: Duration::from_secs(cli.timeout_secs),
    };

    let response = invoke(&cli.upstream, Some(bridge), &source, timeouts).await?;
    println!("{}", response.status);
    println!("{}", String::from_utf8_lossy(&response.body));
    Ok(())
}
