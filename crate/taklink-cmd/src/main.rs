use anyhow::Context as _;
use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::time::{Duration, SystemTime};
use taklink_cot::CotMessage;
use taklink_network::{
    Client as _, ClientConfig, ClientError, ConnectionKind, DEFAULT_MULTICAST_ADDR,
    DEFAULT_MULTICAST_PORT,
    DEFAULT_TCP_PORT, DEFAULT_TLS_PORT, DEFAULT_UDP_PORT, new_client,
};
use tokio_util::sync::CancellationToken;

/// Send a sample CoT position event to a TAK server and print what
/// comes back.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TAK server host name or address.
    #[arg(long, default_value = "127.0.0.1")]
    server: String,

    /// Server port. Defaults to the conventional port of the chosen
    /// transport (8087 for tcp/udp, 8089 for tls).
    #[arg(long)]
    port: Option<u16>,

    /// Transport: tcp, tls, udp or multicast.
    #[arg(long, default_value = "tcp")]
    connection: ConnectionKind,

    /// Multicast group address.
    #[arg(long, default_value = DEFAULT_MULTICAST_ADDR)]
    multicast_addr: String,

    /// Multicast group port.
    #[arg(long, default_value_t = DEFAULT_MULTICAST_PORT)]
    multicast_port: u16,

    /// Client identifier, used as uid and flow-tag origin.
    #[arg(long, default_value = "taklink-client")]
    id: String,

    /// Client certificate, PEM or PKCS#12 (.p12/.pfx).
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Private key for a PEM certificate.
    #[arg(long)]
    key: Option<PathBuf>,

    /// Password for a PKCS#12 bundle.
    #[arg(long)]
    password: Option<String>,

    /// CA bundle (PEM) to trust for server verification.
    #[arg(long)]
    ca: Option<PathBuf>,

    /// Skip server certificate verification.
    #[arg(long)]
    skip_verify: bool,
}

/// A minimal friendly-ground-unit position report.
fn sample_event(uid: &str) -> String {
    let now = SystemTime::now();
    let time = humantime::format_rfc3339_seconds(now);
    let stale = humantime::format_rfc3339_seconds(now + Duration::from_secs(300));
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><event version="2.0" uid="{uid}" type="a-f-G-U-C" time="{time}" start="{time}" stale="{stale}" how="m-g"><point lat="0.0" lon="0.0" hae="0.0" ce="9999999.0" le="9999999.0"/><detail><contact callsign="{uid}"/></detail></event>"#
    )
}

fn build_config(cli: &Cli) -> ClientConfig {
    let port = cli.port.unwrap_or(match cli.connection {
        ConnectionKind::Tcp => DEFAULT_TCP_PORT,
        ConnectionKind::Tls => DEFAULT_TLS_PORT,
        ConnectionKind::Udp => DEFAULT_UDP_PORT,
        ConnectionKind::Multicast => DEFAULT_MULTICAST_PORT,
    });
    let mut config = ClientConfig::new(cli.connection, cli.server.clone(), port, cli.id.clone());
    config.dial_timeout = Some(Duration::from_secs(10));
    config.read_timeout = Some(Duration::from_secs(30));
    config.write_timeout = Some(Duration::from_secs(10));
    config.cert_file = cli.cert.clone();
    config.key_file = cli.key.clone();
    config.ca_file = cli.ca.clone();
    config.p12_password = cli.password.clone();
    config.skip_tls_verify = cli.skip_verify;
    config.multicast_addr = cli.multicast_addr.clone();
    config.multicast_port = cli.multicast_port;
    config
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let status = match execute(&cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            1
        }
    };
    process::exit(status);
}

async fn execute(cli: &Cli) -> anyhow::Result<i32> {
    let config = build_config(cli);
    let mut client = new_client(config).context("failed to create client")?;

    let token = CancellationToken::new();
    let interrupted = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupted; shutting down");
            interrupted.cancel();
        }
    });

    client
        .connect(token.clone())
        .await
        .with_context(|| format!("failed to connect to {}", cli.server))?;

    let event = sample_event(&cli.id);
    client
        .send(event.as_bytes())
        .await
        .context("failed to send position event")?;
    println!("sent position event as {}", cli.id);

    let status = loop {
        match client.recv().await {
            Ok(data) => {
                print_reply(&data);
                break 0;
            }
            // Our own broadcast or a duplicate; keep listening.
            Err(ClientError::MessageSkipped) => {
                log::info!("message suppressed by flow tag rules");
            }
            Err(ClientError::Timeout) => {
                println!("no reply within the read deadline");
                break 0;
            }
            Err(ClientError::Cancelled) => break 0,
            Err(err) => return Err(err).context("failed to receive"),
        }
    };

    client.disconnect().await.context("failed to disconnect")?;
    Ok(status)
}

fn print_reply(data: &[u8]) {
    match CotMessage::parse(data) {
        Ok(message) => {
            if let Some(tag) = message.flow_tag() {
                println!(
                    "received CoT event from {} (sequence {})",
                    tag.origin, tag.sequence
                );
            } else {
                println!("received CoT event");
            }
        }
        Err(_) => println!("received {} bytes of non-CoT data", data.len()),
    }
    println!("{}", String::from_utf8_lossy(data));
}
