use std::process;
use std::time::Duration;

use rpclink::transport::websocket::{DEFAULT_ENDPOINT, WebSocketConnector};
use rpclink::{Client, ClientConfig};

struct Args {
    address: String,
    query: String,
    endpoint: String,
    ping: Option<Duration>,
    max_attempts: Option<u32>,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let args = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!();
            eprintln!(
                "Usage: rpclink-subscribe <address> <query> [--endpoint <path>] [--ping <secs>] [--max-attempts <n>]"
            );
            eprintln!();
            eprintln!("Arguments:");
            eprintln!("  <address>             Server address: host:port, tcp://, ws:// or wss://");
            eprintln!("  <query>               Subscription query, e.g. \"tm.event='NewBlock'\"");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --endpoint <path>     WebSocket endpoint [default: {DEFAULT_ENDPOINT}]");
            eprintln!("  --ping <secs>         Keepalive ping period [default: off]");
            eprintln!("  --max-attempts <n>    Reconnect attempts before giving up [default: 10]");
            process::exit(2);
        }
    };

    rpclink::logging::init_tracing();

    if let Err(e) = run(args).await {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut positional: Vec<String> = Vec::new();
    let mut endpoint = DEFAULT_ENDPOINT.to_string();
    let mut ping = None;
    let mut max_attempts = None;

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--endpoint" => {
                i += 1;
                endpoint = args.get(i).ok_or("--endpoint requires a value")?.clone();
            }
            "--ping" => {
                i += 1;
                let secs = args.get(i).ok_or("--ping requires a value")?;
                let secs: u64 = secs
                    .parse()
                    .map_err(|_| format!("invalid --ping value '{secs}'"))?;
                ping = Some(Duration::from_secs(secs));
            }
            "--max-attempts" => {
                i += 1;
                let n = args.get(i).ok_or("--max-attempts requires a value")?;
                max_attempts = Some(
                    n.parse()
                        .map_err(|_| format!("invalid --max-attempts value '{n}'"))?,
                );
            }
            "--help" | "-h" => return Err("".to_string()),
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg => {
                if positional.len() == 2 {
                    return Err(format!("unexpected argument: {arg}"));
                }
                positional.push(arg.to_string());
            }
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let address = positional.next().ok_or("missing required argument: <address>")?;
    let query = positional.next().ok_or("missing required argument: <query>")?;
    Ok(Args {
        address,
        query,
        endpoint,
        ping,
        max_attempts,
    })
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = ClientConfig::default();
    if let Some(period) = args.ping {
        config = config.with_ping_period(period);
    }
    if let Some(n) = args.max_attempts {
        config = config.with_max_reconnect_attempts(n);
    }

    let client = Client::with_config(
        args.address,
        WebSocketConnector::new(args.endpoint),
        config,
    );
    // Subscriptions do not survive a new connection.
    let (reconnected_tx, mut reconnected) = tokio::sync::mpsc::unbounded_channel();
    client.on_reconnect(move || {
        let _ = reconnected_tx.send(());
    });

    let mut responses = client.start().await?;
    let id = client.subscribe(&args.query).await?;
    tracing::info!(%id, query = %args.query, "Subscribed");

    loop {
        tokio::select! {
            Some(()) = reconnected.recv() => {
                let id = client.subscribe(&args.query).await?;
                tracing::info!(%id, query = %args.query, "Resubscribed");
            }
            response = responses.recv() => {
                let Some(response) = response else {
                    anyhow::bail!("connection lost and reconnect attempts exhausted");
                };
                println!("{}", serde_json::to_string(&response)?);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if tokio::time::timeout(Duration::from_secs(2), client.unsubscribe_all())
        .await
        .is_err()
    {
        tracing::warn!("Timed out unsubscribing");
    }
    client.stop().await?;
    Ok(())
}
