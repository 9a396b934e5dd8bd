use clap::Parser;
use rediproc_cli::{init_logging, printable_config, Args};
use rediproc_common::PortSpec;
use rediproc_executor::{redis_proc, ClaimSession, RedisExecutor, RedisServer};
use std::collections::HashSet;
use std::process;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.log.as_deref());

    let config = args.resolve().unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(2);
    });
    let session = ClaimSession::from_env()?;

    if args.print_command {
        let spec = config.port.clone().unwrap_or(PortSpec::Any);
        let port = session.allocate(&spec, &config.host, &HashSet::new(), config.port_search_count)?;
        println!("{}", RedisExecutor::new(printable_config(config, port), port)?.command_line()?);
        return Ok(());
    }

    let started = tokio::task::spawn_blocking(move || {
        let executor = redis_proc(&session, &config);
        (session, executor)
    });
    let (_session, mut executor) = match started.await? {
        (session, Ok(executor)) => (session, executor),
        (_, Err(e)) => {
            eprintln!("Failed to start redis-server: {e}");
            process::exit(1);
        }
    };

    println!("Listening on {}:{}", executor.host(), executor.port());
    if let Some(socket) = executor.unixsocket() {
        println!("Unix socket {}", socket.display());
    }
    println!("Press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    let outcome = tokio::task::spawn_blocking(move || executor.stop()).await?;
    println!("Stopped: {outcome:?}");
    Ok(())
}
