//! Rivet server binary.
//!
//! Serves a handful of demo methods:
//!
//! - `ping()` returns `"pong"`
//! - `echo(args...)` returns its arguments as an array
//! - `add(a, b)` returns `a + b`
//! - `shutdown()` stops the server
//!
//! # Usage
//!
//! ```bash
//! # Four worker threads on the wildcard address
//! rivet-server --port 9000 --workers 4
//!
//! # Drive the server on the main thread only
//! rivet-server --address 127.0.0.1 --port 9000 --workers 0
//! ```

use clap::Parser;
use rivet_server::{
    DEFAULT_BACKLOG, HandlerError, Server, ServerConfig, Value, expect_arity, int_arg,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Rivet RPC server
#[derive(Parser, Debug)]
#[command(name = "rivet-server")]
#[command(about = "Rivet RPC server")]
#[command(version)]
struct Args {
    /// IP address to bind to (defaults to the IPv4 wildcard address)
    #[arg(short, long)]
    address: Option<String>,

    /// Port to listen on
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Worker threads driving the server; 0 runs on the main thread
    #[arg(short, long, default_value = "4")]
    workers: usize,

    /// Listen backlog
    #[arg(long, default_value_t = DEFAULT_BACKLOG)]
    backlog: u32,

    /// Answer handler failures with error responses instead of closing the
    /// connection
    #[arg(long)]
    suppress_exceptions: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Rivet server starting");

    let config = ServerConfig {
        address: args.address,
        port: args.port,
        backlog: args.backlog,
        suppress_exceptions: args.suppress_exceptions,
    };
    let server = Server::with_config(&config)?;
    bind_demo_methods(&server)?;

    tracing::info!("Server listening on {}", server.local_addr());

    if args.workers == 0 {
        server.run();
    } else {
        server.async_run(args.workers)?;
        server.join();
    }

    tracing::info!("Server stopped");
    Ok(())
}

fn bind_demo_methods(server: &Server) -> Result<(), rivet_server::ServerError> {
    server.bind("ping", |_, params| {
        expect_arity(params, 0)?;
        Ok(Value::Text("pong".to_string()))
    })?;

    server.bind("echo", |_, params| Ok(Value::Array(params.to_vec())))?;

    server.bind("add", |_, params| {
        expect_arity(params, 2)?;
        let sum = int_arg(params, 0)?
            .checked_add(int_arg(params, 1)?)
            .ok_or_else(|| HandlerError::Failed("integer overflow".to_string()))?;
        Ok(Value::Integer(sum.into()))
    })?;

    server.bind("shutdown", |ctx, _| {
        tracing::info!("Shutdown requested by session {}", ctx.session_id());
        ctx.stop_server();
        Ok(Value::Null)
    })?;

    Ok(())
}
