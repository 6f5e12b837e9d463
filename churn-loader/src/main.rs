use std::process::ExitCode;

use churn_loader::config::Args;
use churn_loader::{Config, Loader, telemetry};
use clap::Parser;
use tokio_util::sync::CancellationToken;

/// Cancel `token` on SIGTERM or Ctrl+C. The load stops at the next chunk boundary.
async fn cancel_on_signal(token: CancellationToken) {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::warn!("Received Ctrl+C, stopping after the current chunk...");
        },
        _ = terminate => {
            tracing::warn!("Received SIGTERM, stopping after the current chunk...");
        },
    }

    token.cancel();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    // Install rustls crypto provider before anything else that might build a TLS client
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let args = Args::parse();
    let config = Config::load(&args)?;

    if args.validate {
        println!("Configuration is valid.");
        return Ok(ExitCode::SUCCESS);
    }

    telemetry::init_telemetry(config.enable_otel_export)?;
    tracing::debug!("{:?}", args);

    let loader = Loader::new(config);

    if args.check_connection {
        let ok = loader.check_connection().await;
        telemetry::shutdown_telemetry();
        if ok? {
            println!("Database connection OK.");
            return Ok(ExitCode::SUCCESS);
        }
        println!("Database connection FAILED.");
        return Ok(ExitCode::FAILURE);
    }

    println!("Churn predictions loader");
    println!("{}", "=".repeat(50));

    let outcome = if args.dry_run {
        loader.dry_run()
    } else {
        let cancel = CancellationToken::new();
        tokio::spawn(cancel_on_signal(cancel.clone()));
        loader.run(cancel).await
    };

    let code = match outcome {
        Ok(summary) => {
            println!();
            print!("{summary}");
            println!();
            println!("SUCCESS: data loading completed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(kind = e.kind(), "Pipeline failed: {e}");
            println!();
            println!("FAILED: data loading failed ({}): {e}", e.kind());
            ExitCode::FAILURE
        }
    };

    telemetry::shutdown_telemetry();
    Ok(code)
}
