use anyhow::Result;
use std::sync::Arc;

use oauth_gateway::auth::{mask_token, AuthOutcome};
use oauth_gateway::config::Config;
use oauth_gateway::consent::{CommandConsent, ConsentDriver, ManualConsent};
use oauth_gateway::{build_app, routes};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("🚀 OAuth Gateway starting...");
    tracing::info!(
        "Server configured: {}:{}",
        config.server_host,
        config.server_port
    );

    let consent_driver = select_consent_driver(&config);
    let app_state = routes::AppState::new(config.clone(), consent_driver)?;

    if config.authenticate_on_start {
        tracing::info!("Checking stored token...");
        match app_state
            .auth_flow
            .initiate(app_state.consent.clone())
            .await
            .map(|initiation| initiation.outcome)
        {
            Ok(AuthOutcome::Authenticated(record)) => {
                tracing::info!(
                    "✅ Token refreshed (token: {}, expires in {}s)",
                    mask_token(&record.access_token),
                    record.expires_in
                );
            }
            Ok(AuthOutcome::ConsentRequired { .. }) => {
                tracing::warn!("⏳ Consent required, waiting for {}", config.callback_path);
            }
            Err(e) => {
                tracing::error!("❌ Authentication failed: {}", e);
                tracing::warn!("Server will start; retry with /auth/initiate");
            }
        }
    }

    // Build the application with routes and middleware
    let app = build_app(app_state);

    // Bind to configured host and port
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // Print startup banner
    print_startup_banner(&config);

    // Start server with graceful shutdown
    tracing::info!("🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("👋 Server shutdown complete");

    Ok(())
}

/// Browser automation when a command is configured, otherwise an operator opens the URL
fn select_consent_driver(config: &Config) -> Arc<dyn ConsentDriver> {
    let automated = config.consent_command.as_deref().and_then(|command| {
        CommandConsent::new(
            command,
            config.consent_identity.clone(),
            config.consent_timeout,
        )
    });

    match automated {
        Some(driver) => {
            tracing::info!("✅ Consent is driven by the configured command");
            Arc::new(driver)
        }
        None => {
            tracing::info!("Consent must be given manually in a browser");
            Arc::new(ManualConsent)
        }
    }
}

/// Print startup banner
fn print_startup_banner(config: &Config) {
    let banner = r#"
╔═══════════════════════════════════════════════════════════╗
║                                                           ║
║              🔐 OAuth Gateway - Rust Edition              ║
║                                                           ║
║  Keeps an installed-app OAuth2 token fresh on disk        ║
║                                                           ║
╚═══════════════════════════════════════════════════════════╝
"#;

    println!("{}", banner);
    println!("  Version:     {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Server:      http://{}:{}",
        config.server_host, config.server_port
    );
    println!(
        "  Callback:    {}{}",
        config.redirect_base, config.callback_path
    );
    println!("  Credentials: {}", config.credentials_file.display());
    println!("  Token file:  {}", config.token_file.display());
    println!("  Scopes:      {}", config.scopes.join(" "));
    println!(
        "  Consent:     {}",
        if config.consent_command.is_some() {
            "command"
        } else {
            "manual"
        }
    );
    println!(
        "  API key:     {}",
        if config.proxy_api_key.is_some() {
            "required"
        } else {
            "open"
        }
    );
    println!("  Log Level:   {}", config.log_level);
    println!();
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
