use clap::Parser;
use eyre::{eyre, Result, WrapErr};
use futures::pin_mut;
use gcm::{
    Backoff, ClientConfig, Credentials, Environment, HttpMessage, HttpTransport, Notification,
    Priority, UnaryTransport,
};
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::*;
use tracing_subscriber::{prelude::*, EnvFilter};

#[inline]
pub fn run() -> Result<()> {
    App::parse().run()
}

/// `KEY=VALUE`, where VALUE is parsed as JSON and falls back to a plain string
pub fn parse_data_entry(s: &str) -> Result<(String, Value), eyre::Error> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| eyre!("expected KEY=VALUE, got `{s}`"))?;
    if key.is_empty() {
        return Err(eyre!("empty key in `{s}`"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[derive(Parser)]
#[command(author, about = "Send a push notification over GCM HTTP", long_about = None)]
pub struct App {
    #[arg(long, env = "GCM_SENDER_ID")]
    pub sender_id: String,

    #[arg(long, env = "GCM_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Client configuration file (.toml or .json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Use the pre-production environment
    #[arg(long)]
    pub sandbox: bool,

    /// Log request and response bodies
    #[arg(long)]
    pub debug: bool,

    #[arg(
        long = "full-log-context",
        env = "FULL_LOG_CONTEXT",
        default_value_t = false
    )]
    pub full_log_context: bool,

    /// Registration ids or topic; more than one sends a multicast message
    #[arg(long = "to", required = true, num_args = 1..)]
    pub to: Vec<String>,

    /// Data payload entry, repeatable
    #[arg(long = "data", value_name = "KEY=VALUE", value_parser = parse_data_entry)]
    pub data: Vec<(String, Value)>,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub body: Option<String>,

    #[arg(long = "collapse-key")]
    pub collapse_key: Option<String>,

    #[arg(long = "high-priority")]
    pub high_priority: bool,

    /// Seconds the message is kept while the device is offline
    #[arg(long = "time-to-live")]
    pub time_to_live: Option<u32>,

    /// Validate the request without delivering it
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

impl App {
    pub fn run(self) -> Result<()> {
        self.init_tracing();
        let tokio_runtime = tokio_runtime()?;
        tokio_runtime.block_on(run_until_ctrl_c(self.execute()))?;
        Ok(())
    }

    fn init_tracing(&self) {
        let rust_log_level = std::env::var("RUST_LOG")
            .ok()
            .and_then(|level| Level::from_str(&level).ok())
            .unwrap_or(Level::INFO);

        let filter = if self.full_log_context {
            EnvFilter::builder().parse_lossy(rust_log_level.as_str())
        } else {
            let filter_tag = format!("app={rust_log_level},gcm={rust_log_level}");
            EnvFilter::builder().parse_lossy(filter_tag.as_str())
        };

        let main_layer = tracing_subscriber::fmt::layer().with_target(true);

        let layers = if rust_log_level == Level::DEBUG || rust_log_level == Level::TRACE {
            vec![main_layer
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter)
                .boxed()]
        } else {
            vec![main_layer.with_filter(filter).boxed()]
        };

        tracing_subscriber::registry().with(layers).init();
    }

    async fn load_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load_from_file(path)
                .await
                .wrap_err_with(|| format!("Failed to load config from {}", path.display()))?,
            None => ClientConfig::default(),
        };
        if self.sandbox {
            config.environment = Environment::Sandbox;
        }
        config.debug |= self.debug;
        config.validate()?;
        Ok(config)
    }

    fn message(&self) -> HttpMessage {
        let mut message = HttpMessage {
            collapse_key: self.collapse_key.clone(),
            priority: self.high_priority.then_some(Priority::High),
            time_to_live: self.time_to_live,
            dry_run: self.dry_run.then_some(true),
            ..Default::default()
        };

        match self.to.as_slice() {
            [to] => message.to = Some(to.clone()),
            ids => message.registration_ids = ids.to_vec(),
        }
        if !self.data.is_empty() {
            message.data = Some(self.data.iter().cloned().collect());
        }
        if self.title.is_some() || self.body.is_some() {
            message.notification = Some(Notification {
                title: self.title.clone(),
                body: self.body.clone(),
                ..Default::default()
            });
        }
        message
    }

    async fn execute(self) -> Result<()> {
        let config = self.load_config().await?;
        let credentials = Credentials::new(self.sender_id.clone(), self.api_key.clone());
        credentials.validate()?;

        let message = self.message();
        let transport = HttpTransport::new(&config, &credentials)?;
        let mut backoff = Backoff::from_config(&config.backoff);

        info!(
            environment = %config.environment,
            endpoint = transport.endpoint(),
            recipients = message.targets().len(),
            "Sending message"
        );
        let response = transport.send(&message, &mut backoff).await?;
        info!(
            success = response.success,
            failure = response.failure,
            canonical_ids = response.canonical_ids,
            "Message sent"
        );

        println!("{}", serde_json::to_string_pretty(&response)?);
        Ok(())
    }
}

pub fn tokio_runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

async fn run_until_ctrl_c<F, E>(fut: F) -> Result<(), E>
where
    F: Future<Output = Result<(), E>>,
    E: Send + Sync + 'static + From<std::io::Error>,
{
    let ctrl_c = tokio::signal::ctrl_c();

    let mut stream = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let sigterm = stream.recv();
    pin_mut!(sigterm, ctrl_c, fut);

    tokio::select! {
        _ = ctrl_c => {
            info!("Received ctrl-c");
        },
        _ = sigterm => {
            info!("Received SIGTERM");
        },
        res = fut => res?,
    }

    Ok(())
}
