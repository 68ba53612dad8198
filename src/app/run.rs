use crate::cli::app_config::Cli;
use crate::http::client::InstrumentedClient;
use crate::monitor::blacklist::PatternBlacklist;
use crate::monitor::factory::MonitorFactory;
use crate::monitor::logger::EventLoggerFactory;
use crate::monitor::sink::{spawn_report_writer, ChannelSink};
use crate::tls::config::build_tls_config;
use bytes::Bytes;
use clap::Parser;
use http::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use http::{Request, Response};
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

const REPORT_QUEUE_CAPACITY: usize = 256;

pub async fn main_with_error() -> Result<(), anyhow::Error> {
    let cli: Cli = Cli::parse();

    do_request(cli).await
}

fn init_logging(verbosity: u8) -> Result<(), anyhow::Error> {
    let log_level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy()
        .add_directive("hyper_util=off".parse()?);
    let subscriber = tracing_subscriber::fmt()
        .without_time()
        .with_level(verbosity > 0)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

async fn do_request(cli: Cli) -> Result<(), anyhow::Error> {
    init_logging(cli.verbosity)?;

    let request = build_request(&cli)?;

    let (sink, rx) = ChannelSink::new(REPORT_QUEUE_CAPACITY);
    let writer = spawn_report_writer(rx, cli.report_file.clone());

    let blacklist = PatternBlacklist::new(cli.blacklist.iter().cloned());
    let mut factory = MonitorFactory::new(Arc::new(sink), Arc::new(blacklist));
    if cli.trace_events {
        factory = factory.with_upstream(Arc::new(EventLoggerFactory));
    }

    let tls_config = build_tls_config(
        cli.skip_certificate_validate,
        cli.certificate_path_option.as_deref(),
    )?;
    let client = InstrumentedClient::new(Arc::new(factory), tls_config)
        .with_timeout(Duration::from_secs(cli.timeout_secs));

    let result = client.execute(request).await;
    // Last sender goes away with the client; the writer then drains and exits.
    drop(client);
    let response = finish_reporting(result, writer).await?;
    handle_response(&cli, response)
}

/// Waits for the report writer, then hands back the call result untouched.
/// A failed writer is logged and never replaces the result.
async fn finish_reporting<T>(
    result: T,
    writer: JoinHandle<Result<usize, anyhow::Error>>,
) -> T {
    match writer.await {
        Ok(Ok(written)) => debug!("{} metrics record(s) written", written),
        Ok(Err(e)) => warn!("Metrics reporting failed: {:#}", e),
        Err(e) => warn!("Metrics writer task failed: {}", e),
    }
    result
}

fn build_request(cli: &Cli) -> Result<Request<Bytes>, anyhow::Error> {
    let mut method = String::from("GET");
    let mut request_builder = Request::builder();

    if cli.body_option.is_some() {
        method = String::from("POST");
        request_builder = request_builder.header(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
    }
    if let Some(method_userdefined) = cli.method_option.as_ref() {
        method = method_userdefined.clone();
    }

    request_builder = request_builder
        .method(method.as_str())
        .uri(cli.url.as_str())
        .header(ACCEPT, HeaderValue::from_static("*/*"));
    if let Some(user_agent) = cli.user_agent_option.as_ref() {
        request_builder = request_builder.header(USER_AGENT, HeaderValue::from_str(user_agent)?);
    }

    for x in &cli.headers {
        let split: Vec<&str> = x.splitn(2, ':').collect();
        if split.len() == 2 {
            request_builder = request_builder.header(
                HeaderName::from_str(split[0])?,
                HeaderValue::from_str(split[1].trim_start())?,
            );
        } else {
            return Err(anyhow!("header error: '{}'", x));
        }
    }

    let body = cli
        .body_option
        .clone()
        .map_or(Bytes::new(), Bytes::from);
    let request = request_builder.body(body)?;

    if cli.verbosity >= 1 {
        debug!(
            "> {} {} {:?}",
            request.method(),
            request.uri().path(),
            request.version()
        );
        for (key, value) in request.headers().iter() {
            debug!("> {}: {}", key, value.to_str()?);
        }
        debug!(">");
    }

    Ok(request)
}

fn handle_response(cli: &Cli, response: Response<Bytes>) -> Result<(), anyhow::Error> {
    if cli.verbosity >= 1 {
        debug!("< {:?} {}", response.version(), response.status());
        for (key, value) in response.headers().iter() {
            debug!("< {}: {}", key, String::from_utf8_lossy(value.as_bytes()));
        }
        debug!("<");
    }

    if let Some(file_path) = cli.file_path_option.as_ref() {
        std::fs::write(file_path, response.body())
            .map_err(|e| anyhow!("Failed to write response to {}: {}", file_path, e))?;
        info!("Saved {} bytes to {}", response.body().len(), file_path);
        return Ok(());
    }

    match std::str::from_utf8(response.body()) {
        Ok(text) => print!("{text}"),
        Err(_) => {
            error!("[netmon: warning] response body is not valid UTF-8 and was not printed.");
            error!("[netmon: warning] to save to a file, use `-o <filename>`");
        }
    }
    std::io::stdout().flush()?;
    Ok(())
}
