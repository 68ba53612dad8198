use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about)]
pub struct Cli {
    /// The request url,like http://www.google.com
    pub url: String,
    ///  Specify request method to use
    #[arg(short = 'X', long = "request", value_name = "method")]
    pub method_option: Option<String>,
    /// HTTP POST data.
    #[arg(short = 'd', long = "data", value_name = "data")]
    pub body_option: Option<String>,
    /// The http headers.
    #[arg(short = 'H', long = "header", value_name = "header")]
    pub headers: Vec<String>,
    ///  Send User-Agent <name> to server
    #[arg(short = 'A', long = "user-agent", value_name = "name")]
    pub user_agent_option: Option<String>,
    /// The pem path.
    #[arg(short = 'c', long = "cacert", value_name = "file")]
    pub certificate_path_option: Option<String>,
    /// Allow insecure server connections
    #[arg(short = 'k', long = "insecure")]
    pub skip_certificate_validate: bool,
    /// Maximum time allowed for the whole call, in seconds
    #[arg(long = "timeout", value_name = "seconds", default_value_t = 30)]
    pub timeout_secs: u64,
    /// Never report metrics for matching urls (host, .suffix or url prefix)
    #[arg(long = "blacklist", value_name = "pattern")]
    pub blacklist: Vec<String>,
    /// Log every lifecycle event of the call
    #[arg(long = "trace-events")]
    pub trace_events: bool,
    /// Append metrics records to this file instead of stderr
    #[arg(long = "report-file", value_name = "file")]
    pub report_file: Option<PathBuf>,
    ///  Write to file instead of stdout.
    #[arg(long = "output", short = 'o', value_name = "file")]
    pub file_path_option: Option<String>,
    ///  Make the operation more talkative
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}
