use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;

use mazurka_burl::{Options, RequestBody, fetch};
use mazurka_core::proto::http1::Method;

#[derive(Parser)]
#[command(name = "burl")]
#[command(about = "Fetch URLs over HTTP/1.x")]
#[command(version)]
struct Cli {
    /// The URL to fetch
    url: String,

    /// Request method (default GET, or POST with --data)
    #[arg(short = 'X', long = "request")]
    method: Option<String>,

    /// Extra header, "Name: value"; repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Form field, "key=value"; repeatable, sent urlencoded
    #[arg(short = 'd', long = "data")]
    data: Vec<String>,

    /// JSON request body
    #[arg(long, conflicts_with = "data")]
    json: Option<String>,

    /// Write the response body to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Follow redirects
    #[arg(short = 'L', long = "location")]
    follow: bool,

    /// Redirect limit with --location
    #[arg(long, default_value_t = 50)]
    max_redirs: u32,

    /// Issue a HEAD request
    #[arg(short = 'I', long = "head", conflicts_with = "method")]
    head: bool,

    /// Print response heads to stderr
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn options(&self) -> anyhow::Result<Options> {
        let mut headers = Vec::new();
        for h in &self.headers {
            let Some((name, value)) = h.split_once(':') else {
                bail!("header {h:?} is not in \"Name: value\" form");
            };
            headers.push((name.trim().to_owned(), value.trim().to_owned()));
        }

        let body = if let Some(json) = &self.json {
            serde_json::from_str::<serde_json::Value>(json).context("invalid --json body")?;
            Some(RequestBody {
                content_type: "application/json".to_owned(),
                data: json.clone().into_bytes(),
            })
        } else if !self.data.is_empty() {
            let mut pairs = Vec::new();
            for d in &self.data {
                let Some((k, v)) = d.split_once('=') else {
                    bail!("form field {d:?} is not in \"key=value\" form");
                };
                pairs.push((k.to_owned(), v.to_owned()));
            }
            let encoded =
                serde_urlencoded::to_string(&pairs).context("encoding form body")?;
            Some(RequestBody {
                content_type: "application/x-www-form-urlencoded".to_owned(),
                data: encoded.into_bytes(),
            })
        } else {
            None
        };

        let method = if self.head {
            Some(Method::Head)
        } else {
            self.method
                .as_ref()
                .map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()))
        };

        Ok(Options {
            method,
            headers,
            body,
            follow_redirects: self.follow,
            max_redirects: self.max_redirs,
            verbose: self.verbose,
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let opts = cli.options()?;

    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };

    let status = fetch(&cli.url, &opts, &mut *out).await?;
    if status >= 400 {
        eprintln!("burl: server answered {status}");
    }
    Ok(())
}
