use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use engine::Application;
use model::{AppConfig, Principal, RequestDescriptor, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod demo;

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Evaluate requests against a demo object-tree application", long_about = None)]
struct Cli {
    /// Application config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve one HTTP-style request and print the response
    Request {
        path: String,
        #[arg(long, default_value = "GET")]
        method: String,
        /// Request parameter as key=value; repeatable
        #[arg(long = "param", short = 'p', value_parser = parse_param)]
        params: Vec<(String, String)>,
        #[arg(long)]
        principal: Option<String>,
        /// ETag the client already holds
        #[arg(long)]
        etag: Option<String>,
    },
    /// Call a method over RPC, e.g. `catalog.products.count`
    Rpc {
        method: String,
        /// JSON arguments
        args: Vec<String>,
    },
    /// Call a global function
    Call {
        function: String,
        args: Vec<String>,
        #[arg(long)]
        principal: Option<String>,
    },
    /// Serve a request and print application stats as JSON
    Stats,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{}`", raw))
}

/// Arguments that are not valid JSON are passed as strings.
fn parse_args(raw: &[String]) -> Vec<Value> {
    raw.iter()
        .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone())))
        .collect()
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trellis=info,engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref());
    if config.rpc_access.is_empty() {
        config.rpc_access = vec!["Products.count".into(), "Product.price".into()];
    }
    let app = Application::new(config, demo::catalog()?);

    match cli.command {
        Command::Request {
            path,
            method,
            params,
            principal,
            etag,
        } => {
            let mut request = RequestDescriptor::new(&method, &path);
            for (key, value) in &params {
                request = request.with_param(key, value);
            }
            if let Some(id) = principal {
                request = request.with_principal(Arc::new(Principal::new(id)));
            }
            if let Some(etag) = etag {
                request = request.with_etag(&etag);
            }

            let res = app.execute_http(request)?;
            println!("{}", res.status());
            for (name, value) in res.headers() {
                println!("{}: {}", name, value);
            }
            println!();
            println!("{}", res.body_text());
        }
        Command::Rpc { method, args } => {
            let value = app.execute_rpc(&method, parse_args(&args))?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Call {
            function,
            args,
            principal,
        } => {
            let value = match principal {
                Some(id) => {
                    app.invoke_function_as(Arc::new(Principal::new(id)), &function, parse_args(&args))?
                }
                None => app.invoke_function(None, &function, parse_args(&args))?,
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Stats => {
            app.execute_http(RequestDescriptor::get("/"))?;
            println!("{}", serde_json::to_string_pretty(&app.stats())?);
        }
    }

    app.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_need_an_equals_sign() {
        assert_eq!(
            parse_param("q=desk").unwrap(),
            ("q".to_string(), "desk".to_string())
        );
        assert_eq!(parse_param("a=b=c").unwrap().1, "b=c");
        assert!(parse_param("nope").is_err());
    }

    #[test]
    fn args_fall_back_to_strings() {
        let args = parse_args(&["3".into(), "desk".into(), "{\"a\":1}".into()]);
        assert_eq!(args[0], serde_json::json!(3));
        assert_eq!(args[1], serde_json::json!("desk"));
        assert_eq!(args[2]["a"], 1);
    }

    #[test]
    fn demo_catalog_serves_products() {
        let app = Application::new(AppConfig::default(), demo::catalog().unwrap());
        let res = app
            .execute_http(RequestDescriptor::get("catalog/products/2"))
            .unwrap();
        assert_eq!(res.status(), 200);
        assert!(res.body_text().contains("Oak shelf"));

        let res = app
            .execute_http(RequestDescriptor::get("catalog/products/9"))
            .unwrap();
        assert_eq!(res.status(), 404);
    }
}
