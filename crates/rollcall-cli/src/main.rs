use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::multipart::{Form, Part};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face recognition CLI")]
struct Cli {
    /// Base URL of the rollcalld service
    #[arg(long, env = "ROLLCALL_URL", default_value = "http://127.0.0.1:5002", global = true)]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize the faces in an image
    Recognize {
        /// Image file to upload
        image: PathBuf,
        /// Print the raw JSON response, embeddings included
        #[arg(long)]
        json: bool,
    },
    /// Show daemon health and cache status
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Recognize { image, json } => {
            let body = recognize(&client, base, &image).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                print_results(&body);
            }
        }
        Commands::Health => {
            let resp = client
                .get(format!("{base}/health"))
                .send()
                .await
                .with_context(|| format!("connecting to {base}"))?;
            let body: Value = resp.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

async fn recognize(client: &reqwest::Client, base: &str, image: &Path) -> Result<Value> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("reading {}", image.display()))?;
    let file_name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    tracing::debug!(path = %image.display(), bytes = bytes.len(), "uploading image");

    let form = Form::new().part("image", Part::bytes(bytes).file_name(file_name));
    let resp = client
        .post(format!("{base}/recognize"))
        .multipart(form)
        .send()
        .await
        .with_context(|| format!("connecting to {base}"))?;

    let status = resp.status();
    let body: Value = resp.json().await.context("decoding response")?;
    if !status.is_success() {
        let message = body["error"].as_str().unwrap_or("unknown error");
        bail!("recognition failed ({status}): {message}");
    }
    Ok(body)
}

fn print_results(body: &Value) {
    let results = body["results"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    if results.is_empty() {
        println!("No faces detected");
        return;
    }

    for (i, face) in results.iter().enumerate() {
        match (face["email"].as_str(), face["distance"].as_f64()) {
            (Some(email), Some(distance)) => {
                // Ids may be strings or numbers; print strings unquoted.
                let user = match &face["user_id"] {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                println!("face {}: {email} (user {user}, distance {distance:.3})", i + 1);
            }
            _ => println!("face {}: unknown", i + 1),
        }
    }
}
