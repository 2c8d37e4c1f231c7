//! CLI for blob operations against a node

use anyhow::{bail, Context};
use blobsync::blobstore::{AccessControl, ReadableBlobMeta, SettableBlobMeta};
use blobsync::common::format_bytes;
use blobsync::node::http::{
    ACL_HEADER, GROUPS_HEADER, REPLICATION_HEADER, USER_HEADER, VERSION_HEADER,
};
use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "blobsync")]
#[command(about = "blobsync replicated blob store CLI")]
#[command(version)]
struct Cli {
    /// Node URL (writes must go to the leader)
    #[arg(long, default_value = "http://localhost:6627")]
    node: String,

    /// Act as this user
    #[arg(long)]
    user: Option<String>,

    /// Groups of the user (comma-separated)
    #[arg(long)]
    groups: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a blob from a file
    Create {
        key: String,

        #[arg(long)]
        file: PathBuf,

        /// ACL entries, e.g. u:alice:rwa,o::r--
        #[arg(long)]
        acl: Option<String>,

        /// Replication factor
        #[arg(long)]
        replication: Option<u32>,
    },

    /// Replace a blob's content with a file
    Update {
        key: String,

        #[arg(long)]
        file: PathBuf,
    },

    /// Print a blob (or write it to a file)
    Cat {
        key: String,

        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Delete a blob
    Delete { key: String },

    /// List blob keys
    List,

    /// Show a blob's metadata
    Meta { key: String },

    /// Replace a blob's ACL
    SetAcl {
        key: String,

        /// ACL entries, e.g. u:alice:rwa,o::r--
        acl: String,
    },

    /// Show or change the replication factor
    Replication {
        key: String,

        #[arg(long)]
        set: Option<u32>,
    },
}

struct Api {
    client: Client,
    base: String,
    user: Option<String>,
    groups: Option<String>,
}

impl Api {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base.trim_end_matches('/'), path)
    }

    fn identify(&self, mut req: RequestBuilder) -> RequestBuilder {
        if let Some(user) = &self.user {
            req = req.header(USER_HEADER, user);
        }
        if let Some(groups) = &self.groups {
            req = req.header(GROUPS_HEADER, groups);
        }
        req
    }

    async fn send(&self, req: RequestBuilder) -> anyhow::Result<Response> {
        let resp = self
            .identify(req)
            .send()
            .await
            .with_context(|| format!("cannot reach {}", self.base))?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        match body.get("error").and_then(Value::as_str) {
            Some(error) => bail!("{}: {}", status, error),
            None => bail!("request failed: {}", status),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let api = Api {
        client: Client::new(),
        base: cli.node.clone(),
        user: cli.user.clone(),
        groups: cli.groups.clone(),
    };

    match cli.command {
        Commands::Create {
            key,
            file,
            acl,
            replication,
        } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("cannot read {}", file.display()))?;
            let size = data.len() as u64;
            let mut req = api.client.put(api.url(&format!("/blobs/{}", key))).body(data);
            if let Some(acl) = acl {
                AccessControl::parse_list(&acl)?;
                req = req.header(ACL_HEADER, acl);
            }
            if let Some(replication) = replication {
                req = req.header(REPLICATION_HEADER, replication.to_string());
            }
            let body: Value = api.send(req).await?.json().await?;
            println!(
                "✓ Created {} ({}) at sequence {}",
                key,
                format_bytes(size),
                body["sequence"]
            );
        }

        Commands::Update { key, file } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("cannot read {}", file.display()))?;
            let size = data.len() as u64;
            let req = api.client.post(api.url(&format!("/blobs/{}", key))).body(data);
            let body: Value = api.send(req).await?.json().await?;
            println!(
                "✓ Updated {} ({}) at sequence {}",
                key,
                format_bytes(size),
                body["sequence"]
            );
        }

        Commands::Cat { key, output } => {
            let resp = api
                .send(api.client.get(api.url(&format!("/blobs/{}", key))))
                .await?;
            let version = resp
                .headers()
                .get(VERSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let data = resp.bytes().await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &data)
                        .await
                        .with_context(|| format!("cannot write {}", path.display()))?;
                    println!(
                        "✓ Wrote {} to {} (version {})",
                        format_bytes(data.len() as u64),
                        path.display(),
                        version.as_deref().unwrap_or("?")
                    );
                }
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&data)?;
                }
            }
        }

        Commands::Delete { key } => {
            api.send(api.client.delete(api.url(&format!("/blobs/{}", key))))
                .await?;
            println!("✓ Deleted {}", key);
        }

        Commands::List => {
            let body: Value = api
                .send(api.client.get(api.url("/blobs")))
                .await?
                .json()
                .await?;
            if let Some(keys) = body["keys"].as_array() {
                for key in keys.iter().filter_map(Value::as_str) {
                    println!("{}", key);
                }
            }
        }

        Commands::Meta { key } => {
            let meta: ReadableBlobMeta = api
                .send(api.client.get(api.url(&format!("/blobs/{}/meta", key))))
                .await?
                .json()
                .await?;
            let modified = chrono::DateTime::from_timestamp_millis(meta.version)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| meta.version.to_string());
            println!("Key:         {}", key);
            println!("Version:     {} ({})", meta.version, modified);
            match meta.settable.replication_factor {
                Some(r) => println!("Replication: {}", r),
                None => println!("Replication: backend default"),
            }
            println!("ACL:");
            for entry in &meta.settable.acl {
                println!("  {}", entry);
            }
        }

        Commands::SetAcl { key, acl } => {
            let meta = SettableBlobMeta::new(AccessControl::parse_list(&acl)?);
            api.send(
                api.client
                    .put(api.url(&format!("/blobs/{}/meta", key)))
                    .json(&meta),
            )
            .await?;
            println!("✓ ACL of {} set to {}", key, acl);
        }

        Commands::Replication { key, set } => {
            let url = api.url(&format!("/blobs/{}/replication", key));
            let req = match set {
                Some(n) => api
                    .client
                    .put(url)
                    .json(&serde_json::json!({ "replication": n })),
                None => api.client.get(url),
            };
            let body: Value = api.send(req).await?.json().await?;
            println!("{}: replication {}", key, body["replication"]);
        }
    }

    Ok(())
}
