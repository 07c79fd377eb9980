#![allow(dead_code)]

use anyhow::Context as _;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::time::Duration;

pub use mcp_openapi_test_support::{EchoUpstream, KillOnDrop};

pub const BIN: &str = env!("CARGO_BIN_EXE_mcp-openapi-adapter");

pub fn pick_unused_port() -> anyhow::Result<u16> {
    mcp_openapi_test_support::pick_unused_port()
}

pub async fn wait_http_ok(url: &str, timeout_dur: Duration) -> anyhow::Result<()> {
    mcp_openapi_test_support::wait_http_ok(url, timeout_dur).await
}

pub fn spawn_adapter(config_path: &Path, port: u16) -> anyhow::Result<Child> {
    Command::new(BIN)
        .arg("--log-level")
        .arg("info")
        .arg("serve")
        .arg("--config")
        .arg(config_path)
        .arg("--bind")
        .arg(format!("127.0.0.1:{port}"))
        .arg("--watch-interval")
        .arg("0.2")
        .spawn()
        .context("spawn adapter")
}

/// Run a one-shot subcommand to completion.
pub fn run_cli(args: &[&str]) -> anyhow::Result<Output> {
    Command::new(BIN)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .context("run adapter cli")
}

pub async fn get_json(url: &str) -> anyhow::Result<(u16, serde_json::Value)> {
    let resp = reqwest::get(url).await.with_context(|| format!("GET {url}"))?;
    let status = resp.status().as_u16();
    let body = resp.json().await.context("decode json")?;
    Ok((status, body))
}

/// Poll `check` until it returns true or `timeout_dur` elapses.
pub async fn eventually<F, Fut>(timeout_dur: Duration, mut check: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    let deadline = tokio::time::Instant::now() + timeout_dur;
    loop {
        if check().await? {
            return Ok(());
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("condition not met within {timeout_dur:?}");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

pub const PETS_SPEC: &str = r#"openapi: 3.0.3
info:
  title: Pets
  version: "1.0"
paths:
  /pets:
    get:
      operationId: listPets
      summary: List pets
      parameters:
        - name: limit
          in: query
          schema:
            type: integer
            default: 10
      responses:
        "200":
          description: ok
  /pets/{petId}:
    get:
      operationId: getPet
      parameters:
        - name: petId
          in: path
          required: true
          schema:
            type: string
      responses:
        "200":
          description: ok
  /admin/stats:
    get:
      operationId: adminStats
      responses:
        "200":
          description: ok
"#;
