mod common;

use anyhow::Context as _;
use serde_json::Value;
use std::time::Duration;
use tempfile::tempdir;

use common::{
    KillOnDrop, PETS_SPEC, eventually, get_json, pick_unused_port, spawn_adapter, wait_http_ok,
};

fn names(tools: &Value) -> Vec<String> {
    tools
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|t| t.get("name").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn serves_tool_listings_and_reports_failed_namespaces() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let spec = dir.path().join("pets.yaml");
    std::fs::write(&spec, PETS_SPEC)?;
    let cfg_path = dir.path().join("config.yaml");
    std::fs::write(
        &cfg_path,
        format!(
            r"servers:
  - namespace: pets
    url: {}
    base_url: http://127.0.0.1:9/api
    paths: ['^/pets']
  - namespace: broken
    url: {}
    base_url: http://127.0.0.1:9
    paths: ['.*']
",
            spec.display(),
            dir.path().join("missing.yaml").display()
        ),
    )?;

    let port = pick_unused_port()?;
    let _child = KillOnDrop(spawn_adapter(&cfg_path, port)?);
    let base = format!("http://127.0.0.1:{port}");
    wait_http_ok(&format!("{base}/health"), Duration::from_secs(30)).await?;

    let (status, health) = get_json(&format!("{base}/health")).await?;
    assert_eq!(status, 200);
    assert_eq!(health["namespaces"], serde_json::json!(["pets"]));
    assert_eq!(health["tools"], 2);
    assert!(
        health["failures"].get("broken").is_some(),
        "expected broken namespace in failures: {health}"
    );

    let (status, all) = get_json(&format!("{base}/tools")).await?;
    assert_eq!(status, 200);
    let mut all_names = names(&all);
    all_names.sort();
    assert_eq!(all_names, ["pets.getPet", "pets.listPets"]);

    let (status, pets) = get_json(&format!("{base}/tools/pets")).await?;
    assert_eq!(status, 200);
    let get_pet = pets
        .as_array()
        .and_then(|a| a.iter().find(|t| t["name"] == "getPet"))
        .context("getPet missing")?;
    let params = get_pet["parameters"].as_array().context("parameters")?;
    assert_eq!(params.len(), 1);
    assert_eq!(params[0]["name"], "petId");
    assert_eq!(params[0]["required"], true);

    let (status, missing) = get_json(&format!("{base}/tools/nope")).await?;
    assert_eq!(status, 404);
    assert_eq!(missing["error"], "Namespace 'nope' not found");
    Ok(())
}

#[tokio::test]
async fn reloads_when_spec_file_changes() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let spec = dir.path().join("pets.yaml");
    // Start with only the collection endpoint.
    let initial = PETS_SPEC
        .split("  /pets/{petId}:")
        .next()
        .context("split spec")?
        .to_string();
    std::fs::write(&spec, &initial)?;

    let cfg_path = dir.path().join("config.yaml");
    std::fs::write(
        &cfg_path,
        format!(
            "servers:\n  - namespace: pets\n    url: {}\n    base_url: http://127.0.0.1:9\n    paths: ['^/pets']\n",
            spec.display()
        ),
    )?;

    let port = pick_unused_port()?;
    let _child = KillOnDrop(spawn_adapter(&cfg_path, port)?);
    let base = format!("http://127.0.0.1:{port}");
    wait_http_ok(&format!("{base}/health"), Duration::from_secs(30)).await?;

    let (_, before) = get_json(&format!("{base}/tools/pets")).await?;
    assert_eq!(names(&before), ["listPets"]);
    let (_, health) = get_json(&format!("{base}/health")).await?;
    let first_generation = health["generation"].as_u64().context("generation")?;

    std::fs::write(&spec, PETS_SPEC)?;

    let url = format!("{base}/tools/pets");
    eventually(Duration::from_secs(15), || {
        let url = url.clone();
        async move {
            let (_, tools) = get_json(&url).await?;
            Ok(names(&tools).len() == 2)
        }
    })
    .await?;

    let (_, health) = get_json(&format!("{base}/health")).await?;
    assert!(health["generation"].as_u64().context("generation")? > first_generation);

    // A broken config keeps the last good tools published.
    std::fs::write(&cfg_path, "servers: [not: valid")?;
    tokio::time::sleep(Duration::from_millis(800)).await;
    let (status, after) = get_json(&url).await?;
    assert_eq!(status, 200);
    assert_eq!(names(&after).len(), 2);
    Ok(())
}

#[tokio::test]
async fn reloads_when_a_referenced_file_changes() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let models = dir.path().join("models.yaml");
    std::fs::write(
        &models,
        "Pet:\n  type: object\n  properties:\n    name: { type: string }\n",
    )?;
    let spec = dir.path().join("api.yaml");
    std::fs::write(
        &spec,
        r#"openapi: 3.0.3
info: { title: Split, version: "1" }
paths:
  /pets:
    post:
      operationId: createPet
      requestBody:
        content:
          application/json:
            schema: { $ref: "./models.yaml#/Pet" }
      responses: {}
"#,
    )?;
    let cfg_path = dir.path().join("config.yaml");
    std::fs::write(
        &cfg_path,
        format!(
            "servers:\n  - namespace: split\n    url: {}\n    base_url: http://127.0.0.1:9\n    paths: ['^/pets']\n",
            spec.display()
        ),
    )?;

    let port = pick_unused_port()?;
    let _child = KillOnDrop(spawn_adapter(&cfg_path, port)?);
    let base = format!("http://127.0.0.1:{port}");
    wait_http_ok(&format!("{base}/health"), Duration::from_secs(30)).await?;

    let url = format!("{base}/tools/split");
    let (_, before) = get_json(&url).await?;
    assert_eq!(before[0]["parameters"].as_array().context("parameters")?.len(), 1);

    std::fs::write(
        &models,
        "Pet:\n  type: object\n  properties:\n    name: { type: string }\n    tag: { type: string }\n",
    )?;

    eventually(Duration::from_secs(15), || {
        let url = url.clone();
        async move {
            let (_, tools) = get_json(&url).await?;
            Ok(tools[0]["parameters"].as_array().is_some_and(|p| p.len() == 2))
        }
    })
    .await?;
    Ok(())
}
