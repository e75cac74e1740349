use std::path::Path;

use anyhow::Context as _;

use crate::cli::InitArgs;

pub(crate) const TEST_FILE_NAME: &str = "loadr.yaml";

/// Ramps to 1000 then 1500 users against the users listing, then back down.
pub(crate) const TEMPLATE: &str = r#"# loadr test file. Run with: loadr run loadr.yaml
baseUrl: ${BASE_URL:-http://localhost:8000}

request:
  method: GET
  path: /user/users
  headers:
    accept: application/json
  timeout: 10s

stages:
  - { duration: 30s, target: 1000 }
  - { duration: 30s, target: 1500 }
  - { duration: 30s, target: 0 }

# Pause between two iterations of the same virtual user.
sleep: 2.1s
gracefulStop: 30s
thresholdInterval: 2s

tags:
  test: users

checks:
  - { name: "status is 200", status: 200 }
  - { name: "response time < 500ms", maxDuration: 500ms }
  - { name: "has JSON content type", header: content-type, contains: application/json }
  - { name: "returns array of users", jsonArray: true }

thresholds:
  http_req_duration: ["p(95)<500"]
  http_req_failed:
    - threshold: "rate<0.01"
      abortOnFail: true
      delayAbortEval: 10s
"#;

pub async fn init(args: InitArgs) -> anyhow::Result<()> {
    let root = &args.dir;
    tokio::fs::create_dir_all(root)
        .await
        .with_context(|| format!("failed to create dir: {}", root.display()))?;

    let path = root.join(TEST_FILE_NAME);
    write_file(&path, TEMPLATE, args.force).await?;
    println!("created {}", path.display());
    Ok(())
}

async fn write_file(path: &Path, contents: &str, force: bool) -> anyhow::Result<()> {
    if !force
        && tokio::fs::try_exists(path)
            .await
            .with_context(|| format!("failed to check file existence: {}", path.display()))?
    {
        anyhow::bail!(
            "refusing to overwrite existing file (use --force): {}",
            path.display()
        );
    }

    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("failed to write file: {}", path.display()))
}
