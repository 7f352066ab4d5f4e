//! `abridge status`: show what the server is doing.

use abridge_core::ServiceStatus;
use anyhow::Result;

use crate::http::ApiClient;

pub async fn execute(server: &str, json: bool) -> Result<()> {
    let client = ApiClient::new(server);
    let status: ServiceStatus = client.get_json("/api/status").await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    for line in render(&status) {
        println!("{line}");
    }
    Ok(())
}

fn render(status: &ServiceStatus) -> Vec<String> {
    let mut lines = vec![
        format!("Model:   {}", status.model),
        format!("Device:  {}", status.device),
        format!(
            "Loaded:  {}",
            if status.model_loaded { "yes" } else { "no" }
        ),
    ];

    if status.model_loading.is_loading {
        lines.push(format!(
            "Loading: {} ({}%)",
            status.model_loading.step, status.model_loading.progress
        ));
    }

    let job = &status.current_job;
    if job.in_progress {
        let stage = job
            .stage
            .and_then(|stage| serde_json::to_value(stage).ok())
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_else(|| "Queued".to_string());
        lines.push(format!(
            "Job:     {} ({}%), {} input words",
            stage,
            job.progress.unwrap_or(0),
            job.input_word_count.unwrap_or(0)
        ));
        if let Some(seconds) = job.time_remaining {
            lines.push(format!("Left:    ~{seconds}s"));
        }
    } else {
        lines.push("Job:     idle".to_string());
    }
    lines
}
