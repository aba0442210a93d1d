#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use config::{CliArgs, DemoConfig};
use gridlink_client::{CancellationToken, GridClient, TaskNode};
use telemetry::init_telemetry;
use tokio::signal;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = DemoConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let outcome = run(&config, &cancel).await;
    providers.shutdown();

    for line in outcome?.lines() {
        println!("{line}");
    }
    Ok(())
}

/// Submits one task whose payload is the configured text and returns the
/// content of its single output once the cluster completes it.
async fn run(config: &DemoConfig, cancel: &CancellationToken) -> anyhow::Result<String> {
    let client = GridClient::connect_lazy(&config.client)?;
    let defaults = &config.task_defaults;

    let session = client
        .sessions()
        .create_session(defaults, [defaults.partition_id.clone()], cancel)
        .await
        .context("failed to create session")?;

    let payload = client
        .blobs()
        .create_blob(
            &session,
            "payload",
            Bytes::from(config.payload.clone()),
            cancel,
        )
        .await
        .context("failed to create payload")?;
    let output = client
        .blobs()
        .create_blob_metadata(&session, "result", cancel)
        .await
        .context("failed to create output")?;

    let mut node = TaskNode::new(payload, vec![output.clone()]);
    if let Some((name, text)) = &config.dependency {
        node = node.with_dependency_content(name.clone(), Bytes::from(text.clone()));
    }

    let submitted = client
        .tasks()
        .submit_tasks(&session, vec![node], None, cancel)
        .await
        .context("failed to submit task")?;
    for _task in &submitted {
        #[cfg(feature = "tracing")]
        tracing::info!(
            task_id = %_task.task_id,
            dependencies = _task.data_dependencies.len(),
            "Task submitted"
        );
    }

    client
        .events()
        .wait_for_blobs(&session, core::slice::from_ref(&output), cancel)
        .await
        .context("task output never completed")?;

    let content = client
        .transfer()
        .download_all(&output, cancel)
        .await
        .context("failed to download output")?;
    client.close();

    Ok(String::from_utf8_lossy(&content).into_owned())
}

/// Cancels `cancel` on Ctrl+C or SIGTERM so in-flight calls stop at their
/// next suspension point.
async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => core::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    cancel.cancel();
}
