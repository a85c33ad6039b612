use std::sync::Arc;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;

use assetpipe::{Config, ConfigError, Pipeline, PipelineError, TaskName};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Task or entry point to run.
    #[arg(value_enum, default_value_t = Command::Default)]
    task: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Html,
    Style,
    CleanStyle,
    Script,
    Image,
    ImageWebp,
    ImageAvif,
    /// Watch sources and rebuild on change.
    #[value(alias = "watch")]
    Dev,
    /// Build the images, then watch.
    Default,
}

impl Command {
    fn task(self) -> Option<TaskName> {
        match self {
            Command::Html => Some(TaskName::Html),
            Command::Style => Some(TaskName::Style),
            Command::CleanStyle => Some(TaskName::CleanStyle),
            Command::Script => Some(TaskName::Script),
            Command::Image => Some(TaskName::Image),
            Command::ImageWebp => Some(TaskName::ImageWebp),
            Command::ImageAvif => Some(TaskName::ImageAvif),
            Command::Dev | Command::Default => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    #[cfg(feature = "logging")]
    assetpipe::logging::init_logging()?;

    let root = Utf8PathBuf::try_from(std::env::current_dir()?).map_err(ConfigError::from)?;
    let config = Config::new(root);
    config.validate().map_err(PipelineError::from)?;

    let pipeline = Arc::new(Pipeline::new(config));

    if let Some(task) = args.task.task() {
        let report = tokio::task::spawn_blocking(move || pipeline.run(task))
            .await
            .context("task panicked")??;

        tracing::info!("done, {report}");
        return Ok(());
    }

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, shutting down...");
            }
            token.cancel();
        }
    });

    match args.task {
        Command::Dev => pipeline.run_dev(token).await?,
        _ => {
            pipeline.run_default(token).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_entry_point() {
        let args = Args::try_parse_from(["assetpipe"]).unwrap();
        assert_eq!(args.task, Command::Default);
    }

    #[test]
    fn test_watch_alias() {
        let args = Args::try_parse_from(["assetpipe", "watch"]).unwrap();
        assert_eq!(args.task, Command::Dev);
    }

    #[test]
    fn test_task_names() {
        for (arg, task) in [
            ("clean-style", TaskName::CleanStyle),
            ("image-webp", TaskName::ImageWebp),
            ("image-avif", TaskName::ImageAvif),
        ] {
            let args = Args::try_parse_from(["assetpipe", arg]).unwrap();
            assert_eq!(args.task.task(), Some(task));
        }

        assert!(Args::try_parse_from(["assetpipe", "deploy"]).is_err());
    }
}
