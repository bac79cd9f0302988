//! Lossless container-level joins through the concat demuxer.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use stitch_models::encoding::MIN_OUTPUT_FILE_SIZE;

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::runner::Engine;

/// Quote a path for a concat list entry.
fn quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', "'\\''"))
}

/// Render concat demuxer list contents, one `file` line per input.
pub fn concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| format!("file {}\n", quote(p)))
        .collect()
}

/// Write the concat list for `inputs` to `list_path`.
pub async fn write_concat_list(inputs: &[PathBuf], list_path: impl AsRef<Path>) -> MediaResult<()> {
    tokio::fs::write(list_path.as_ref(), concat_list(inputs)).await?;
    Ok(())
}

/// Write the list for `inputs` and run the concat demuxer over it.
///
/// `shape` adds output arguments to the stream-copy command.
async fn run_concat(
    engine: &Engine,
    inputs: &[PathBuf],
    list_path: &Path,
    output: &Path,
    timeout: Duration,
    min_size: u64,
    shape: impl FnOnce(FfmpegCommand) -> FfmpegCommand,
) -> MediaResult<u64> {
    if inputs.is_empty() {
        return Err(MediaError::internal("Nothing to concatenate"));
    }
    write_concat_list(inputs, list_path).await?;

    let cmd = shape(FfmpegCommand::new(list_path, output).concat_demuxer());
    engine.transcode_min(&cmd, timeout, min_size).await
}

/// Join `inputs` in order with a stream copy.
///
/// `min_size` is the smallest acceptable output. Returns the output size.
pub async fn concat_files(
    engine: &Engine,
    inputs: &[PathBuf],
    list_path: impl AsRef<Path>,
    output: impl AsRef<Path>,
    timeout: Duration,
    min_size: u64,
) -> MediaResult<u64> {
    run_concat(
        engine,
        inputs,
        list_path.as_ref(),
        output.as_ref(),
        timeout,
        min_size,
        FfmpegCommand::codec_copy,
    )
    .await
}

/// Join canonical video-only streams in input order.
pub async fn concat_videos(
    engine: &Engine,
    inputs: &[PathBuf],
    list_path: impl AsRef<Path>,
    output: impl AsRef<Path>,
    timeout: Duration,
) -> MediaResult<u64> {
    let size = run_concat(
        engine,
        inputs,
        list_path.as_ref(),
        output.as_ref(),
        timeout,
        MIN_OUTPUT_FILE_SIZE,
        |cmd| cmd.map("0:v:0").video_codec("copy").no_audio().faststart(),
    )
    .await?;
    info!(segments = inputs.len(), size, "Concatenated video streams");
    Ok(size)
}
