use crate::{DownloadFailure, ModelError, Result};
use futures::StreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Turns a byte count into coarse percentage callbacks.
///
/// A callback fires for 0%, every time the percentage advances by at least
/// `step`, and once for 100%, so a transfer produces at most `100 / step + 2`
/// calls.
#[derive(Debug)]
pub(crate) struct ProgressReporter {
    step: u8,
    last: Option<u8>,
}

impl ProgressReporter {
    pub(crate) fn new(step: u8) -> Self {
        Self {
            step: step.clamp(1, 100),
            last: None,
        }
    }

    pub(crate) fn update<F>(&mut self, percent: u8, on_progress: &F)
    where
        F: Fn(u8) + ?Sized,
    {
        let percent = percent.min(100);
        let due = match self.last {
            None => true,
            Some(last) if percent == 100 => last < 100,
            Some(last) => percent >= last.saturating_add(self.step),
        };
        if due {
            self.last = Some(percent);
            on_progress(percent);
        }
    }

    pub(crate) fn finish<F>(&mut self, on_progress: &F)
    where
        F: Fn(u8) + ?Sized,
    {
        self.update(100, on_progress);
    }
}

pub(crate) fn percent_of(written: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (written as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

fn transport(e: reqwest::Error) -> ModelError {
    ModelError::DownloadFailed(DownloadFailure::Transport(e.to_string()))
}

/// Download `url` into `dest` through `temp`.
///
/// Any stale `temp` from an interrupted attempt is purged first. Bytes only
/// ever reach `dest` through a single rename after the transfer succeeded;
/// on failure `temp` is removed and `dest` is left untouched.
pub(crate) async fn download_file<F>(
    client: &reqwest::Client,
    url: &str,
    temp: &Path,
    dest: &Path,
    step: u8,
    cancel: &CancellationToken,
    on_progress: &F,
) -> Result<u64>
where
    F: Fn(u8) + ?Sized,
{
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match tokio::fs::remove_file(temp).await {
        Ok(()) => tracing::debug!("Purged stale partial download {:?}", temp),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut reporter = ProgressReporter::new(step);

    let written = match transfer(client, url, temp, cancel, &mut reporter, on_progress).await {
        Ok(written) => written,
        Err(e) => {
            let _ = tokio::fs::remove_file(temp).await;
            return Err(e);
        }
    };

    if let Err(e) = tokio::fs::rename(temp, dest).await {
        let _ = tokio::fs::remove_file(temp).await;
        return Err(e.into());
    }

    reporter.finish(on_progress);
    Ok(written)
}

async fn transfer<F>(
    client: &reqwest::Client,
    url: &str,
    temp: &Path,
    cancel: &CancellationToken,
    reporter: &mut ProgressReporter,
    on_progress: &F,
) -> Result<u64>
where
    F: Fn(u8) + ?Sized,
{
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(ModelError::DownloadFailed(DownloadFailure::Cancelled));
        }
        response = client.get(url).send() => response.map_err(transport)?,
    };

    let status = response.status().as_u16();
    if !(200..400).contains(&status) {
        tracing::warn!(status, url, "Download rejected by server");
        return Err(ModelError::DownloadFailed(DownloadFailure::Status(status)));
    }

    let total = response.content_length().filter(|len| *len > 0);
    let mut file = tokio::fs::File::create(temp).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    reporter.update(0, on_progress);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ModelError::DownloadFailed(DownloadFailure::Cancelled));
            }
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(transport)?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;

        if let Some(total) = total {
            reporter.update(percent_of(written, total), on_progress);
        }
    }

    if let Some(total) = total {
        if written < total {
            return Err(ModelError::DownloadFailed(DownloadFailure::Transport(
                format!("connection closed after {written} of {total} bytes"),
            )));
        }
    }

    file.flush().await?;
    file.sync_all().await?;

    Ok(written)
}
