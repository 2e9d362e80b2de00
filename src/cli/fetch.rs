use std::path::PathBuf;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    config::Settings,
    error,
    service::TrackStream,
    success,
    types::TrackQuery,
};

/// One track to pull through the cache.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub isrc: Option<String>,
    pub title: Option<String>,
    pub artists: Vec<String>,
    pub duration: Option<u32>,
    /// Write here instead of stdout.
    pub output: Option<PathBuf>,
}

impl FetchRequest {
    fn query(&self) -> TrackQuery {
        let mut query = TrackQuery::new(self.title.clone().unwrap_or_default(), self.artists.clone());
        query.external_id = self.isrc.clone();
        query.duration_hint = self.duration;
        query
    }
}

pub async fn fetch(settings: &Settings, request: FetchRequest) {
    let service = super::open_service(settings).await;
    let to_stdout = request.output.is_none();

    let pb = super::spinner("Resolving track...");
    let mut stream = match service.request_stream(request.query()).await {
        Ok(stream) => stream,
        Err(e) => {
            pb.finish_and_clear();
            error!("Cannot stream track. Err: {}", e);
        }
    };
    pb.set_message(format!("Streaming {}...", stream.key));

    let copied = match &request.output {
        Some(path) => match tokio::fs::File::create(path).await {
            Ok(mut file) => copy_stream(&mut stream, &mut file, &pb).await,
            Err(e) => {
                pb.finish_and_clear();
                error!("Cannot create {}. Err: {}", path.display(), e);
            }
        },
        None => copy_stream(&mut stream, &mut tokio::io::stdout(), &pb).await,
    };
    pb.finish_and_clear();

    match copied {
        Ok(bytes) if !to_stdout => success!(
            "Wrote {} ({}) to {}",
            stream.key,
            super::format_bytes(bytes),
            request.output.as_deref().map(|p| p.display().to_string()).unwrap_or_default()
        ),
        Ok(_) => {}
        Err(e) => error!("Streaming {} failed. Err: {}", stream.key, e),
    }
}

async fn copy_stream<W>(
    stream: &mut TrackStream,
    out: &mut W,
    pb: &indicatif::ProgressBar,
) -> crate::Res<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    while let Some(chunk) = stream.next_chunk().await? {
        out.write_all(&chunk).await?;
        total += chunk.len() as u64;
        pb.set_message(format!("Streaming {}... {}", stream.key, super::format_bytes(total)));
    }
    out.flush().await?;
    Ok(total)
}
