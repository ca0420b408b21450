use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio::fs::{create_dir_all, remove_file, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};

use crate::err::Error;

/// How long a staged temp file survives after the payload has been captured.
pub const UPLOAD_GRACE: Duration = Duration::from_secs(10);

/// An uploaded file fully read back from the staging directory, ready to be
/// inlined into a project record.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub file_name: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct UploadStage {
    dir: PathBuf,
    grace: Duration,
}

impl UploadStage {
    pub async fn prepare(dir: PathBuf, grace: Duration) -> anyhow::Result<Self> {
        create_dir_all(&dir).await?;
        Ok(Self { dir, grace })
    }

    /// Writes the inbound bytes to a temp file named after the original file
    /// plus the current millisecond timestamp, reads the file back fully, and
    /// schedules its deletion after the grace period. Deletion is
    /// fire-and-forget; failures are not observed.
    pub async fn materialize(&self, file_name: &str, bytes: &[u8]) -> Result<StagedFile, Error> {
        let local_name = format!("{}{}", file_name, Utc::now().timestamp_millis());
        let path = self.dir.join(local_name);

        {
            let mut writer = BufWriter::new(File::create(&path).await?);
            writer.write_all(bytes).await?;
            writer.flush().await?;
        }

        let mut payload = Vec::new();
        BufReader::new(File::open(&path).await?)
            .read_to_end(&mut payload)
            .await?;

        let grace = self.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = remove_file(path).await;
        });

        Ok(StagedFile {
            file_name: file_name.to_string(),
            payload,
        })
    }
}
