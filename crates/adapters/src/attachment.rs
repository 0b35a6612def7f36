// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Attachment resolution for the initial prompt (`spec.md` §4.5 step 6):
//! fetch-and-encode a URL, or pass inline base64 straight through.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::time::Duration;
use thiserror::Error;
use wm_wire::Attachment;

use crate::engine::PromptImage;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("attachment has neither a url nor inline base64")]
    NoSource,
    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
}

/// Resolve one attachment to a base64-encoded image ready to push into the
/// prompt content.
pub async fn resolve_attachment(attachment: &Attachment) -> Result<PromptImage, AttachmentError> {
    let base64 = if let Some(inline) = &attachment.base64 {
        inline.clone()
    } else if let Some(url) = &attachment.url {
        let client = reqwest::Client::new();
        let bytes = client.get(url).timeout(FETCH_TIMEOUT).send().await?.error_for_status()?.bytes().await?;
        STANDARD.encode(bytes)
    } else {
        return Err(AttachmentError::NoSource);
    };

    Ok(PromptImage { filename: attachment.filename.clone(), media_type: attachment.media_type.clone(), base64 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inline_base64_passes_through_without_fetching() {
        let attachment = Attachment { filename: "a.png".into(), media_type: "image/png".into(), url: None, base64: Some("aGVsbG8=".into()) };
        let image = resolve_attachment(&attachment).await.unwrap();
        assert_eq!(image.base64, "aGVsbG8=");
        assert_eq!(image.filename, "a.png");
    }

    #[tokio::test]
    async fn neither_url_nor_base64_errors() {
        let attachment = Attachment { filename: "a.png".into(), media_type: "image/png".into(), url: None, base64: None };
        let err = resolve_attachment(&attachment).await.unwrap_err();
        assert!(matches!(err, AttachmentError::NoSource));
    }
}
