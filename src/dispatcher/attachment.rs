//! File attachments and multipart encoding.

use std::{fmt, io::SeekFrom};

use bytes::Bytes;
use serde_json::Value;
use snafu::ResultExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use super::{
    error::{AttachmentTypeMismatchSnafu, DispatchError, InvalidRequestSnafu, ReadAttachmentSnafu},
    http::{MultipartFile, Payload},
    request::RequestBody,
};

/// A readable, seekable stream.
pub trait SeekableSource: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> SeekableSource for T {}

/// Where an attachment's bytes come from.
pub enum AttachmentSource {
    /// Rewound to the start before every retry.
    Seekable(Box<dyn SeekableSource>),
    /// In memory; every attempt sends the same bytes.
    Bytes(Bytes),
    /// Readable exactly once. Uploads need to resend on retry, so these are refused.
    OneShot(Box<dyn AsyncRead + Send + Unpin>),
}

impl fmt::Debug for AttachmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentSource::Seekable(_) => f.write_str("Seekable(..)"),
            AttachmentSource::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            AttachmentSource::OneShot(_) => f.write_str("OneShot(..)"),
        }
    }
}

/// A file to upload alongside a request.
///
/// The caller hands over a stream positioned at its start; the dispatcher rewinds it on
/// every retry, so nothing else should move it while a dispatch is in flight.
#[derive(Debug)]
pub struct FileAttachment {
    source: AttachmentSource,
    filename: String,
}

impl FileAttachment {
    pub fn new(reader: impl AsyncRead + AsyncSeek + Send + Unpin + 'static, filename: impl Into<String>) -> Self {
        Self::from_source(AttachmentSource::Seekable(Box::new(reader)), filename)
    }

    pub fn from_bytes(bytes: impl Into<Bytes>, filename: impl Into<String>) -> Self {
        Self::from_source(AttachmentSource::Bytes(bytes.into()), filename)
    }

    /// Wraps a stream that cannot be rewound. Dispatching it fails with
    /// [`DispatchError::AttachmentTypeMismatch`].
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static, filename: impl Into<String>) -> Self {
        Self::from_source(AttachmentSource::OneShot(Box::new(reader)), filename)
    }

    pub fn from_source(source: AttachmentSource, filename: impl Into<String>) -> Self {
        Self {
            source,
            filename: filename.into(),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn source(&self) -> &AttachmentSource {
        &self.source
    }

    fn check(&self, index: usize) -> Result<(), DispatchError> {
        let details = match self.source {
            AttachmentSource::OneShot(_) => "stream cannot be rewound for retries",
            _ if self.filename.is_empty() => "filename is empty",
            _ => return Ok(()),
        };
        AttachmentTypeMismatchSnafu {
            index,
            filename: self.filename.clone(),
            details,
        }
        .fail()
    }

    async fn rewind(&mut self) -> std::io::Result<()> {
        if let AttachmentSource::Seekable(reader) = &mut self.source {
            reader.seek(SeekFrom::Start(0)).await?;
        }
        Ok(())
    }

    async fn read_all(&mut self) -> std::io::Result<Bytes> {
        match &mut self.source {
            AttachmentSource::Seekable(reader) => {
                let mut data = Vec::new();
                reader.read_to_end(&mut data).await?;
                Ok(data.into())
            }
            AttachmentSource::Bytes(bytes) => Ok(bytes.clone()),
            AttachmentSource::OneShot(reader) => {
                let mut data = Vec::new();
                reader.read_to_end(&mut data).await?;
                Ok(data.into())
            }
        }
    }
}

/// Encodes `files` (as `file_0`, `file_1`, ...) plus the body's top-level fields into a
/// multipart payload for attempt number `attempt`.
///
/// Every attachment is validated before anything is read, and streams are rewound on every
/// attempt but the first.
pub(crate) async fn encode_multipart(
    files: &mut [FileAttachment],
    body: Option<&RequestBody>,
    attempt: usize,
) -> Result<Payload, DispatchError> {
    for (index, file) in files.iter().enumerate() {
        file.check(index)?;
    }
    let fields = form_fields(body)?;

    let mut parts = Vec::with_capacity(files.len());
    for (index, file) in files.iter_mut().enumerate() {
        if attempt > 0 {
            file.rewind().await.context(ReadAttachmentSnafu {
                filename: file.filename.clone(),
            })?;
        }
        let data = file.read_all().await.context(ReadAttachmentSnafu {
            filename: file.filename.clone(),
        })?;
        parts.push(MultipartFile {
            field: format!("file_{index}"),
            filename: file.filename.clone(),
            data,
        });
    }

    Ok(Payload::Multipart {
        fields,
        files: parts,
    })
}

fn form_fields(body: Option<&RequestBody>) -> Result<Vec<(String, String)>, DispatchError> {
    match body {
        None | Some(RequestBody::Json(Value::Null)) => Ok(Vec::new()),
        Some(RequestBody::Json(Value::Object(map))) => Ok(map
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect()),
        Some(RequestBody::Json(_)) => InvalidRequestSnafu {
            details: "only a JSON object body can accompany file attachments",
        }
        .fail(),
        Some(RequestBody::Raw { .. }) => InvalidRequestSnafu {
            details: "a raw body cannot accompany file attachments",
        }
        .fail(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use serde_json::json;

    use super::*;

    fn files_of(payload: &Payload) -> Vec<(String, String, Bytes)> {
        match payload {
            Payload::Multipart { files, .. } => files
                .iter()
                .map(|f| (f.field.clone(), f.filename.clone(), f.data.clone()))
                .collect(),
            other => panic!("expected multipart, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn names_parts_in_order() {
        let mut files = vec![
            FileAttachment::new(Cursor::new(b"first".to_vec()), "a.txt"),
            FileAttachment::from_bytes(&b"second"[..], "b.bin"),
        ];
        let payload = encode_multipart(&mut files, None, 0).await.unwrap();

        assert_eq!(
            files_of(&payload),
            vec![
                ("file_0".to_owned(), "a.txt".to_owned(), Bytes::from_static(b"first")),
                ("file_1".to_owned(), "b.bin".to_owned(), Bytes::from_static(b"second")),
            ]
        );
    }

    #[tokio::test]
    async fn retries_rewind_seekable_streams() {
        let mut files = vec![FileAttachment::new(Cursor::new(b"payload".to_vec()), "p.txt")];

        let first = encode_multipart(&mut files, None, 0).await.unwrap();
        let second = encode_multipart(&mut files, None, 1).await.unwrap();
        let third = encode_multipart(&mut files, None, 2).await.unwrap();

        for payload in [first, second, third] {
            assert_eq!(files_of(&payload)[0].2, Bytes::from_static(b"payload"));
        }
    }

    #[tokio::test]
    async fn first_attempt_trusts_caller_position() {
        let mut cursor = Cursor::new(b"skipped:kept".to_vec());
        cursor.set_position(8);
        let mut files = vec![FileAttachment::new(cursor, "partial.txt")];

        let payload = encode_multipart(&mut files, None, 0).await.unwrap();
        assert_eq!(files_of(&payload)[0].2, Bytes::from_static(b"kept"));
    }

    #[tokio::test]
    async fn one_shot_streams_are_rejected() {
        let mut files = vec![
            FileAttachment::from_bytes(&b"ok"[..], "ok.txt"),
            FileAttachment::from_reader(&b"once"[..], "once.txt"),
        ];
        let err = encode_multipart(&mut files, None, 0).await.unwrap_err();

        assert!(matches!(
            err,
            DispatchError::AttachmentTypeMismatch { index: 1, ref filename, .. } if filename == "once.txt"
        ));
    }

    #[tokio::test]
    async fn empty_filename_is_rejected() {
        let mut files = vec![FileAttachment::from_bytes(&b"data"[..], "")];
        let err = encode_multipart(&mut files, None, 0).await.unwrap_err();
        assert!(matches!(err, DispatchError::AttachmentTypeMismatch { index: 0, .. }));
    }

    #[tokio::test]
    async fn json_fields_are_flattened() {
        let mut files = vec![FileAttachment::from_bytes(&b"x"[..], "x.txt")];
        let body = RequestBody::Json(json!({ "content": "hi", "tts": false, "embeds": [] }));
        let payload = encode_multipart(&mut files, Some(&body), 0).await.unwrap();

        let Payload::Multipart { mut fields, .. } = payload else {
            panic!("expected multipart");
        };
        fields.sort();
        assert_eq!(
            fields,
            vec![
                ("content".to_owned(), "hi".to_owned()),
                ("embeds".to_owned(), "[]".to_owned()),
                ("tts".to_owned(), "false".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn non_object_bodies_cannot_be_flattened() {
        let mut files = vec![FileAttachment::from_bytes(&b"x"[..], "x.txt")];

        let array = RequestBody::Json(json!([1, 2]));
        let err = encode_multipart(&mut files, Some(&array), 0).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRequest { .. }));

        let raw = RequestBody::Raw {
            content_type: "text/plain".to_owned(),
            bytes: Bytes::from_static(b"raw"),
        };
        let err = encode_multipart(&mut files, Some(&raw), 0).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRequest { .. }));
    }
}
