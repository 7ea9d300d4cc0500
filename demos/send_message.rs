//! Posts a message, optionally with a file, through the dispatcher.
//!
//! ```text
//! BUCKET_DISPATCH_TOKEN=... BUCKET_DISPATCH_CHANNEL_ID=... \
//!     cargo run --example send_message -- "hello" [path/to/file]
//! ```

use bucket_dispatch::dispatcher::{
    Dispatcher, DispatcherConfig,
    attachment::FileAttachment,
    request::{OutboundRequest, RequestBody, Route},
};
use http::Method;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CHANNEL_VAR: &str = "BUCKET_DISPATCH_CHANNEL_ID";

#[tokio::main]
async fn main() -> Result<(), bucket_dispatch::Error> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DispatcherConfig::from_env()?;
    let channel_id = std::env::var(CHANNEL_VAR).map_err(|_| format!("{CHANNEL_VAR} is not set"))?;

    let mut args = std::env::args().skip(1);
    let content = args.next().unwrap_or_else(|| "Hello from bucket_dispatch".to_owned());

    let mut files = Vec::new();
    if let Some(path) = args.next() {
        let filename = std::path::Path::new(&path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());
        let file = tokio::fs::File::open(&path).await?;
        files.push(FileAttachment::new(file, filename));
    }

    let dispatcher = Dispatcher::new(config);
    let request = OutboundRequest::builder()
        .route(Route::new(Method::POST, "/channels/{channel_id}/messages").param("channel_id", &channel_id))
        .body(RequestBody::Json(json!({ "content": content })))
        .files(files)
        .reason("send_message demo")
        .build();

    let result = dispatcher.dispatch(request).await;
    dispatcher.close();

    let response = result?;
    info!(status = %response.status(), body = %response.text(), "Message sent");
    Ok(())
}
