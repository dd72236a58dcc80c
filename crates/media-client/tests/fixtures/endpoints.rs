//! Test proxies and context builders

use super::mock_media_server::MockMediaServer;
use remotemedia_media_client::{
    Command, MediaApiConfig, MediaContext, MediaObject, MediaObjectProxy, Result,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Kind tag of [`PlayerEndpoint`]
pub const PLAYER_KIND: &str = "PlayerEndpoint";

/// Kind tag of [`RecorderEndpoint`]
pub const RECORDER_KIND: &str = "RecorderEndpoint";

/// Decoded result of the `getPosition` command
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Position {
    pub millis: u64,
}

/// Typed proxy used to exercise the generic object machinery
#[derive(Debug)]
pub struct PlayerEndpoint {
    object: MediaObject,
}

impl PlayerEndpoint {
    pub fn position(&self) -> Result<Position> {
        self.object
            .send_command_as::<Position>(&Command::new("getPosition", Vec::new()))
    }
}

impl MediaObjectProxy for PlayerEndpoint {
    fn media_object(&self) -> &MediaObject {
        &self.object
    }
}

/// Second kind, to check that equality needs the same concrete type
#[derive(Debug)]
pub struct RecorderEndpoint {
    object: MediaObject,
}

impl MediaObjectProxy for RecorderEndpoint {
    fn media_object(&self) -> &MediaObject {
        &self.object
    }
}

/// Config with small, test-friendly bounds
pub fn test_config(max_connections: usize) -> MediaApiConfig {
    MediaApiConfig::new()
        .with_handler("127.0.0.1", 9999)
        .with_max_connections(max_connections)
        .with_acquire_timeout(Duration::from_millis(500))
}

fn register_kinds(ctx: &MediaContext) {
    ctx.objects()
        .register(PLAYER_KIND, |object| PlayerEndpoint { object })
        .expect("register player");
    ctx.objects()
        .register(RECORDER_KIND, |object| RecorderEndpoint { object })
        .expect("register recorder");
    ctx.results()
        .register_json::<Position>("getPosition")
        .expect("register getPosition");
}

/// Context on the current tokio runtime
pub fn async_context(server: &Arc<MockMediaServer>, config: MediaApiConfig) -> MediaContext {
    let ctx = MediaContext::new(server.connector(), config).expect("context");
    register_kinds(&ctx);
    ctx
}

/// Context for blocking tests; the runtime drives non-blocking completions
pub struct Harness {
    pub runtime: Runtime,
    pub server: Arc<MockMediaServer>,
    pub ctx: MediaContext,
}

impl Harness {
    pub fn new(max_connections: usize) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("runtime");
        let server = MockMediaServer::new();
        let ctx = MediaContext::builder(server.connector())
            .config(test_config(max_connections))
            .runtime(runtime.handle().clone())
            .build()
            .expect("context");
        register_kinds(&ctx);

        Self {
            runtime,
            server,
            ctx,
        }
    }
}
