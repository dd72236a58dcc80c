//! Non-blocking operations and their continuations

mod fixtures;

use fixtures::endpoints::{async_context, test_config, PlayerEndpoint, Position, PLAYER_KIND};
use fixtures::mock_media_server::{Fault, MockMediaServer};
use remotemedia_media_client::{
    Command, Continuation, Error, MediaEvent, MediaObjectProxy, MediaObjectRef,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_async_release_resolves_once_and_returns_connection() -> anyhow::Result<()> {
    let server = MockMediaServer::new();
    server.add_pipeline("p1");
    let ctx = async_context(&server, test_config(1));
    let pipeline = ctx.pipeline("p1")?;

    server.fail("release", Fault::Server(40001));

    let resolutions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&resolutions);
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    pipeline.release_async(Continuation::new(move |result: remotemedia_media_client::Result<()>| {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = done_tx.send(result);
    }));

    let err = done_rx.await?.unwrap_err();
    assert!(err.is_application());
    assert_eq!(err.code(), 40001);

    // Let any stray second resolution land before counting
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(resolutions.load(Ordering::SeqCst), 1);

    let stats = ctx.pool().non_blocking_stats();
    assert_eq!(stats.acquired, 1);
    assert_eq!(stats.released, 1);
    assert_eq!(stats.leased, 0);
    assert!(!pipeline.is_released());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_release_marks_object() -> anyhow::Result<()> {
    let server = MockMediaServer::new();
    let pipeline_ref = server.add_pipeline("p1");
    let ctx = async_context(&server, test_config(1));
    let pipeline = ctx.pipeline("p1")?;

    let (cont, rx) = Continuation::channel();
    pipeline.release_async(cont);
    rx.await??;

    assert!(pipeline.is_released());
    assert!(ctx.objects().lookup(&pipeline_ref).is_none());

    let (cont, rx) = Continuation::channel();
    pipeline.keep_alive_async(cont);
    assert!(matches!(rx.await?, Err(Error::Released(_))));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_listener_round_trip() -> anyhow::Result<()> {
    let server = MockMediaServer::new();
    let pipeline_ref = server.add_pipeline("p1");
    let player_ref = server.add_element(PLAYER_KIND, "player-1", &pipeline_ref);
    let ctx = async_context(&server, test_config(2));
    let player = ctx.resolve(player_ref.clone())?;

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let (cont, rx) = Continuation::channel();
    player.media_object().add_listener_async(
        Arc::new(move |_: &MediaObjectRef, _: &MediaEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
        cont,
    );
    let subscription = rx.await??;
    assert!(ctx.listeners().contains(&subscription));

    ctx.dispatch_event(
        &player_ref,
        subscription.token(),
        &MediaEvent::new("EndOfStream", Vec::new()),
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let (cont, rx) = Continuation::channel();
    player
        .media_object()
        .remove_listener_async(subscription, cont);
    rx.await??;
    assert!(ctx.listeners().is_empty());
    assert_eq!(server.subscriptions(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_parent_and_pipeline_are_cached() -> anyhow::Result<()> {
    let server = MockMediaServer::new();
    let pipeline_ref = server.add_pipeline("p1");
    let player_ref = server.add_element(PLAYER_KIND, "player-1", &pipeline_ref);
    let ctx = async_context(&server, test_config(2));
    let player = ctx.resolve_as::<PlayerEndpoint>(player_ref)?;

    for _ in 0..3 {
        let (cont, rx) = Continuation::channel();
        player.media_object().get_parent_async(cont);
        let parent = rx.await??.expect("player has a parent");
        assert_eq!(parent.media_object().reference(), &pipeline_ref);

        let (cont, rx) = Continuation::channel();
        player.media_object().get_media_pipeline_async(cont);
        assert_eq!(rx.await??.reference(), &pipeline_ref);
    }

    assert_eq!(server.calls_to("getParent"), 1);
    assert_eq!(server.calls_to("getMediaPipeline"), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pipeline_async_self_lookup_is_local() -> anyhow::Result<()> {
    let server = MockMediaServer::new();
    server.add_pipeline("p1");
    let ctx = async_context(&server, test_config(1));
    let pipeline = ctx.pipeline("p1")?;

    let (cont, rx) = Continuation::channel();
    pipeline.get_media_pipeline_async(cont);
    assert!(Arc::ptr_eq(&pipeline, &rx.await??));
    assert_eq!(server.calls_to("getMediaPipeline"), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_send_command() -> anyhow::Result<()> {
    let server = MockMediaServer::new();
    let pipeline_ref = server.add_pipeline("p1");
    let player_ref = server.add_element(PLAYER_KIND, "player-1", &pipeline_ref);
    server.set_command_result("getPosition", br#"{"millis": 12}"#.to_vec());
    let ctx = async_context(&server, test_config(1));
    let player = ctx.resolve(player_ref)?;

    let (cont, rx) = Continuation::channel();
    player
        .media_object()
        .send_command_async(Command::new("getPosition", Vec::new()), cont);
    let position = rx.await??.downcast::<Position>()?;
    assert_eq!(position, Position { millis: 12 });
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_keep_alive_on_unknown_reference() -> anyhow::Result<()> {
    let server = MockMediaServer::new();
    let ctx = async_context(&server, test_config(1));
    let ghost = ctx.resolve(MediaObjectRef::new(PLAYER_KIND, "ghost"))?;

    let (cont, rx) = Continuation::channel();
    ghost.media_object().keep_alive_async(cont);
    let err = rx.await?.unwrap_err();
    assert!(err.is_application());
    assert_eq!(ctx.pool().stats().leased, 0);
    Ok(())
}

#[test]
fn test_continuation_cancelled_when_runtime_shuts_down() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let server = MockMediaServer::new();
    server.add_pipeline("p1");
    server.set_latency(Duration::from_secs(5));
    let ctx = remotemedia_media_client::MediaContext::builder(server.connector())
        .config(test_config(1))
        .runtime(runtime.handle().clone())
        .build()
        .unwrap();
    let pipeline = ctx.pipeline("p1").unwrap();

    let (cont, mut rx) = Continuation::channel();
    pipeline.keep_alive_async(cont);
    runtime.shutdown_timeout(Duration::from_millis(100));

    let outcome = rx.try_recv().unwrap();
    assert!(matches!(outcome, Err(Error::Cancelled(_))));
}
