//! Consumer client lifecycle: init modes, invoke types, reload and destroy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rpc_cluster::config::ConsumerConfig;
use rpc_cluster::error::{ErrorKind, RpcError};
use rpc_cluster::transport::{InvokeType, RpcRequest, RpcResponse};
use rpc_cluster::{CallContext, ConsumerClient, InvokeResult};

mod common;
use common::{addr, provider, test_config, EdgeRecorder, MockTransportFactory, SERVICE};

fn request() -> RpcRequest {
    RpcRequest::new(SERVICE, "echo").with_arg(serde_json::json!("hello"))
}

async fn connected(config: ConsumerConfig, factory: Arc<MockTransportFactory>, ports: &[u16]) -> ConsumerClient {
    let client = ConsumerClient::builder(config, factory).build().unwrap();
    client
        .init_with_providers(ports.iter().map(|p| provider(*p)).collect())
        .await
        .unwrap();
    client
}

#[tokio::test]
async fn test_build_rejects_invalid_config() {
    let mut config = test_config();
    config.interface_id = String::new();
    config.heartbeat.retry_threshold = 1;

    let err = ConsumerClient::builder(config, MockTransportFactory::new())
        .build()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    let msg = err.to_string();
    assert!(msg.contains("interface_id"), "{msg}");
    assert!(msg.contains("retry_threshold"), "{msg}");
}

#[tokio::test]
async fn test_init_from_direct_urls() {
    let mut config = test_config();
    config.direct_url = Some(format!("{}; bolt://{}?weight=20", addr(12200), addr(12201)));
    let factory = MockTransportFactory::new();
    let client = ConsumerClient::builder(config, factory)
        .init_logging()
        .build()
        .unwrap();

    client.init().await.unwrap();
    assert!(client.is_available());
    let mut ports: Vec<u16> = client.current_providers().iter().map(|p| p.port()).collect();
    ports.sort();
    assert_eq!(ports, vec![12200, 12201]);
    let weighted = client
        .current_providers()
        .into_iter()
        .find(|p| p.port() == 12201)
        .unwrap();
    assert_eq!(weighted.weight(), 20);
}

#[tokio::test]
async fn test_direct_url_protocol_mismatch_fails_init() {
    let mut config = test_config();
    config.direct_url = Some(format!("dubbo://{}", addr(12200)));
    let client = ConsumerClient::builder(config, MockTransportFactory::new())
        .build()
        .unwrap();

    let err = client.init().await.unwrap_err();
    assert!(matches!(err, RpcError::ProtocolMismatch { .. }), "{err}");
}

#[tokio::test]
async fn test_check_fails_init_when_nothing_is_reachable() {
    let mut config = test_config();
    config.check = true;
    let factory = MockTransportFactory::new();
    factory.transport(&addr(12200)).set_fail_connect(true);
    let client = ConsumerClient::builder(config, factory).build().unwrap();

    let err = client.init_with_providers(vec![provider(12200)]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    // The provider stays in retry for the reconnect loop
    assert_eq!(client.current_providers().len(), 1);
}

#[tokio::test]
async fn test_check_passes_with_one_reachable_provider() {
    let mut config = test_config();
    config.check = true;
    let factory = MockTransportFactory::new();
    factory.transport(&addr(12200)).set_fail_connect(true);
    let client = ConsumerClient::builder(config, factory).build().unwrap();

    client
        .init_with_providers(vec![provider(12200), provider(12201)])
        .await
        .unwrap();
    assert!(client.is_available());
}

#[tokio::test]
async fn test_lazy_client_connects_on_first_call() {
    let mut config = test_config();
    config.lazy = true;
    let factory = MockTransportFactory::new();
    let client = ConsumerClient::builder(config, factory.clone()).build().unwrap();

    client.init_with_providers(vec![provider(12200)]).await.unwrap();
    assert_eq!(factory.create_count(), 0);
    assert!(!client.is_available());

    let resp = client.send_msg(request()).await.unwrap();
    assert_eq!(resp.payload, Some(serde_json::json!(addr(12200))));
    assert_eq!(factory.create_count(), 1);

    client.send_msg(request()).await.unwrap();
    assert_eq!(factory.transport(&addr(12200)).connect_count(), 1);
}

#[tokio::test]
async fn test_availability_listener_sees_init_and_destroy() {
    let factory = MockTransportFactory::new();
    let recorder = EdgeRecorder::new();
    let client = ConsumerClient::builder(test_config(), factory)
        .availability_listener(recorder.clone())
        .build()
        .unwrap();

    client.init_with_providers(vec![provider(12200)]).await.unwrap();
    client.destroy().await;
    assert_eq!(recorder.events(), vec!["available", "unavailable"]);
}

#[tokio::test]
async fn test_future_resolves_once_and_delivers_listeners() {
    let factory = MockTransportFactory::new();
    factory.transport(&addr(12200)).set_send_delay(Duration::from_millis(50));
    let client = connected(test_config(), factory, &[12200]).await;

    let future = client.send_msg_async(request()).await.unwrap();
    assert!(!future.is_done());
    assert!(future.sent_at().is_some());

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    future.add_listener(move |result| {
        assert!(result.is_ok());
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let resp = future.get().await.unwrap();
    assert_eq!(resp.payload, Some(serde_json::json!(addr(12200))));
    assert!(future.is_success());

    // Later completions lose
    assert!(!future.set_success(RpcResponse::default()));
    assert!(!future.set_failure(RpcError::Transport("late".into())));
    assert!(!future.cancel());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    // Registered after resolution: delivered immediately
    let counter = delivered.clone();
    future.add_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(delivered.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_future_failure_and_timeout() {
    let factory = MockTransportFactory::new();
    let transport = factory.transport(&addr(12200));
    transport.push_reply(Err(RpcError::Server {
        provider: addr(12200),
        message: "boom".into(),
    }));
    let client = connected(test_config(), factory, &[12200]).await;

    let failed = client.send_msg_async(request()).await.unwrap();
    let err = failed.get().await.unwrap_err();
    assert!(matches!(err, RpcError::Server { .. }));

    transport.set_send_delay(Duration::from_millis(500));
    let slow = client.send_msg_async(request()).await.unwrap();
    let err = slow.get_timeout(Duration::from_millis(30)).await.unwrap_err();
    assert!(matches!(err, RpcError::Timeout { sent: true, .. }), "{err}");
    assert!(slow.cancel());
    assert!(matches!(slow.get().await, Err(RpcError::Cancelled(_))));
}

#[tokio::test]
async fn test_oneway_does_not_wait() {
    let factory = MockTransportFactory::new();
    let client = connected(test_config(), factory.clone(), &[12200]).await;

    client.send_oneway(request()).await.unwrap();
    assert_eq!(factory.transport(&addr(12200)).send_count(), 1);
}

#[tokio::test]
async fn test_invoke_uses_method_invoke_type() {
    let mut config = test_config();
    config.methods.insert(
        "notify".into(),
        rpc_cluster::config::MethodConfig {
            invoke_type: Some(InvokeType::Oneway),
            ..Default::default()
        },
    );
    let factory = MockTransportFactory::new();
    let client = connected(config, factory, &[12200]).await;

    let mut ctx = CallContext::new();
    let sent = client
        .invoke(&RpcRequest::new(SERVICE, "notify"), &mut ctx)
        .await
        .unwrap();
    assert!(matches!(sent, InvokeResult::Sent));

    let answered = client.invoke(&request(), &mut ctx).await.unwrap();
    assert!(answered.into_response().is_some());
}

#[tokio::test]
async fn test_reload_config_swaps_call_settings() {
    let factory = MockTransportFactory::new();
    factory.transport(&addr(12200)).push_reply(Ok(Some(RpcResponse::error(0, "busy"))));
    let client = connected(test_config(), factory, &[12200, 12201]).await;

    let mut updated = test_config();
    updated.invoke.retries = 1;
    client.reload_config(updated).unwrap();
    assert_eq!(client.config().invoke.retries, 1);

    // Whichever provider fails first, the retry lands on the other
    client.send_msg(request()).await.unwrap();

    let mut renamed = test_config();
    renamed.interface_id = "com.acme.Other".into();
    assert!(client.reload_config(renamed).is_err());
    assert_eq!(client.config().interface_id, SERVICE);
}

#[tokio::test]
async fn test_update_providers_through_client() {
    let factory = MockTransportFactory::new();
    let client = connected(test_config(), factory, &[12200, 12201]).await;

    let (added, removed) = client
        .update_providers(vec![provider(12201), provider(12202)])
        .await
        .unwrap();
    assert_eq!((added, removed), (1, 1));
    assert_eq!(client.current_provider_map().alive.len(), 2);

    assert_eq!(client.remove_providers(&[provider(12201)]).await.unwrap(), 1);
    assert_eq!(client.add_providers(vec![provider(12203)]).await.unwrap(), 1);
    assert_eq!(client.current_providers().len(), 2);
}

#[tokio::test]
async fn test_follow_provider_file() {
    let path = std::env::temp_dir().join(format!("providers-{}.toml", uuid::Uuid::new_v4()));
    std::fs::write(
        &path,
        format!(
            "[[providers]]\nurl = \"bolt://{}\"\n\n[[providers]]\nurl = \"{}\"\n",
            addr(12200),
            addr(12201)
        ),
    )
    .unwrap();

    let factory = MockTransportFactory::new();
    let client = Arc::new(connected(test_config(), factory, &[12299]).await);
    client.follow_provider_file(&path).await.unwrap();

    let mut ports: Vec<u16> = client.current_providers().iter().map(|p| p.port()).collect();
    ports.sort();
    assert_eq!(ports, vec![12200, 12201]);

    client.destroy().await;
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_destroy_is_idempotent_and_final() {
    let factory = MockTransportFactory::new();
    let client = connected(test_config(), factory.clone(), &[12200, 12201]).await;
    client.send_msg(request()).await.unwrap();

    client.destroy().await;
    client.destroy().await;
    assert!(client.is_destroyed());
    assert!(!client.is_available());
    assert!(client.current_providers().is_empty());
    assert_eq!(factory.transport(&addr(12200)).disconnect_count(), 1);
    assert_eq!(factory.transport(&addr(12201)).disconnect_count(), 1);

    let err = client.send_msg(request()).await.unwrap_err();
    assert!(matches!(err, RpcError::Destroyed(_)));
    assert_eq!(err.kind(), ErrorKind::Lifecycle);
    assert!(client.add_providers(vec![provider(12202)]).await.is_err());
}

#[tokio::test]
async fn test_destroy_drains_calls_in_flight() {
    let factory = MockTransportFactory::new();
    factory.transport(&addr(12200)).set_send_delay(Duration::from_millis(100));
    let client = Arc::new(connected(test_config(), factory.clone(), &[12200]).await);

    let caller = client.clone();
    let call = tokio::spawn(async move { caller.send_msg(request()).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    client.destroy().await;
    assert!(call.await.unwrap().is_ok());
    assert_eq!(factory.transport(&addr(12200)).disconnect_count(), 1);
}
