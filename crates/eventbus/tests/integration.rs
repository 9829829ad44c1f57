//! End-to-end facade scenarios (§ Testable Properties, C16).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use eventbus::{BusConfig, Context, EncryptionError, EncryptionResult, EngineConfig, EventBus, FieldEncryptor, Handler, SubscriptionKind};
use serde_json::{json, Map, Value};

fn counting_handler(counter: Arc<AtomicUsize>) -> Handler {
    Arc::new(move |_ctx, _event| {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    })
}

async fn wait_for(counter: &AtomicUsize, target: usize, deadline: Duration) {
    tokio::time::timeout(deadline, async {
        while counter.load(Ordering::SeqCst) < target {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("counter did not reach target before deadline");
}

#[tokio::test]
async fn durable_engine_loses_nothing_with_one_slow_subscriber() {
    let config = BusConfig::Full {
        engines: vec![EngineConfig {
            name: "durable".into(),
            engine_type: "memory-durable".into(),
            config: json!({"maxDurableQueueDepth": 20}),
        }],
        routing: vec![],
    };
    let bus = EventBus::new(config).await.unwrap();
    bus.start(Context::none()).await.unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let counter_for_handler = counter.clone();
    let handler: Handler = Arc::new(move |_ctx, _event| {
        let counter = counter_for_handler.clone();
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(2)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });
    bus.subscribe(Context::none(), "orders.created", handler).await.unwrap();

    for _ in 0..200 {
        bus.publish(Context::none(), "orders.created", Value::Null).await.unwrap();
    }

    wait_for(&counter, 200, Duration::from_secs(10)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 200);
    bus.stop(Context::none()).await.unwrap();
}

#[tokio::test]
async fn drop_engine_absorbs_burst_within_task_queue() {
    let config = BusConfig::Full {
        engines: vec![EngineConfig {
            name: "drop".into(),
            engine_type: "memory".into(),
            config: json!({"workerCount": 1, "maxEventQueueSize": 50}),
        }],
        routing: vec![],
    };
    let bus = EventBus::new(config).await.unwrap();
    bus.start(Context::none()).await.unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let counter_for_handler = counter.clone();
    let handler: Handler = Arc::new(move |_ctx, _event| {
        let counter = counter_for_handler.clone();
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });
    bus.subscribe_async(Context::none(), "jobs.queued", handler).await.unwrap();

    for _ in 0..40 {
        bus.publish(Context::none(), "jobs.queued", Value::Null).await.unwrap();
    }

    wait_for(&counter, 40, Duration::from_secs(5)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 40);
    bus.stop(Context::none()).await.unwrap();
}

#[tokio::test]
async fn wildcard_and_exact_subscriptions_both_fire() {
    let config = BusConfig::Legacy { engine: "memory".into() };
    let bus = EventBus::new(config).await.unwrap();
    bus.start(Context::none()).await.unwrap();

    let exact = Arc::new(AtomicUsize::new(0));
    let wildcard = Arc::new(AtomicUsize::new(0));
    bus.subscribe(Context::none(), "durable.wc.alpha", counting_handler(exact.clone())).await.unwrap();
    bus.subscribe(Context::none(), "durable.wc.*", counting_handler(wildcard.clone())).await.unwrap();

    bus.publish(Context::none(), "durable.wc.alpha", Value::Null).await.unwrap();
    bus.publish(Context::none(), "durable.wc.beta", Value::Null).await.unwrap();

    wait_for(&wildcard, 2, Duration::from_secs(2)).await;
    assert_eq!(exact.load(Ordering::SeqCst), 1);
    assert_eq!(wildcard.load(Ordering::SeqCst), 2);
    bus.stop(Context::none()).await.unwrap();
}

#[tokio::test]
async fn plain_publish_always_sets_empty_encryptedfields_extension() {
    let config = BusConfig::Legacy { engine: "memory".into() };
    let bus = EventBus::new(config).await.unwrap();
    bus.start(Context::none()).await.unwrap();

    let captured: Arc<tokio::sync::Mutex<Option<eventbus::Event>>> = Arc::new(tokio::sync::Mutex::new(None));
    let captured_for_handler = captured.clone();
    let handler: Handler = Arc::new(move |_ctx, event| {
        let captured = captured_for_handler.clone();
        Box::pin(async move {
            *captured.lock().await = Some(event);
            Ok(())
        })
    });
    bus.subscribe(Context::none(), "billing.invoiced", handler).await.unwrap();
    bus.publish(Context::none(), "billing.invoiced", json!({"amount": 42})).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let event = captured.lock().await.clone().expect("handler should have fired");
    assert_eq!(event.metadata.get("encryptedfields").unwrap(), "[]");
    bus.stop(Context::none()).await.unwrap();
}

struct FakeFieldEncryptor;

impl FieldEncryptor for FakeFieldEncryptor {
    fn encrypt(&self, fields: &Map<String, Value>, field_names: &[String]) -> Result<EncryptionResult, EncryptionError> {
        let mut data = fields.clone();
        let mut encrypted = Vec::new();
        for name in field_names {
            if let Some(value) = data.get(name) {
                let plaintext = value.to_string();
                let ciphertext = BASE64.encode(plaintext.as_bytes());
                data.insert(
                    name.clone(),
                    json!({
                        "iv": BASE64.encode(b"0123456789ab"),
                        "ciphertext": ciphertext,
                        "auth_tag": BASE64.encode(b"0123456789ab0123"),
                    }),
                );
                encrypted.push(name.clone());
            }
        }
        Ok(EncryptionResult {
            data: Value::Object(data),
            algorithm: "aes-256-gcm".into(),
            key_id: "K".into(),
            wrapped_dek: BASE64.encode(b"wrapped-dek"),
            encrypted_fields: encrypted,
            context: std::collections::HashMap::new(),
        })
    }
}

#[tokio::test]
async fn publish_encrypted_sets_extension_attributes_and_replaces_fields() {
    let config = BusConfig::Legacy { engine: "memory".into() };
    let bus = EventBus::new(config).await.unwrap();
    bus.start(Context::none()).await.unwrap();

    let captured: Arc<tokio::sync::Mutex<Option<eventbus::Event>>> = Arc::new(tokio::sync::Mutex::new(None));
    let captured_for_handler = captured.clone();
    let handler: Handler = Arc::new(move |_ctx, event| {
        let captured = captured_for_handler.clone();
        Box::pin(async move {
            *captured.lock().await = Some(event);
            Ok(())
        })
    });
    bus.subscribe(Context::none(), "messages.sent", handler).await.unwrap();

    let payload = json!({"messageId": "a", "messageBody": "secret", "texterId": "b"});
    bus.publish_encrypted(Context::none(), "messages.sent", payload, &FakeFieldEncryptor, &["messageBody".to_string()])
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let event = captured.lock().await.clone().expect("handler should have fired");

    assert_eq!(event.metadata.get("encryption").unwrap(), "aes-256-gcm");
    assert_eq!(event.metadata.get("keyid").unwrap(), "K");
    assert_eq!(event.metadata.get("encryptedfields").unwrap(), "[\"messageBody\"]");

    let data = event.payload.as_object().unwrap();
    assert_eq!(data.get("messageId").unwrap(), "a");
    assert_eq!(data.get("texterId").unwrap(), "b");
    let body = data.get("messageBody").unwrap().as_object().unwrap();
    assert!(!body.get("iv").unwrap().as_str().unwrap().is_empty());
    assert!(!body.get("ciphertext").unwrap().as_str().unwrap().is_empty());
    assert!(!body.get("auth_tag").unwrap().as_str().unwrap().is_empty());

    bus.stop(Context::none()).await.unwrap();
}

#[tokio::test]
async fn tenant_subscriptions_are_isolated() {
    let config = BusConfig::Legacy { engine: "memory".into() };
    let bus = EventBus::new(config).await.unwrap();
    bus.start(Context::none()).await.unwrap();

    let tenant_a = Arc::new(AtomicUsize::new(0));
    let tenant_b = Arc::new(AtomicUsize::new(0));
    bus.subscribe_for_tenant(Context::none(), "tenant-a", "orders.created", SubscriptionKind::Sync, counting_handler(tenant_a.clone()))
        .await
        .unwrap();
    bus.subscribe_for_tenant(Context::none(), "tenant-b", "orders.created", SubscriptionKind::Sync, counting_handler(tenant_b.clone()))
        .await
        .unwrap();

    bus.publish_for_tenant(Context::none(), "tenant-a", "orders.created", Value::Null).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(tenant_a.load(Ordering::SeqCst), 1);
    assert_eq!(tenant_b.load(Ordering::SeqCst), 0);
    bus.stop(Context::none()).await.unwrap();
}
