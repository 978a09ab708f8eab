use std::{sync::Arc, time::Duration};

use futures_util::future::try_join;
use tributary::{
    proto::tributary::{
        publish_request::RequestType, publish_response::ResponseType, Cursor,
        InitialPublishResponse, MessagePublishResponse, PubSubMessage, PublishRequest,
        PublishResponse,
    },
    transport::mock::MockConnector,
    MessageMetadata, PublishSettings, Publisher, ServiceStatus, WireError,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn message(data: &str) -> PubSubMessage {
    PubSubMessage {
        key: vec![],
        data: data.as_bytes().to_vec(),
    }
}

fn initial_response() -> PublishResponse {
    PublishResponse {
        response_type: Some(ResponseType::InitialResponse(InitialPublishResponse {})),
    }
}

fn message_response(offset: i64) -> PublishResponse {
    PublishResponse {
        response_type: Some(ResponseType::MessageResponse(MessagePublishResponse {
            start_cursor: Some(Cursor { offset }),
        })),
    }
}

fn new_publisher(connector: &Arc<MockConnector>, count_threshold: usize) -> Arc<Publisher> {
    Publisher::new(
        connector.clone(),
        "projects/p/locations/l/topics/t".parse().unwrap(),
        PublishSettings {
            count_threshold,
            delay_threshold: Duration::from_secs(60),
            timeout: Duration::from_secs(60),
            ..Default::default()
        },
    )
    .unwrap()
}

#[tokio::test]
async fn publishes_single_batch() -> anyhow::Result<()> {
    init_tracing();
    let connector = MockConnector::new();
    let publisher = new_publisher(&connector, 3);
    publisher.start();

    let mut server = connector.publish.accept().await.unwrap();
    match server.recv().await.and_then(|r| r.request_type) {
        Some(RequestType::InitialRequest(initial)) => {
            assert_eq!(initial.topic, "projects/p/locations/l/topics/t");
            assert_eq!(initial.partition, 0);
        }
        other => panic!("unexpected request {other:?}"),
    }
    server.respond(initial_response());
    publisher.wait_started().await?;

    let results: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|data| publisher.publish_async(message(data)))
        .collect();
    assert_eq!(
        server.recv().await,
        Some(PublishRequest::messages(vec![
            message("a"),
            message("b"),
            message("c")
        ]))
    );
    server.respond(message_response(0));
    for (offset, result) in results.into_iter().enumerate() {
        assert_eq!(
            result.await?,
            MessageMetadata {
                partition: 0,
                offset: offset as i64
            }
        );
    }

    publisher.stop();
    publisher.wait_stopped().await?;
    Ok(())
}

#[tokio::test]
async fn resends_unconfirmed_messages_in_order() -> anyhow::Result<()> {
    init_tracing();
    let connector = MockConnector::new();
    let publisher = new_publisher(&connector, 1);
    publisher.start();

    let mut first = connector.publish.accept().await.unwrap();
    first.recv().await.unwrap();
    first.respond(initial_response());
    publisher.wait_started().await?;

    let a = publisher.publish_async(message("a"));
    assert_eq!(
        first.recv().await,
        Some(PublishRequest::messages(vec![message("a")]))
    );
    first.fail(tonic::Status::unavailable("server restarting"));

    let mut second = connector.publish.accept().await.unwrap();
    second.recv().await.unwrap();
    second.respond(initial_response());
    assert_eq!(
        second.recv().await,
        Some(PublishRequest::messages(vec![message("a")]))
    );
    let b = publisher.publish_async(message("b"));
    assert_eq!(
        second.recv().await,
        Some(PublishRequest::messages(vec![message("b")]))
    );
    second.respond(message_response(10));
    second.respond(message_response(11));

    let (a, b) = try_join(a, b).await?;
    assert_eq!(a.offset, 10);
    assert_eq!(b.offset, 11);
    assert_eq!(publisher.status(), ServiceStatus::Active);
    Ok(())
}

#[tokio::test]
async fn fails_pending_messages_on_permanent_error() -> anyhow::Result<()> {
    init_tracing();
    let connector = MockConnector::new();
    let publisher = new_publisher(&connector, 1);
    publisher.start();

    let mut server = connector.publish.accept().await.unwrap();
    server.recv().await.unwrap();
    server.respond(initial_response());
    publisher.wait_started().await?;

    let result = publisher.publish_async(message("a"));
    server.recv().await.unwrap();
    server.fail(tonic::Status::permission_denied("no access"));

    let err = WireError::transport(tonic::Code::PermissionDenied, "no access");
    assert_eq!(result.await, Err(err.clone()));
    assert_eq!(publisher.wait_stopped().await, Err(err));
    Ok(())
}
