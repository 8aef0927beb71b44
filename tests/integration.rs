//! Black-box tests over real sockets: a client and server talking this
//! crate's actual wire protocol, not mocked at any layer.

use myrpc::message::HandshakeOption;
use myrpc::{dial_timeout, impl_service, Discovery, RpcError, Server};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Default)]
struct SumArgs {
    a: i64,
    b: i64,
}

struct Arith;

impl Arith {
    fn sum(&self, args: SumArgs, reply: &mut i64) -> Result<(), String> {
        *reply = args.a + args.b;
        Ok(())
    }

    fn slow(&self, _args: SumArgs, _reply: &mut i64) -> Result<(), String> {
        std::thread::sleep(Duration::from_millis(200));
        Ok(())
    }
}

impl_service!(Arith, "Arith", {
    "sum" => sum: SumArgs => i64,
    "slow" => slow: SumArgs => i64,
});

async fn spawn_arith_server() -> (std::net::SocketAddr, std::sync::Arc<Server>) {
    let listener = async_std::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let server = std::sync::Arc::new(
        Server::builder()
            .register(std::sync::Arc::new(Arith))
            .build()
            .unwrap(),
    );
    let accept_server = server.clone();
    async_std::task::spawn(async move {
        let _ = accept_server.accept(listener, HandshakeOption::default()).await;
    });
    // Give the accept loop a moment to actually start listening-adjacent
    // work; `bind` above already reserved the port, so this just avoids
    // dialling before the spawned task has been scheduled once.
    async_std::task::sleep(Duration::from_millis(10)).await;
    (addr, server)
}

#[async_std::test]
async fn sum_round_trips_over_a_real_socket() {
    let (addr, _server) = spawn_arith_server().await;
    let client = dial_timeout(&addr.to_string(), HandshakeOption::default())
        .await
        .unwrap();

    let mut reply = 0i64;
    client
        .call("Arith.sum", &SumArgs { a: 3, b: 4 }, &mut reply)
        .await
        .unwrap();
    assert_eq!(reply, 7);
}

#[async_std::test]
async fn call_count_increments_on_successful_dispatch() {
    let (addr, server) = spawn_arith_server().await;
    let client = dial_timeout(&addr.to_string(), HandshakeOption::default())
        .await
        .unwrap();

    let mut reply = 0i64;
    client
        .call("Arith.sum", &SumArgs { a: 1, b: 1 }, &mut reply)
        .await
        .unwrap();
    client
        .call("Arith.sum", &SumArgs { a: 1, b: 1 }, &mut reply)
        .await
        .unwrap();

    assert_eq!(server.call_count("Arith.sum"), Some(2));
}

#[async_std::test]
async fn unregistered_service_surfaces_service_not_found() {
    let (addr, _server) = spawn_arith_server().await;
    let client = dial_timeout(&addr.to_string(), HandshakeOption::default())
        .await
        .unwrap();

    let mut reply = 0i64;
    let err = client
        .call("Missing.sum", &SumArgs { a: 1, b: 1 }, &mut reply)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("can't find service Missing"));
}

#[async_std::test]
async fn unknown_method_surfaces_method_not_found() {
    let (addr, _server) = spawn_arith_server().await;
    let client = dial_timeout(&addr.to_string(), HandshakeOption::default())
        .await
        .unwrap();

    let mut reply = 0i64;
    let err = client
        .call("Arith.sub", &SumArgs { a: 1, b: 1 }, &mut reply)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("can't find method Arith.sub"));
}

#[async_std::test]
async fn client_call_timeout_fires_before_a_slow_handler_replies() {
    let (addr, _server) = spawn_arith_server().await;
    let client = dial_timeout(&addr.to_string(), HandshakeOption::default())
        .await
        .unwrap();

    let mut reply = 0i64;
    let err = client
        .call_timeout(
            "Arith.slow",
            &SumArgs { a: 1, b: 1 },
            &mut reply,
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("context deadline exceeded"));
}

#[async_std::test]
async fn server_handle_timeout_rejects_a_slow_handler_itself() {
    let listener = async_std::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::builder()
        .register(std::sync::Arc::new(Arith))
        .build()
        .unwrap();
    async_std::task::spawn(async move {
        let opt = HandshakeOption {
            handle_timeout: Duration::from_millis(20),
            ..HandshakeOption::default()
        };
        let _ = server.accept(listener, opt).await;
    });
    async_std::task::sleep(Duration::from_millis(10)).await;

    let client = dial_timeout(&addr.to_string(), HandshakeOption::default())
        .await
        .unwrap();
    let mut reply = 0i64;
    let err = client
        .call("Arith.slow", &SumArgs { a: 1, b: 1 }, &mut reply)
        .await
        .unwrap_err();
    assert!(matches!(err, myrpc::Error::Remote(RpcError::HandleTimeout)));
}

#[async_std::test]
async fn closing_a_client_twice_rejects_the_second_call() {
    let (addr, _server) = spawn_arith_server().await;
    let client = dial_timeout(&addr.to_string(), HandshakeOption::default())
        .await
        .unwrap();

    client.close().await.unwrap();
    let err = client.close().await.unwrap_err();
    assert!(matches!(err, myrpc::Error::Shutdown));
}

#[async_std::test]
async fn xclient_round_robins_across_two_live_servers() {
    let (addr_a, server_a) = spawn_arith_server().await;
    let (addr_b, server_b) = spawn_arith_server().await;

    let discovery = myrpc::MultiServersDiscovery::new(vec![addr_a.to_string(), addr_b.to_string()]);
    let xclient = myrpc::XClient::new(
        discovery,
        myrpc::SelectMode::RoundRobin,
        HandshakeOption::default(),
    );

    for _ in 0..4 {
        let mut reply = 0i64;
        xclient
            .call("Arith.sum", &SumArgs { a: 2, b: 2 }, &mut reply)
            .await
            .unwrap();
        assert_eq!(reply, 4);
    }

    assert_eq!(server_a.call_count("Arith.sum"), Some(2));
    assert_eq!(server_b.call_count("Arith.sum"), Some(2));
}

#[async_std::test]
async fn xclient_broadcast_reaches_every_known_server() {
    let (addr_a, server_a) = spawn_arith_server().await;
    let (addr_b, server_b) = spawn_arith_server().await;

    let discovery = myrpc::MultiServersDiscovery::new(vec![addr_a.to_string(), addr_b.to_string()]);
    let xclient = myrpc::XClient::new(
        discovery,
        myrpc::SelectMode::Random,
        HandshakeOption::default(),
    );

    let mut reply = 0i64;
    xclient
        .broadcast("Arith.sum", &SumArgs { a: 5, b: 5 }, Some(&mut reply))
        .await
        .unwrap();
    assert_eq!(reply, 10);

    assert_eq!(server_a.call_count("Arith.sum"), Some(1));
    assert_eq!(server_b.call_count("Arith.sum"), Some(1));
}

#[async_std::test]
async fn discovery_with_no_addresses_fails_xclient_calls() {
    let discovery = myrpc::MultiServersDiscovery::new(Vec::new());
    let xclient = myrpc::XClient::new(
        discovery,
        myrpc::SelectMode::Random,
        HandshakeOption::default(),
    );
    let mut reply = 0i64;
    let err = xclient
        .call("Arith.sum", &SumArgs { a: 1, b: 1 }, &mut reply)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no available servers"));
}

#[async_std::test]
async fn registry_discovery_refreshes_from_a_live_http_registry() {
    let registry = myrpc::Registry::with_default_timeout();
    let registry_addr = "127.0.0.1:18411";
    let registry_url = format!("http://{}{}", registry_addr, myrpc::registry::DEFAULT_PATH);

    {
        let registry = registry.clone();
        async_std::task::spawn(async move {
            let _ = myrpc::registry::serve(registry, registry_addr, myrpc::registry::DEFAULT_PATH).await;
        });
    }
    async_std::task::sleep(Duration::from_millis(50)).await;

    let (addr, _server) = spawn_arith_server().await;
    myrpc::registry::start_heartbeat(registry_url.clone(), addr.to_string(), Duration::from_secs(60))
        .await
        .unwrap();

    let discovery = myrpc::RegistryDiscovery::new(registry_url, Duration::from_millis(0));
    let servers = discovery.get_all().await;
    assert_eq!(servers, vec![addr.to_string()]);
}
