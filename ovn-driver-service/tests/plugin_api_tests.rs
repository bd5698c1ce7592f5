//! Integration tests for the plugin HTTP API

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use ovn_driver::testing::{MockNorthbound, MockVeth, MockVswitch};
    use ovn_driver::{Driver, Scope};
    use ovn_driver_service::{create_router, PLUGIN_CONTENT_TYPE};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct Plugin {
        router: Router,
        nb: Arc<MockNorthbound>,
        veth: Arc<MockVeth>,
    }

    fn plugin(scope: Scope) -> Plugin {
        let nb = Arc::new(MockNorthbound::new());
        let veth = Arc::new(MockVeth::new());
        let driver = Arc::new(Driver::new(
            nb.clone(),
            Arc::new(MockVswitch::new()),
            veth.clone(),
            "br-int",
            scope,
        ));
        Plugin {
            router: create_router(driver),
            nb,
            veth,
        }
    }

    async fn call(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
        call_raw(router, path, body.to_string()).await
    }

    async fn call_raw(router: &Router, path: &str, body: String) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", PLUGIN_CONTENT_TYPE)
            .body(Body::from(body))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create_network(router: &Router) {
        let (status, body) = call(
            router,
            "/NetworkDriver.CreateNetwork",
            json!({
                "NetworkID": "abcde12345",
                "Options": {"com.docker.network.generic": {"net.libnetwork.ovn.bridge.mode": "nat"}},
                "IPv4Data": [{"AddressSpace": "LocalDefault", "Pool": "10.0.0.0/24", "Gateway": "10.0.0.1/24"}],
                "IPv6Data": null
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body, json!({}));
    }

    #[tokio::test]
    async fn test_activate() {
        let p = plugin(Scope::Local);
        let (status, body) = call_raw(&p.router, "/Plugin.Activate", String::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"Implements": ["NetworkDriver"]}));
    }

    #[tokio::test]
    async fn test_capabilities_report_scope() {
        let p = plugin(Scope::Global);
        let (status, body) = call_raw(&p.router, "/NetworkDriver.GetCapabilities", String::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"Scope": "global", "ConnectivityScope": "global"}));
    }

    #[tokio::test]
    async fn test_endpoint_lifecycle() {
        let p = plugin(Scope::Local);
        create_network(&p.router).await;
        assert!(p.nb.has_switch("ovnbr-abcde"));

        let (status, body) = call(
            &p.router,
            "/NetworkDriver.CreateEndpoint",
            json!({
                "NetworkID": "abcde12345",
                "EndpointID": "fghij67890",
                "Interface": {"Address": "10.0.0.5/24"},
                "Options": {}
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"Interface": {"MacAddress": "7a:42:0a:00:00:05"}}));

        let (status, body) = call(
            &p.router,
            "/NetworkDriver.Join",
            json!({
                "NetworkID": "abcde12345",
                "EndpointID": "fghij67890",
                "SandboxKey": "/var/run/docker/netns/1234",
                "Options": null
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(
            body,
            json!({
                "InterfaceName": {"SrcName": "fghij67890_c", "DstPrefix": "eth"},
                "Gateway": "10.0.0.1"
            })
        );
        assert_eq!(p.veth.links().len(), 2);

        let (status, body) = call(
            &p.router,
            "/NetworkDriver.EndpointOperInfo",
            json!({"NetworkID": "abcde12345", "EndpointID": "fghij67890"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Value"]["host_veth"], "fghij67890");
        assert_eq!(body["Value"]["ip"], "10.0.0.5/24");

        let endpoint = json!({"NetworkID": "abcde12345", "EndpointID": "fghij67890"});
        let (status, _) = call(&p.router, "/NetworkDriver.Leave", endpoint.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(p.veth.links().is_empty());

        // the logical port outlives Leave until DeleteEndpoint
        assert!(p.nb.has_port("brabcde-fghij"));
        let (status, body) = call(
            &p.router,
            "/NetworkDriver.CreateEndpoint",
            json!({
                "NetworkID": "abcde12345",
                "EndpointID": "fghij67890",
                "Interface": {"Address": "10.0.0.5/24", "MacAddress": "02:00:00:00:00:05"}
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));

        let (status, _) = call(&p.router, "/NetworkDriver.DeleteEndpoint", endpoint).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!p.nb.has_port("brabcde-fghij"));

        let (status, _) = call(
            &p.router,
            "/NetworkDriver.DeleteNetwork",
            json!({"NetworkID": "abcde12345"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!p.nb.has_switch("ovnbr-abcde"));
    }

    #[tokio::test]
    async fn test_errors_use_err_field() {
        let p = plugin(Scope::Local);
        let (status, body) = call(
            &p.router,
            "/NetworkDriver.CreateEndpoint",
            json!({
                "NetworkID": "zzzzz99999",
                "EndpointID": "fghij67890",
                "Interface": {"Address": "10.0.0.5/24"}
            }),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let message = body["Err"].as_str().unwrap();
        assert!(message.contains("zzzzz99999"), "{}", message);
    }

    #[tokio::test]
    async fn test_join_without_sandbox_is_rejected() {
        let p = plugin(Scope::Local);
        create_network(&p.router).await;
        call(
            &p.router,
            "/NetworkDriver.CreateEndpoint",
            json!({
                "NetworkID": "abcde12345",
                "EndpointID": "fghij67890",
                "Interface": {"Address": "10.0.0.5/24"}
            }),
        )
        .await;

        let (status, body) = call(
            &p.router,
            "/NetworkDriver.Join",
            json!({"NetworkID": "abcde12345", "EndpointID": "fghij67890", "SandboxKey": ""}),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["Err"].as_str().unwrap().contains("sandbox"));
        assert!(p.veth.links().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let p = plugin(Scope::Local);
        let (status, body) =
            call_raw(&p.router, "/NetworkDriver.CreateNetwork", "{not json".to_string()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["Err"].as_str().unwrap().starts_with("invalid request body"));
    }

    #[tokio::test]
    async fn test_noop_calls_succeed() {
        let p = plugin(Scope::Local);
        let (status, body) = call(
            &p.router,
            "/NetworkDriver.AllocateNetwork",
            json!({"NetworkID": "abcde12345", "Options": {}, "IPv4Data": [], "IPv6Data": []}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"Options": {}}));

        for path in [
            "/NetworkDriver.FreeNetwork",
            "/NetworkDriver.DiscoverNew",
            "/NetworkDriver.DiscoverDelete",
            "/NetworkDriver.ProgramExternalConnectivity",
            "/NetworkDriver.RevokeExternalConnectivity",
        ] {
            let (status, body) = call_raw(&p.router, path, String::new()).await;
            assert_eq!(status, StatusCode::OK, "{}", path);
            assert_eq!(body, json!({}));
        }
        assert!(p.nb.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_call() {
        let p = plugin(Scope::Local);
        let (status, body) = call_raw(&p.router, "/NetworkDriver.Bogus", String::new()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["Err"].as_str().is_some());
    }
}
