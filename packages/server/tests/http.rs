//! HTTP surface tests.
//!
//! These start a real Axum server on a random port and hit the endpoints with
//! an HTTP client.

mod common;

use std::{net::SocketAddr, sync::Arc};

use common::{handler, MockChain, TIP};
use in3_core::hex::quantity;
use in3_server::{routes, state::AppState};
use serde_json::{json, Value};

async fn serve(chain: Arc<MockChain>) -> String {
    let state = Arc::new(AppState {
        handler: handler(chain),
    });
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, routes::router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn health_reports_chain() {
    let base = serve(Arc::new(MockChain::new(0))).await;
    let body: Value = reqwest::get(format!("{}/health", base)).await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["chainId"], "0x1");
    assert_eq!(body["nodeListBlock"], Value::Null);
}

#[tokio::test]
async fn single_and_batch_requests() {
    let base = serve(Arc::new(MockChain::new(0))).await;
    let client = reqwest::Client::new();

    let single: Value = client
        .post(&base)
        .json(&json!({ "jsonrpc": "2.0", "id": 7, "method": "eth_blockNumber", "params": [] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(single["id"], 7);
    assert_eq!(single["result"], quantity(TIP));

    let batch: Value = client
        .post(&base)
        .json(&json!([
            { "jsonrpc": "2.0", "id": 1, "method": "eth_blockNumber", "params": [] },
            { "jsonrpc": "2.0", "id": 2 },
            { "jsonrpc": "2.0", "id": 3, "method": "eth_sign", "params": [] }
        ]))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let batch = batch.as_array().unwrap();
    assert_eq!(batch.len(), 3);
    assert_eq!(batch[0]["result"], quantity(TIP));
    assert_eq!(batch[1]["id"], 2);
    assert_eq!(batch[1]["error"]["code"], -32600);
    assert_eq!(batch[2]["id"], 3);
    assert!(batch[2]["error"].is_object());
}

#[tokio::test]
async fn path_requests() {
    let chain = Arc::new(MockChain::new(0));
    chain.respond("eth_getBalance", json!({ "result": "0x2a" }));
    let base = serve(chain.clone()).await;

    let account = "0x000000000000000000000000000000000000beef";
    let body: Value = reqwest::get(format!("{}/{}/balance", base, account))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["result"], "0x2a");
    assert_eq!(chain.calls("eth_getBalance")[0].params[0], account);

    let block: Value = reqwest::get(format!("{}/latest", base)).await.unwrap().json().await.unwrap();
    assert_eq!(block["result"]["number"], quantity(TIP));

    let missing = reqwest::get(format!("{}/not-a-path", base)).await.unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
}
