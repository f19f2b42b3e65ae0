//! Uses the single integration test approach.
//!
//! This improves parallelism when running the tests, and reduces the number of binaries that have to be built (and linked)

mod common;

use reqwest::{Client, StatusCode, redirect::Policy};

use common::{Sandbox, get_free_port, run_bare, wait_for_exit, wait_for_listening};

#[test]
fn unknown_argument_exits_with_usage_code() {
    let status = run_bare(&["--definitely-not-a-flag"]);
    assert_eq!(status.code(), Some(1));
}

#[test]
fn help_exits_successfully() {
    assert_eq!(run_bare(&["--help"]).code(), Some(0));
}

#[test]
fn empty_web_dir_fails_preflight() {
    let sandbox = Sandbox::new();
    std::fs::create_dir_all(sandbox.web_dir()).unwrap();
    let port = get_free_port().to_string();
    let status = sandbox.run(&["--bind", "127.0.0.1", "--port", &port]);
    assert_eq!(status.code(), Some(1));
    assert!(
        !sandbox.dir("data").join("mediahost.db").exists(),
        "nothing initialized after a failed preflight"
    );
}

#[test]
fn occupied_port_exits_with_unavailable_code() {
    let sandbox = Sandbox::new().with_web_client();
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port().to_string();
    let status = sandbox.run(&["--bind", "127.0.0.1", "--port", &port]);
    assert_eq!(status.code(), Some(69));
}

#[tokio::test]
async fn serves_health_and_web_client() {
    let sandbox = Sandbox::new().with_web_client();
    let port = get_free_port();
    let _server = sandbox.spawn(port, &[]);
    wait_for_listening(port, 10).await;

    let client = Client::new();
    let health = client
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(health.text().await.unwrap(), "Healthy");

    let index = client
        .get(format!("http://127.0.0.1:{port}/web/index.html"))
        .send()
        .await
        .unwrap();
    assert_eq!(index.status(), StatusCode::OK);

    let info: serde_json::Value = client
        .get(format!("http://127.0.0.1:{port}/system/info/public"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["server_name"], "mediahost");
}

#[tokio::test]
async fn no_web_client_redirects_to_api_docs() {
    let sandbox = Sandbox::new();
    let port = get_free_port();
    let _server = sandbox.spawn(port, &["--nowebclient"]);
    wait_for_listening(port, 10).await;

    let client = Client::builder().redirect(Policy::none()).build().unwrap();
    let root = client
        .get(format!("http://127.0.0.1:{port}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(root.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(root.headers()["location"], "/api-docs/swagger");
    assert!(
        !sandbox.web_dir().exists(),
        "web directory is not required without the web client"
    );
}

#[tokio::test]
async fn control_endpoints_are_disabled_by_default() {
    let sandbox = Sandbox::new().with_web_client();
    let port = get_free_port();
    let _server = sandbox.spawn(port, &[]);
    wait_for_listening(port, 10).await;

    let status = Client::new()
        .post(format!("http://127.0.0.1:{port}/system/shutdown"))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn shutdown_endpoint_ends_the_process() {
    let sandbox = Sandbox::new()
        .with_web_client()
        .with_env("MEDIAHOST_SERVER__ENABLE_CONTROL_ENDPOINTS", "true");
    let port = get_free_port();
    let mut server = sandbox.spawn(port, &[]);
    wait_for_listening(port, 10).await;

    let status = Client::new()
        .post(format!("http://127.0.0.1:{port}/system/shutdown"))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, StatusCode::ACCEPTED);
    let exit = wait_for_exit(&mut server, 15).await;
    assert_eq!(exit.code(), Some(0));
}

#[tokio::test]
async fn restart_endpoint_starts_a_new_run() {
    let sandbox = Sandbox::new()
        .with_web_client()
        .with_env("MEDIAHOST_SERVER__ENABLE_CONTROL_ENDPOINTS", "true");
    let port = get_free_port();
    let mut server = sandbox.spawn(port, &[]);
    wait_for_listening(port, 10).await;
    let client = Client::new();
    let info_url = format!("http://127.0.0.1:{port}/system/info/public");
    let first: serde_json::Value = client.get(&info_url).send().await.unwrap().json().await.unwrap();

    let restart = client
        .post(format!("http://127.0.0.1:{port}/system/restart"))
        .send()
        .await
        .unwrap();
    assert_eq!(restart.status(), StatusCode::ACCEPTED);

    // the port is released and bound again by the next run
    let mut second = None;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        if let Ok(resp) = client.get(&info_url).send().await
            && let Ok(json) = resp.json::<serde_json::Value>().await
            && json["started_at"] != first["started_at"]
        {
            second = Some(json);
            break;
        }
    }
    assert!(second.is_some(), "no second run came up");
    assert!(
        server.0.try_wait().unwrap().is_none(),
        "process keeps running across restarts"
    );
}
