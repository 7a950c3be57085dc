#![cfg(feature = "http")]

use ogframe::capture::{HttpLoader, ResourceLoader};
use ogframe::CaptureError;

fn serve_once(body: &'static [u8]) -> String {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr();
    std::thread::spawn(move || {
        if let Ok(request) = server.recv() {
            let _ = request.respond(tiny_http::Response::from_data(body));
        }
    });
    format!("http://{}/logo.png", addr)
}

#[tokio::test]
async fn http_loader_fetches_bytes() {
    let url = serve_once(b"fake-png");
    let loader = HttpLoader::new("ogframe-test").unwrap();
    let res = loader.load(&url).await.unwrap();
    assert_eq!(res.bytes.as_slice(), b"fake-png");
}

#[tokio::test]
async fn disallowed_hosts_taint_the_capture() {
    let loader = HttpLoader::new("ogframe-test").unwrap().allow_hosts(vec!["cdn.example.com".into()]);
    let err = loader.load("http://127.0.0.1:9/logo.png").await.unwrap_err();
    assert!(matches!(err, CaptureError::Tainted(_)));
}
