//! End-to-end scenarios over a wiremock server, superseding the workspace's
//! former httpbin.org-dependent tests (spec §8 "Concrete scenarios").

use engine::{DownloaderConfig, FileDownloader, NullObserver};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[tokio::test]
async fn happy_path_known_size_four_chunks() {
    let body = vec![0x42u8; 1_048_576];
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/file.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Length", "1048576")
                .insert_header("Accept-Ranges", "bytes"),
        )
        .mount(&server)
        .await;

    for (start, end) in [(0, 262_143u64), (262_144, 524_287), (524_288, 786_431), (786_432, 1_048_575)] {
        let slice = body[start as usize..=(end as usize)].to_vec();
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .and(header("Range", format!("bytes={start}-{end}").as_str()))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", format!("bytes {start}-{end}/1048576").as_str())
                    .set_body_bytes(slice),
            )
            .mount(&server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("file.bin");
    let downloader = FileDownloader::new(DownloaderConfig::default()).unwrap();
    let expected = sha256_hex(&body);

    let report = downloader
        .run(
            1,
            &format!("{}/file.bin", server.uri()),
            &dest,
            Some((storage::ChecksumAlgorithm::Sha256, expected)),
            CancellationToken::new(),
            Arc::new(NullObserver),
        )
        .await
        .unwrap();

    assert!(matches!(report.outcome, engine::DownloadOutcome::Completed));
    let written = tokio::fs::read(&dest).await.unwrap();
    assert_eq!(written, body);
    assert!(!storage::exists(&storage::sidecar_path(&dest)));
}

#[tokio::test]
async fn range_unsupported_single_connection() {
    let body = vec![0x7au8; 4096];
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/plain.bin"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Length", "4096"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/plain.bin"))
        .and(header("Range", "bytes=0-0"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Length", "4096"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/plain.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("plain.bin");
    let downloader = FileDownloader::new(DownloaderConfig::default()).unwrap();

    let report = downloader
        .run(
            1,
            &format!("{}/plain.bin", server.uri()),
            &dest,
            None,
            CancellationToken::new(),
            Arc::new(NullObserver),
        )
        .await
        .unwrap();

    assert!(matches!(report.outcome, engine::DownloadOutcome::Completed));
    let written = tokio::fs::read(&dest).await.unwrap();
    assert_eq!(written, body);
}

#[tokio::test]
async fn checksum_mismatch_keeps_file_and_sidecar() {
    let body = vec![0x11u8; 1024];
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/bad.bin"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Length", "1024"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bad.bin"))
        .and(header("Range", "bytes=0-0"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Length", "1024"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bad.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("bad.bin");
    let downloader = FileDownloader::new(DownloaderConfig::default()).unwrap();
    let wrong_expected = "0".repeat(64);

    let err = downloader
        .run(
            1,
            &format!("{}/bad.bin", server.uri()),
            &dest,
            Some((storage::ChecksumAlgorithm::Sha256, wrong_expected)),
            CancellationToken::new(),
            Arc::new(NullObserver),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, engine::EngineError::ChecksumMismatch { .. }));
    assert!(dest.exists());
    assert!(storage::exists(&storage::sidecar_path(&dest)));
}

#[tokio::test]
async fn http_404_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/missing.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("missing.bin");
    let downloader = FileDownloader::new(DownloaderConfig::default()).unwrap();

    let err = downloader
        .run(
            1,
            &format!("{}/missing.bin", server.uri()),
            &dest,
            None,
            CancellationToken::new(),
            Arc::new(NullObserver),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, engine::EngineError::HttpStatus { status: 404, .. }));
}

#[tokio::test]
async fn queue_mixed_outcomes_reports_stats() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/ok.bin"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Length", "8"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ok.bin"))
        .and(header("Range", "bytes=0-0"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Length", "8"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ok.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 8]))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/missing.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let manager = engine::QueueManager::new(
        2,
        DownloaderConfig::default(),
        Arc::new(NullObserver),
    );
    manager
        .add(&format!("{}/ok.bin", server.uri()), Some(dir.path().join("ok.bin")), None)
        .unwrap();
    manager
        .add(
            &format!("{}/missing.bin", server.uri()),
            Some(dir.path().join("missing.bin")),
            None,
        )
        .unwrap();

    manager.run().await.unwrap();

    let stats = manager.stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
}
