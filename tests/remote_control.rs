use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bkjobs::config::AppConfig;
use bkjobs::context::AppContext;
use bkjobs::core::{
    BackupJob, BackupType, BusinessSoftwareGate, EncryptionLock, Engine, EngineResources,
    EngineSettings, JobStatus, MemoryTransferLog, StateSnapshot,
};
use bkjobs::db::MemoryJobStore;
use bkjobs::rpc::{ClientError, Request, RpcClient, RpcServer, read_frame, write_frame};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::time::timeout;

async fn start_server() -> (TempDir, Engine, Arc<RpcServer>, SocketAddr) {
    let dir = tempfile::tempdir().unwrap();
    let resources = EngineResources::new(
        EncryptionLock::new(dir.path().join("encryption.lock")),
        BusinessSoftwareGate::disabled(),
        Arc::new(MemoryTransferLog::new()),
    );
    let engine = Engine::new(
        EngineSettings::default(),
        resources,
        Arc::new(MemoryJobStore::new()),
    );
    let ctx = AppContext::new(AppConfig::default(), engine.clone());

    let server = Arc::new(
        RpcServer::bind(ctx, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap(),
    );
    let addr = server.local_addr().unwrap();
    let serving = server.clone();
    tokio::spawn(async move { serving.start().await });

    (dir, engine, server, addr)
}

#[tokio::test]
async fn test_list_over_tcp() {
    let (dir, engine, server, addr) = start_server().await;
    engine
        .add_job("docs", dir.path().join("a"), dir.path().join("b"), BackupType::Full)
        .await
        .unwrap();

    let jobs: Vec<BackupJob> = RpcClient::new(addr).call("list", None).await.unwrap();

    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].name, "docs");
    assert_eq!(jobs[0].backup_type, BackupType::Full);
    server.shutdown();
}

#[tokio::test]
async fn test_execute_then_status() {
    let (dir, engine, server, addr) = start_server().await;
    let source = dir.path().join("src");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::write(source.join("a.txt"), b"hello").unwrap();
    let job = engine
        .add_job("docs", &source, dir.path().join("dst"), BackupType::Full)
        .await
        .unwrap();

    let client = RpcClient::new(addr);
    let answer: Value = client
        .call("execute", Some(json!({ "jobId": job.id })))
        .await
        .unwrap();
    assert_eq!(answer["jobId"], json!(job.id));

    let finished = timeout(Duration::from_secs(5), async {
        loop {
            let status: Vec<StateSnapshot> = client.call("status", None).await.unwrap();
            if let Some(s) = status.iter().find(|s| s.job_id == job.id) {
                if s.status == JobStatus::Finished {
                    return s.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(finished.total_files, 1);
    assert_eq!(std::fs::read(dir.path().join("dst/a.txt")).unwrap(), b"hello");
    server.shutdown();
}

#[tokio::test]
async fn test_control_commands_acknowledge() {
    let (dir, engine, server, addr) = start_server().await;
    let job = engine
        .add_job("docs", dir.path().join("a"), dir.path().join("b"), BackupType::Full)
        .await
        .unwrap();
    let client = RpcClient::new(addr);

    for command in ["pause", "resume", "stop"] {
        let ack: String = client
            .call(command, Some(json!({ "jobId": job.id })))
            .await
            .unwrap();
        assert!(ack.contains(&job.id.to_string()), "{command}: {ack}");
    }
    server.shutdown();
}

#[tokio::test]
async fn test_errors_are_reported_as_remote() {
    let (_dir, _engine, server, addr) = start_server().await;
    let client = RpcClient::new(addr);

    let err = client.call::<Value>("reboot", None).await.unwrap_err();
    assert!(matches!(err, ClientError::Remote(ref m) if m.contains("reboot")));

    let err = client
        .call::<Value>("stop", Some(json!({ "jobId": uuid::Uuid::now_v7() })))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Remote(_)));
    server.shutdown();
}

#[tokio::test]
async fn test_one_connection_serves_many_frames() {
    let (_dir, _engine, server, addr) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    for _ in 0..3 {
        let payload = serde_json::to_vec(&Request::new("list")).unwrap();
        write_frame(&mut stream, &payload).await.unwrap();
        let frame = read_frame(&mut stream).await.unwrap().unwrap();
        let value: Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(value, json!([]));
    }

    // Garbage is answered, not fatal to the connection
    write_frame(&mut stream, b"not json").await.unwrap();
    let frame = read_frame(&mut stream).await.unwrap().unwrap();
    let value: Value = serde_json::from_slice(&frame).unwrap();
    assert!(value["error"].as_str().unwrap().starts_with("Malformed request"));

    server.shutdown();
}
