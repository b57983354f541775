use localshare_core::config::TransferSettings;
use localshare_core::transfer::handshake::{
    HandshakeOutcome, accept_as_group_owner, connect_as_client, perform_handshake,
};
use localshare_core::transfer::protocol::send_msg;
use localshare_core::{ConnectionInfo, TransferRole, TransferStatusModel};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const PHRASE: &str = "Request LocalShare File Sharing";

async fn owner_listener() -> TcpListener {
    TcpListener::bind((LOCALHOST, 0)).await.unwrap()
}

#[tokio::test]
async fn test_client_sender_to_owner_receiver() {
    let listener = owner_listener().await;
    let addr = listener.local_addr().unwrap();

    let owner = tokio::spawn(async move {
        let mut files = TransferStatusModel::default();
        let outcome = accept_as_group_owner(listener, TransferRole::Receiver, &mut files).await;
        (outcome, files)
    });

    let mut sender_files = TransferStatusModel::from_names(["a.txt", "b.txt", "wiki.zim"]);
    let client = connect_as_client(
        addr,
        TransferRole::Sender,
        &mut sender_files,
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(client, HandshakeOutcome::Resolved(LOCALHOST));

    let (outcome, files) = owner.await.unwrap();
    assert_eq!(outcome, HandshakeOutcome::Resolved(LOCALHOST));
    assert_eq!(
        files.names().collect::<Vec<_>>(),
        vec!["a.txt", "b.txt", "wiki.zim"]
    );
}

#[tokio::test]
async fn test_owner_sender_to_client_receiver() {
    let listener = owner_listener().await;
    let addr = listener.local_addr().unwrap();

    let owner = tokio::spawn(async move {
        let mut files = TransferStatusModel::from_names(["first.bin", "second.bin"]);
        accept_as_group_owner(listener, TransferRole::Sender, &mut files).await
    });

    let mut received = TransferStatusModel::default();
    let client = connect_as_client(
        addr,
        TransferRole::Receiver,
        &mut received,
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(client, HandshakeOutcome::Resolved(LOCALHOST));
    assert_eq!(owner.await.unwrap(), HandshakeOutcome::Resolved(LOCALHOST));
    assert_eq!(
        received.names().collect::<Vec<_>>(),
        vec!["first.bin", "second.bin"]
    );
}

#[tokio::test]
async fn test_wrong_phrase_is_rejected() {
    let listener = owner_listener().await;
    let addr = listener.local_addr().unwrap();

    let owner = tokio::spawn(async move {
        let mut files = TransferStatusModel::default();
        let outcome = accept_as_group_owner(listener, TransferRole::Receiver, &mut files).await;
        (outcome, files)
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    send_msg(&mut stream, "Hello there").await.unwrap();
    // The owner may already have hung up
    let _ = send_msg(&mut stream, "1").await;
    let _ = send_msg(&mut stream, "evil.txt").await;

    let (outcome, files) = owner.await.unwrap();
    assert_eq!(outcome, HandshakeOutcome::Failed);
    assert!(files.is_empty());
}

#[tokio::test]
async fn test_non_numeric_count_fails() {
    let listener = owner_listener().await;
    let addr = listener.local_addr().unwrap();

    let owner = tokio::spawn(async move {
        let mut files = TransferStatusModel::default();
        accept_as_group_owner(listener, TransferRole::Receiver, &mut files).await
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    send_msg(&mut stream, PHRASE).await.unwrap();
    send_msg(&mut stream, "three").await.unwrap();

    assert_eq!(owner.await.unwrap(), HandshakeOutcome::Failed);
}

#[tokio::test]
async fn test_manifest_cut_short_fails() {
    let listener = owner_listener().await;
    let addr = listener.local_addr().unwrap();

    let owner = tokio::spawn(async move {
        let mut files = TransferStatusModel::default();
        let outcome = accept_as_group_owner(listener, TransferRole::Receiver, &mut files).await;
        (outcome, files)
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    send_msg(&mut stream, PHRASE).await.unwrap();
    send_msg(&mut stream, "3").await.unwrap();
    send_msg(&mut stream, "only-one.txt").await.unwrap();
    stream.shutdown().await.unwrap();

    let (outcome, files) = owner.await.unwrap();
    assert_eq!(outcome, HandshakeOutcome::Failed);
    // The partial manifest is never applied
    assert!(files.is_empty());
}

#[tokio::test]
async fn test_empty_manifest_resolves() {
    let listener = owner_listener().await;
    let addr = listener.local_addr().unwrap();

    let owner = tokio::spawn(async move {
        let mut files = TransferStatusModel::default();
        let outcome = accept_as_group_owner(listener, TransferRole::Receiver, &mut files).await;
        (outcome, files)
    });

    let mut nothing = TransferStatusModel::default();
    let client = connect_as_client(
        addr,
        TransferRole::Sender,
        &mut nothing,
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(client, HandshakeOutcome::Resolved(LOCALHOST));

    let (outcome, files) = owner.await.unwrap();
    assert_eq!(outcome, HandshakeOutcome::Resolved(LOCALHOST));
    assert!(files.is_empty());
}

#[tokio::test]
async fn test_client_gives_up_after_timeout() {
    // Reserve a port, then free it so nothing listens there
    let addr = {
        let listener = owner_listener().await;
        listener.local_addr().unwrap()
    };

    let mut files = TransferStatusModel::from_names(["a.txt"]);
    let started = tokio::time::Instant::now();
    let outcome = connect_as_client(
        addr,
        TransferRole::Sender,
        &mut files,
        Duration::from_millis(1200),
    )
    .await;

    assert_eq!(outcome, HandshakeOutcome::Failed);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_client_waits_for_late_owner() {
    let addr = {
        let listener = owner_listener().await;
        listener.local_addr().unwrap()
    };

    let owner = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(700)).await;
        let listener = TcpListener::bind(addr).await.unwrap();
        let mut files = TransferStatusModel::default();
        let outcome = accept_as_group_owner(listener, TransferRole::Receiver, &mut files).await;
        (outcome, files)
    });

    let mut files = TransferStatusModel::from_names(["late.txt"]);
    let client = connect_as_client(addr, TransferRole::Sender, &mut files, Duration::from_secs(5)).await;
    assert_eq!(client, HandshakeOutcome::Resolved(LOCALHOST));

    let (outcome, received) = owner.await.unwrap();
    assert_eq!(outcome, HandshakeOutcome::Resolved(LOCALHOST));
    assert_eq!(received.names().collect::<Vec<_>>(), vec!["late.txt"]);
}

#[tokio::test]
async fn test_no_group_means_no_handshake() {
    let info = ConnectionInfo {
        group_formed: false,
        is_group_owner: true,
        group_owner_address: None,
    };
    let mut files = TransferStatusModel::default();

    let outcome = perform_handshake(
        &info,
        TransferRole::Receiver,
        &mut files,
        &TransferSettings::default(),
    )
    .await;
    assert_eq!(outcome, HandshakeOutcome::Failed);

    let client_without_owner = ConnectionInfo {
        group_formed: true,
        is_group_owner: false,
        group_owner_address: None,
    };
    let outcome = perform_handshake(
        &client_without_owner,
        TransferRole::Sender,
        &mut files,
        &TransferSettings::default(),
    )
    .await;
    assert_eq!(outcome.peer_address(), None);
}
